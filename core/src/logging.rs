//! In-memory structured log.
//!
//! Hardware oddities are never reported through stderr; instead every
//! suppressed event can leave a message here, stamped with the clock
//! cycle and the DIV-aligned cycle it happened on. The façade drains the
//! buffer on request.

use bitflags::bitflags;

bitflags! {
    /// Log categories a caller can enable at construction time.
    #[derive(Default)]
    pub struct LogCategories: u16 {
        const CLOCK      = 0b0000_0000_0001;
        const EVENTS     = 0b0000_0000_0010;
        const INTERRUPTS = 0b0000_0000_0100;
        const MBC        = 0b0000_0000_1000;
        const TIMER      = 0b0000_0001_0000;
        const SERIAL     = 0b0000_0010_0000;
        const LCD        = 0b0000_0100_0000;
        const SOUND      = 0b0000_1000_0000;
        const CPU        = 0b0001_0000_0000;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub category: LogCategories,
    pub clock_cycle: i32,
    /// The DIV-aligned cycle (`clock + div_offset`), so DIV-relative
    /// timing is visible in traces.
    pub div_clock: i32,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct Logger {
    categories: LogCategories,
    entries: Vec<LogEntry>,
}

impl Logger {
    pub fn new(categories: LogCategories) -> Self {
        Logger {
            categories,
            entries: Vec::new(),
        }
    }

    pub fn is_enabled(&self, category: LogCategories) -> bool {
        self.categories.intersects(category)
    }

    pub fn log(&mut self, category: LogCategories, clock_cycle: i32, div_clock: i32, message: String) {
        if self.is_enabled(category) {
            self.entries.push(LogEntry {
                category,
                clock_cycle,
                div_clock,
                message,
            });
        }
    }

    pub fn get_and_clear_entries(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.entries)
    }

    /// Entries not yet drained may predate the kept cycle window, so
    /// their stamps simply go negative on a rebase.
    pub fn set_back_clock(&mut self, cycle_offset: i32) {
        for entry in self.entries.iter_mut() {
            entry.clock_cycle -= cycle_offset;
            entry.div_clock -= cycle_offset;
        }
    }
}
