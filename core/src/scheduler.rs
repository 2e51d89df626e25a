use tinyvec::ArrayVec;

use crate::hardware::clock::{set_back_cycle, NO_CYCLE};

/// All events that can be scheduled for a future clock cycle.
///
/// The discriminant doubles as the index into the scheduler's
/// `active_event_cycle` lookup table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(usize)]
pub enum EventType {
    VblankIrq = 0,
    LycIrq = 1,
    Mode2Irq = 2,
    Mode0Irq = 3,
    SerialDone = 4,
    TimerIrq = 5,
    /// Scheduled by the STOP instruction to terminate the oscillator
    /// stabilisation period that follows each STOP.
    Unhalt = 6,
    /// While the LCD is switched off we produce a stream of empty frames
    /// to keep the caller's frame pacing intact.
    NextEmptyFrame = 7,
    OamDmaStart = 8,
    HdmaStart = 9,
}

pub const EVENT_TYPE_COUNT: usize = 10;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Event {
    pub cycle: i32,
    pub event_type: EventType,
}

impl Default for Event {
    fn default() -> Self {
        Event {
            cycle: NO_CYCLE,
            event_type: EventType::VblankIrq,
        }
    }
}

/// Queue of scheduled events, at most one entry per [`EventType`].
///
/// The backing vector is kept sorted by descending cycle so the next
/// event to fire sits at the tail and can be popped without shifting.
/// `active_event_cycle` mirrors the queue for O(1) membership queries.
#[derive(Debug)]
pub struct Scheduler {
    events: ArrayVec<[Event; EVENT_TYPE_COUNT]>,
    active_event_cycle: [i32; EVENT_TYPE_COUNT],
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            events: ArrayVec::new(),
            active_event_cycle: [NO_CYCLE; EVENT_TYPE_COUNT],
        }
    }

    /// Schedule `event_type` for the given clock cycle, replacing any
    /// entry of the same type that is already queued.
    pub fn schedule(&mut self, event_type: EventType, for_cycle: i32) {
        debug_assert!(for_cycle >= 0);

        if self.active_event_cycle[event_type as usize] != NO_CYCLE {
            for event in self.events.iter_mut() {
                if event.event_type == event_type {
                    event.cycle = for_cycle;
                    break;
                }
            }
        } else {
            self.events.push(Event {
                cycle: for_cycle,
                event_type,
            });
        }

        // Descending sort keeps the earliest event at the tail. Ties are
        // broken by the discriminant so polling stays deterministic.
        self.events
            .sort_unstable_by(|a, b| (b.cycle, b.event_type as usize).cmp(&(a.cycle, a.event_type as usize)));
        self.active_event_cycle[event_type as usize] = for_cycle;
    }

    /// Remove a scheduled event. Removing an event that is not queued
    /// does nothing.
    pub fn remove(&mut self, event_type: EventType) -> bool {
        if self.active_event_cycle[event_type as usize] == NO_CYCLE {
            return false;
        }

        if let Some(idx) = self.events.iter().position(|ev| ev.event_type == event_type) {
            self.events.remove(idx);
        }
        self.active_event_cycle[event_type as usize] = NO_CYCLE;
        true
    }

    /// The cycle the given event is scheduled for, or [`NO_CYCLE`].
    pub fn cycle_of(&self, event_type: EventType) -> i32 {
        self.active_event_cycle[event_type as usize]
    }

    /// The earliest scheduled cycle over all events, or [`NO_CYCLE`] if
    /// the queue is empty.
    pub fn next_event_cycle(&self) -> i32 {
        self.events.last().map_or(NO_CYCLE, |ev| ev.cycle)
    }

    /// Return and unqueue the earliest event scheduled at or before
    /// `current_cycle`.
    pub fn poll(&mut self, current_cycle: i32) -> Option<EventType> {
        match self.events.last().copied() {
            Some(event) if event.cycle <= current_cycle => {
                self.events.pop();
                self.active_event_cycle[event.event_type as usize] = NO_CYCLE;
                Some(event.event_type)
            }
            _ => None,
        }
    }

    /// Subtract `cycle_offset` from every stored cycle (clock rebase).
    pub fn set_back_clock(&mut self, cycle_offset: i32) {
        for event in self.events.iter_mut() {
            set_back_cycle(&mut event.cycle, cycle_offset);
        }
        for cycle in self.active_event_cycle.iter_mut() {
            set_back_cycle(cycle, cycle_offset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::EventType::*;
    use super::*;

    const FAR_FUTURE: i32 = i32::max_value();

    #[test]
    fn polls_none_if_empty() {
        let mut scheduler = Scheduler::new();
        assert_eq!(scheduler.poll(FAR_FUTURE), None);
    }

    #[test]
    fn polls_chronologically() {
        let mut scheduler = Scheduler::new();

        scheduler.schedule(Mode0Irq, 30);
        scheduler.schedule(Mode2Irq, 10);
        scheduler.schedule(VblankIrq, 20);

        assert_eq!(scheduler.poll(FAR_FUTURE), Some(Mode2Irq));
        assert_eq!(scheduler.poll(FAR_FUTURE), Some(VblankIrq));
        assert_eq!(scheduler.poll(FAR_FUTURE), Some(Mode0Irq));
        assert_eq!(scheduler.poll(FAR_FUTURE), None);
    }

    #[test]
    fn polls_based_on_cycle() {
        let mut scheduler = Scheduler::new();

        scheduler.schedule(Mode0Irq, 10);
        scheduler.schedule(Mode2Irq, 20);

        assert_eq!(scheduler.poll(9), None);
        assert_eq!(scheduler.poll(10), Some(Mode0Irq));
        assert_eq!(scheduler.poll(19), None);
        assert_eq!(scheduler.poll(21), Some(Mode2Irq));
    }

    #[test]
    fn keeps_track_of_scheduled_event_cycle() {
        let mut scheduler = Scheduler::new();

        assert_eq!(scheduler.cycle_of(VblankIrq), NO_CYCLE);
        scheduler.schedule(VblankIrq, 123);
        assert_eq!(scheduler.cycle_of(VblankIrq), 123);
        assert_eq!(scheduler.next_event_cycle(), 123);
    }

    #[test]
    fn replaces_scheduled_event_earlier() {
        let mut scheduler = Scheduler::new();

        scheduler.schedule(Mode0Irq, 10);
        scheduler.schedule(Mode2Irq, 20);
        scheduler.schedule(VblankIrq, 30);
        scheduler.schedule(LycIrq, 40);

        assert_eq!(scheduler.poll(5), None);
        scheduler.schedule(Mode2Irq, 5);
        assert_eq!(scheduler.poll(5), Some(Mode2Irq));
        assert_eq!(scheduler.poll(FAR_FUTURE), Some(Mode0Irq));
        assert_eq!(scheduler.poll(FAR_FUTURE), Some(VblankIrq));
        assert_eq!(scheduler.poll(FAR_FUTURE), Some(LycIrq));
    }

    #[test]
    fn replaces_scheduled_event_later() {
        let mut scheduler = Scheduler::new();

        scheduler.schedule(Mode0Irq, 10);
        scheduler.schedule(Mode2Irq, 20);
        scheduler.schedule(VblankIrq, 30);

        scheduler.schedule(Mode0Irq, 50);
        assert_eq!(scheduler.poll(FAR_FUTURE), Some(Mode2Irq));
        assert_eq!(scheduler.poll(FAR_FUTURE), Some(VblankIrq));
        assert_eq!(scheduler.poll(FAR_FUTURE), Some(Mode0Irq));
    }

    #[test]
    fn removes_scheduled_event() {
        let mut scheduler = Scheduler::new();

        scheduler.schedule(Mode0Irq, 10);
        scheduler.schedule(Mode2Irq, 20);

        assert!(scheduler.remove(Mode0Irq));
        assert_eq!(scheduler.cycle_of(Mode0Irq), NO_CYCLE);
        assert_eq!(scheduler.poll(15), None);
    }

    #[test]
    fn ignores_not_scheduled_event_on_remove() {
        let mut scheduler = Scheduler::new();

        scheduler.schedule(Mode0Irq, 10);

        assert!(!scheduler.remove(VblankIrq));
        assert_eq!(scheduler.poll(15), Some(Mode0Irq));
    }

    #[test]
    fn rebases_every_stored_cycle() {
        let mut scheduler = Scheduler::new();
        let second = crate::CYCLES_PER_SECOND;

        scheduler.schedule(TimerIrq, second + 10);
        scheduler.schedule(SerialDone, second + 20);
        scheduler.set_back_clock(second);

        assert_eq!(scheduler.cycle_of(TimerIrq), 10);
        assert_eq!(scheduler.cycle_of(SerialDone), 20);
        assert_eq!(scheduler.poll(10), Some(TimerIrq));
        assert_eq!(scheduler.poll(19), None);
        assert_eq!(scheduler.poll(20), Some(SerialDone));
    }
}
