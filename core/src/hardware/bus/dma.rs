use itertools::Itertools;

use crate::hardware::bus::Bus;
use crate::hardware::clock::NO_CYCLE;
use crate::scheduler::EventType;

const HDMA_START_BIT: u8 = 0x80;

impl Bus {
    /// Write to the DMA register (0xFF46): request an OAM DMA transfer.
    pub(super) fn write_dma(&mut self, value: u8) {
        // the register always reads back the last value written, even if
        // it never triggered a transfer (mooneye: oam_dma/reg_read)
        self.oam_dma_byte = value;

        // the transfer starts with a delay; the CGB starts after the
        // current machine cycle already
        let delay_machine_cycles = if self.device.cgb_mode() { 1 } else { 4 };
        self.scheduler.schedule(
            EventType::OamDmaStart,
            self.clock.cycle() + self.clock.machine_cycle_clocks() * delay_machine_cycles,
        );
    }

    pub(super) fn start_oam_dma(&mut self) {
        self.oam_dma_last_cycle = self.clock.cycle();
        self.oam_dma_active = true;
        // Sources above 0xDFFF alias the work ram at 0xC000 - 0xDFFF
        // (mooneye: acceptance/oam_dma/sources-dmgABCmgbS).
        let address = (self.oam_dma_byte as i32) * 0x100;
        self.oam_dma_address = address & if self.oam_dma_byte > 0xDF { 0xDF00 } else { 0xFF00 };
        self.oam_dma_offset = 0;
    }

    /// Copy one byte into OAM for every full machine cycle since the last
    /// service. Called from the event drain while the transfer runs.
    pub(super) fn handle_oam_dma(&mut self) {
        debug_assert!(self.oam_dma_active);

        let current_clk = self.clock.cycle();
        let mut cycles_elapsed = current_clk - self.oam_dma_last_cycle;
        cycles_elapsed &= !(self.clock.machine_cycle_clocks() - 1);
        self.oam_dma_last_cycle += cycles_elapsed;
        if self.clock.is_double_speed() {
            cycles_elapsed <<= 1;
        }

        let bytes = (cycles_elapsed / 4).min(160 - self.oam_dma_offset);
        for i in self.oam_dma_offset..self.oam_dma_offset + bytes {
            let byte = self.read_byte(((self.oam_dma_address + i) & 0xFFFF) as u16);
            // mode 2/3 do not appear to block these writes on hardware
            self.ppu.write_oam(i as usize, byte);
        }

        self.oam_dma_offset += bytes;
        debug_assert!(self.oam_dma_offset <= 160);
        if self.oam_dma_offset >= 160 {
            self.oam_dma_active = false;
            self.oam_dma_last_cycle = NO_CYCLE;
        }
    }

    pub fn oam_dma_active(&self) -> bool {
        self.oam_dma_active
    }

    /// Write to HDMA5: start HDMA or GDMA, or cancel a running HDMA.
    pub(super) fn write_hdma5(&mut self, value: u8) {
        self.hdma5 = value & 0x7F;

        if value & HDMA_START_BIT != 0 {
            self.hdma_active = true;
            self.hdma5 |= HDMA_START_BIT;

            let at = if self.ppu.in_mode0(&self.clock) {
                self.clock.cycle()
            } else {
                self.ppu.next_mode0_cycle(self.clock.cycle())
            };
            self.scheduler.schedule(EventType::HdmaStart, at);
        } else if !self.hdma_active {
            // HDMA not running: start a general purpose DMA
            self.during_dma = true;
        } else {
            self.hdma_active = false;

            // An upcoming HDMA can only be aborted if it does not start
            // on the current cycle (gambatte: dma/hdma_late_disable).
            if self.scheduler.cycle_of(EventType::HdmaStart) > self.clock.cycle() {
                self.scheduler.remove(EventType::HdmaStart);
            }
        }
    }

    pub fn during_dma(&self) -> bool {
        self.during_dma
    }

    /// Run the pending HDMA block or the whole GDMA transfer. The CPU is
    /// halted for the duration, so the bytes move in one go while the
    /// clock advances 2 cycles per byte plus a trailing machine cycle.
    ///
    /// Returns false when no transfer is due.
    pub fn handle_pending_dma(&mut self) -> bool {
        if !self.during_dma {
            return false;
        }

        let dma_length = ((self.hdma5 & !HDMA_START_BIT) + 1) as i32;
        let mut bytes = if self.hdma_active { 0x10 } else { dma_length * 0x10 };

        // A destination wrapping around from 0xFFFF to 0x0000 stops the
        // transfer at that point (gambatte: dma/dma_dst_wrap).
        if self.dma_destination + bytes > 0xFFFF {
            bytes = 0x10000 - self.dma_destination;
        }

        // VRAM and 0xFE00+ sources read as 0xFF
        let source = self.dma_source;
        let staged = (0..bytes)
            .map(|i| {
                let src = ((source + i) & 0xFFFF) as u16;
                if (src & 0xE000) != 0x8000 && src < 0xFE00 {
                    self.read_byte(src)
                } else {
                    0xFF
                }
            })
            .collect_vec();

        for byte in staged {
            let dest = (0x8000 + (self.dma_destination & 0x1FFF)) as u16;
            self.handle_events();
            self.write_byte(dest, byte);
            self.clock.tick_2_clock_cycles();

            self.dma_source += 1;
            self.dma_destination += 1;
        }

        self.clock.tick_machine_cycle();

        // HDMA5 reports the remaining length in the low 7 bits; 0x7F
        // means the transfer is complete
        let remaining = ((dma_length - 1 - (bytes >> 4)) & 0x7F) as u8;
        if remaining == 0x7F {
            self.hdma_active = false;
        }
        self.hdma5 = (self.hdma5 & HDMA_START_BIT) + remaining;

        if self.hdma_active {
            let next = self.ppu.next_mode0_cycle(self.clock.cycle());
            self.scheduler.schedule(EventType::HdmaStart, next);
        }

        self.during_dma = false;
        true
    }
}
