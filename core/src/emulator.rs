//! The emulator façade: owns all components and advances the whole
//! machine by caller-supplied clock budgets.

use std::error::Error;
use std::fmt;

use crate::hardware::apu::StereoFrame;
use crate::hardware::bus::Bus;
use crate::hardware::cartridge::CartridgeHeader;
use crate::hardware::clock::NO_CYCLE;
use crate::hardware::cpu::{Cpu, TestInfo};
use crate::hardware::device::DeviceProfile;
use crate::hardware::memory::CART_ROM_BANK_SIZE;
use crate::hardware::ppu::Pixel;
use crate::logging::LogEntry;
use crate::{EmulatorOptions, CYCLES_PER_SECOND};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EmulatorError {
    /// The ROM is too short to contain a cartridge header.
    InvalidRom,
    /// More than 512 banks of 16 KiB cannot be addressed by any MBC.
    RomTooLarge,
}

impl fmt::Display for EmulatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmulatorError::InvalidRom => write!(f, "rom too short to read the cartridge header"),
            EmulatorError::RomTooLarge => write!(f, "rom exceeds 512 banks of 16 KiB"),
        }
    }
}

impl Error for EmulatorError {}

pub struct Emulator {
    cpu: Cpu,
    header: CartridgeHeader,
    emulated_cycles: u64,
}

impl Emulator {
    pub fn new(rom: &[u8], options: EmulatorOptions) -> Result<Self, EmulatorError> {
        if rom.len() < 0x150 {
            return Err(EmulatorError::InvalidRom);
        }
        if rom.len() > 512 * CART_ROM_BANK_SIZE {
            return Err(EmulatorError::RomTooLarge);
        }

        let header = CartridgeHeader::new(rom);
        let device = DeviceProfile::new(rom, options.device_type);
        let mut bus = Bus::new(rom, &header, device, options.colors, options.log_categories);

        if let Some(saved_ram) = &options.saved_ram {
            bus.memory.set_persistent_ram(saved_ram);
        }

        Ok(Emulator {
            cpu: Cpu::new(bus),
            header,
            emulated_cycles: 0,
        })
    }

    /// Run the machine for at least `cycles_to_emulate` 4 MHz cycles
    /// (usually slightly more, since instructions and DMA blocks finish).
    /// Returns true if a new frame was completed.
    pub fn emulate(&mut self, cycles_to_emulate: i32) -> bool {
        if cycles_to_emulate <= 0 {
            return false;
        }

        let frames_before = self.cpu.bus.ppu.frames();
        self.cpu.bus.apu.clear_output_buffer();

        let emulated_cycles = self.emulate_cycles(cycles_to_emulate);
        debug_assert!(emulated_cycles > 0);
        self.emulated_cycles += emulated_cycles as u64;

        self.cpu.bus.ppu.frames() != frames_before
    }

    fn emulate_cycles(&mut self, cycles_to_emulate: i32) -> i32 {
        // headroom: we usually emulate a few cycles more than requested
        const CYCLE_SETBACK_LIMIT: i32 = 2 * CYCLES_PER_SECOND;
        const CYCLE_LIMIT: i32 = i32::max_value() - CYCLE_SETBACK_LIMIT - CYCLES_PER_SECOND;

        let starting_cycle = self.cpu.bus.clock.cycle();
        debug_assert!(starting_cycle < CYCLE_SETBACK_LIMIT);

        let cycle_to_reach = starting_cycle + cycles_to_emulate.min(CYCLE_LIMIT - starting_cycle);

        while self.cpu.bus.clock.cycle() < cycle_to_reach {
            if self.cpu.bus.handle_pending_dma() {
                // HDMA/GDMA ran with the CPU halted
                debug_assert!(self.cpu.bus.device.cgb_mode());
            } else if self.cpu.bus.interrupts.halted() || self.cpu.is_frozen() {
                // nothing happens until the next event: fast-forward in
                // whole machine cycles, then let the events terminate
                // HALT (or keep a frozen CPU's surroundings consistent)
                let fast_forward_cycles = self.fast_forward_halt_cycles(cycle_to_reach);
                debug_assert!(fast_forward_cycles >= 0);
                self.cpu.bus.clock.tick_clock_cycles(fast_forward_cycles);
                self.cpu.bus.handle_events();
            } else {
                self.cpu.emulate();
            }
        }

        // pick up events landing exactly on the final cycle and generate
        // the remaining audio
        self.cpu.bus.handle_events();
        self.cpu.bus.apu.update_state(&self.cpu.bus.clock);

        let current_cycle = self.cpu.bus.clock.cycle();
        let cycles_emulated = current_cycle - starting_cycle;
        debug_assert!(cycles_emulated >= 0);

        // keep the cycle counter from overflowing
        if current_cycle >= CYCLE_SETBACK_LIMIT {
            self.set_back_clock(current_cycle);
        }

        cycles_emulated
    }

    fn fast_forward_halt_cycles(&self, cycle_to_reach: i32) -> i32 {
        let bus = &self.cpu.bus;
        let current_clk = bus.clock.cycle();
        debug_assert!(current_clk < cycle_to_reach);

        let next_event_cycle = bus.scheduler.next_event_cycle();
        let fast_forward_cycle = if next_event_cycle == NO_CYCLE {
            cycle_to_reach
        } else {
            cycle_to_reach.min(next_event_cycle)
        };

        // Fast-forward whole machine cycles. The absolute cycle is not
        // re-aligned, that would break after repeated speed switches.
        let mut clk_diff = (fast_forward_cycle - current_clk).max(0);
        let machine_cycle_clocks = bus.clock.machine_cycle_clocks();
        let fraction = clk_diff & (machine_cycle_clocks - 1);
        if fraction != 0 {
            clk_diff += machine_cycle_clocks - fraction;
        }
        clk_diff
    }

    /// Subtract a positive multiple of one emulated second from the clock
    /// and every stored cycle.
    fn set_back_clock(&mut self, current_cycle: i32) {
        let bus = &mut self.cpu.bus;
        bus.timer
            .update_state(&mut bus.clock, &mut bus.interrupts, &mut bus.scheduler, &bus.device);

        // keep a minimum of one second to avoid negative cycle values
        let cycles_to_keep = CYCLES_PER_SECOND + (current_cycle % CYCLES_PER_SECOND);
        let cycle_offset = current_cycle - cycles_to_keep;
        debug_assert!(cycle_offset > 0);
        debug_assert!(cycle_offset % CYCLES_PER_SECOND == 0);

        bus.clock.set_back_clock(cycle_offset);
        bus.logger.set_back_clock(cycle_offset);
        bus.scheduler.set_back_clock(cycle_offset);
        bus.apu.set_back_clock(cycle_offset);
        bus.ppu.set_back_clock(cycle_offset);
        bus.timer.set_back_clock(cycle_offset);
        bus.serial.set_back_clock(cycle_offset);
        bus.set_back_clock(cycle_offset);
    }

    pub fn set_buttons_down(&mut self, buttons: u8) {
        let bus = &mut self.cpu.bus;
        bus.joypad
            .set_buttons_down(buttons, &mut bus.interrupts, &mut bus.clock, &bus.device);
    }

    pub fn set_buttons_up(&mut self, buttons: u8) {
        let bus = &mut self.cpu.bus;
        bus.joypad
            .set_buttons_up(buttons, &mut bus.interrupts, &mut bus.clock, &bus.device);
    }

    pub fn get_screen_front_buffer(&self) -> &[Pixel] {
        self.cpu.bus.ppu.front_buffer()
    }

    pub fn get_audio_buffer(&self) -> &[StereoFrame] {
        self.cpu.bus.apu.output_buffer()
    }

    /// The audio sampling rate: one frame per two clock cycles.
    pub fn get_pcm_sampling_rate(&self) -> i32 {
        CYCLES_PER_SECOND / 2
    }

    pub fn get_cycles_per_second(&self) -> i32 {
        CYCLES_PER_SECOND
    }

    /// Monotonic across clock rebases.
    pub fn get_emulated_cycles(&self) -> u64 {
        self.emulated_cycles
    }

    pub fn get_persistent_ram(&self) -> Vec<u8> {
        self.cpu.bus.memory.get_persistent_ram()
    }

    pub fn set_persistent_ram(&mut self, source: &[u8]) {
        self.cpu.bus.memory.set_persistent_ram(source);
    }

    pub fn is_frozen(&self) -> bool {
        self.cpu.is_frozen()
    }

    pub fn get_test_info(&self) -> TestInfo {
        self.cpu.test_info()
    }

    pub fn get_and_clear_log_entries(&mut self) -> Vec<LogEntry> {
        self.cpu.bus.logger.get_and_clear_entries()
    }

    /// The cartridge title, whitespace mapped to underscores, cut at the
    /// first character outside `[0-9A-Za-z_]`.
    pub fn get_emulator_title(&self) -> String {
        let mut result = String::new();
        for byte in self.header.title.iter() {
            let c = if *byte == b' ' { b'_' } else { *byte };

            if c != b'_' && !c.is_ascii_alphanumeric() {
                break;
            }
            result.push(c as char);

            if result.len() >= 32 {
                break;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::hardware::device::DeviceType;
    use crate::EmulatorOptionsBuilder;

    fn build_rom(cartridge_type: u8, ram_size: u8, code: &[u8]) -> Vec<u8> {
        let mut rom = vec![0u8; 0x8000];
        rom[0x147] = cartridge_type;
        rom[0x149] = ram_size;
        rom[0x100..0x100 + code.len()].copy_from_slice(code);
        rom
    }

    fn dmg_emulator(code: &[u8]) -> Emulator {
        let rom = build_rom(0x00, 0x00, code);
        let options = EmulatorOptionsBuilder::new().device_type(DeviceType::Dmg).build();
        Emulator::new(&rom, options).unwrap()
    }

    #[test]
    fn too_short_roms_are_rejected() {
        let options = EmulatorOptionsBuilder::new().build();
        let error = Emulator::new(&[0u8; 0x100], options).err().unwrap();
        assert_eq!(error, EmulatorError::InvalidRom);
    }

    #[test]
    fn boot_div_dmg() {
        // after 52 clock cycles of NOPs the DIV upper byte ticks to 0xAC
        let mut emulator = dmg_emulator(&[]);
        assert_eq!(emulator.cpu.bus.clock.read_div(), 0xAB);

        emulator.emulate(52);
        assert_eq!(emulator.cpu.bus.clock.read_div(), 0xAC);
    }

    #[test]
    fn emulated_cycles_are_monotonic() {
        let mut emulator = dmg_emulator(&[]);
        let mut last = emulator.get_emulated_cycles();

        for _ in 0..10 {
            emulator.emulate(1000);
            let current = emulator.get_emulated_cycles();
            assert!(current > last);
            last = current;
        }
    }

    #[test]
    fn emulate_reports_finished_frames() {
        let mut emulator = dmg_emulator(&[]);

        // less than a frame: no new frame yet
        assert!(!emulator.emulate(1000));
        // the rest of the frame completes eventually
        assert!(emulator.emulate(crate::hardware::ppu::CYCLES_PER_FRAME));
    }

    #[test]
    fn halted_cpu_still_reaches_the_cycle_target() {
        // HALT with IE empty sleeps through the whole budget
        let mut emulator = dmg_emulator(&[0x76]);
        let start = emulator.get_emulated_cycles();

        emulator.emulate(100_000);
        assert!(emulator.cpu.bus.interrupts.halted());
        assert!(emulator.get_emulated_cycles() - start >= 100_000);
    }

    #[test]
    fn frozen_cpu_is_reported_and_contained() {
        let mut emulator = dmg_emulator(&[0xDD]);
        emulator.emulate(10_000);

        assert!(emulator.is_frozen());
        // further budgets still complete without progress
        emulator.emulate(10_000);
        assert!(emulator.is_frozen());
    }

    #[test]
    fn rebase_does_not_change_observable_state() {
        // Two identical NOP-machines, advanced with different budget
        // chunking. One rebases earlier than the other; all bus-visible
        // state must stay identical.
        let mut a = dmg_emulator(&[]);
        let mut b = dmg_emulator(&[]);

        let total = 2 * CYCLES_PER_SECOND + 70224 * 4;
        a.emulate(total);

        let chunk = total / 4;
        debug_assert!(chunk % 4 == 0);
        for _ in 0..4 {
            b.emulate(chunk);
        }

        assert_eq!(a.get_emulated_cycles(), b.get_emulated_cycles());
        assert_eq!(a.cpu.bus.clock.read_div(), b.cpu.bus.clock.read_div());
        assert_eq!(a.cpu.bus.read_byte(0xFF44), b.cpu.bus.read_byte(0xFF44));
        assert_eq!(a.cpu.bus.read_byte(0xFF0F), b.cpu.bus.read_byte(0xFF0F));
        // both were rebased below the setback limit
        assert!(a.cpu.bus.clock.cycle() < 2 * CYCLES_PER_SECOND);
        assert!(b.cpu.bus.clock.cycle() < 2 * CYCLES_PER_SECOND);
    }

    #[test]
    fn persistent_ram_round_trip_is_a_no_op() {
        let rom = build_rom(0x03, 0x03, &[]); // MBC1+RAM+BATTERY
        let options = EmulatorOptionsBuilder::new().device_type(DeviceType::Dmg).build();
        let mut emulator = Emulator::new(&rom, options).unwrap();

        let snapshot = emulator.get_persistent_ram();
        assert_eq!(snapshot.len(), 4 * 8192);

        emulator.set_persistent_ram(&snapshot);
        assert_eq!(emulator.get_persistent_ram(), snapshot);
    }

    #[test]
    fn saved_ram_is_loaded_at_construction() {
        let rom = build_rom(0x03, 0x03, &[]);
        let mut saved = vec![0u8; 4 * 8192];
        saved[0] = 0xAB;

        let options = EmulatorOptionsBuilder::new()
            .device_type(DeviceType::Dmg)
            .saved_ram(Some(saved))
            .build();
        let emulator = Emulator::new(&rom, options).unwrap();

        assert_eq!(emulator.get_persistent_ram()[0], 0xAB);
    }

    #[test]
    fn cgb_speed_switch_through_stop() {
        // LD A,1; LDH (KEY1),A; STOP
        let mut rom = build_rom(0x00, 0x00, &[0x3E, 0x01, 0xE0, 0x4D, 0x10, 0x00]);
        rom[0x143] = 0x80;
        let options = EmulatorOptionsBuilder::new().device_type(DeviceType::CgbE).build();
        let mut emulator = Emulator::new(&rom, options).unwrap();

        emulator.emulate(0x30000);
        assert!(emulator.cpu.bus.clock.is_double_speed());
        // the speed switch resets DIV
        assert!(emulator.cpu.bus.clock.div_offset() != 0);
    }

    #[test]
    fn title_is_filtered_ascii() {
        let mut rom = build_rom(0x00, 0x00, &[]);
        rom[0x134..0x134 + 9].copy_from_slice(b"TEST GAME");
        rom[0x13D] = 0x99; // invalid, cuts the title
        rom[0x13E] = b'X';

        let options = EmulatorOptionsBuilder::new().device_type(DeviceType::Dmg).build();
        let emulator = Emulator::new(&rom, options).unwrap();
        assert_eq!(emulator.get_emulator_title(), "TEST_GAME");
    }
}
