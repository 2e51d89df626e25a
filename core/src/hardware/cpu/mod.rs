//! The SM83 CPU core.
//!
//! Instructions work on a prefetched opcode: `pc` points past the opcode
//! being executed and the next opcode has already been read through the
//! bus during the previous instruction's final machine cycle. The HALT
//! bug and instructions peeking at `[pc]` depend on this.

use bitflags::bitflags;

use crate::hardware::bus::Bus;
use crate::scheduler::EventType;

mod execute;
mod flags;

bitflags! {
    struct CpuState: u8 {
        /// EI enables interrupt dispatching only after the next
        /// instruction.
        const EI_PENDING = 0x01;
        /// An invalid opcode was hit; the CPU makes no further progress.
        const FROZEN = 0x02;
    }
}

/// Register state exposed for test roms: `LD B,B` is the conventional
/// "test finished" marker, the data registers carry the result signature.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TestInfo {
    pub ld_b_b_hit: bool,
    pub a: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
}

pub struct Cpu {
    pub bus: Bus,

    // flag indicators, see flags.rs
    zero_indicator: i32,
    carry_indicator: i32,
    /// First operand plus subtract/old-carry markers of the last
    /// flag-relevant instruction.
    hcs_flags: i32,
    /// Second operand of the last flag-relevant instruction.
    hcs_operand: i32,

    pc: u16,
    sp: u16,
    a: u8,
    b: u8,
    c: u8,
    d: u8,
    e: u8,
    h: u8,
    l: u8,

    prefetched_opcode: u8,
    state: CpuState,

    invalid_opcode: u8,
    ld_b_b_hit: bool,
}

/// Interrupt vectors indexed by the IF bit being dispatched; index 0 is
/// the fallback when the requested interrupt vanished mid-dispatch.
#[rustfmt::skip]
const INTERRUPT_PC_LOOKUP: [u8; 17] = [
    0,
    0x40,
    0x48, 0,
    0x50, 0, 0, 0,
    0x58, 0, 0, 0, 0, 0, 0, 0,
    0x60,
];

impl Cpu {
    pub fn new(mut bus: Bus) -> Self {
        let pc = 0x0100;
        let prefetched_opcode = bus.read_byte(pc);

        let mut cpu = Cpu {
            bus,
            zero_indicator: 0,
            carry_indicator: 0,
            hcs_flags: 0,
            hcs_operand: 0,
            pc,
            sp: 0xFFFE,
            a: 0,
            b: 0,
            c: 0,
            d: 0,
            e: 0,
            h: 0,
            l: 0,
            prefetched_opcode,
            state: CpuState::empty(),
            invalid_opcode: 0,
            ld_b_b_hit: false,
        };

        // register values after the boot rom has run
        if cpu.bus.device.is_dmg_device() {
            cpu.a = 0x01;
            cpu.set_flags(0xB0);
            cpu.b = 0x00;
            cpu.c = 0x13;
            cpu.d = 0x00;
            cpu.e = 0xD8;
            cpu.h = 0x01;
            cpu.l = 0x4D;
        } else {
            cpu.a = 0x11;
            cpu.set_flags(0x80);
            cpu.b = 0x00;
            cpu.c = 0x00;
            cpu.d = 0x00;
            cpu.e = 0x08;
            cpu.h = 0x00;
            cpu.l = 0x7C;
        }

        cpu
    }

    pub fn is_frozen(&self) -> bool {
        self.state.contains(CpuState::FROZEN)
    }

    pub fn invalid_opcode(&self) -> u8 {
        self.invalid_opcode
    }

    pub fn test_info(&self) -> TestInfo {
        TestInfo {
            ld_b_b_hit: self.ld_b_b_hit,
            a: self.a,
            b: self.b,
            c: self.c,
            d: self.d,
            e: self.e,
            h: self.h,
            l: self.l,
        }
    }

    /// One emulation step: dispatch a pending interrupt or execute the
    /// prefetched instruction.
    pub fn emulate(&mut self) {
        debug_assert!(!self.is_frozen());

        // EI takes effect after the next instruction
        if self.state.contains(CpuState::EI_PENDING) {
            debug_assert!(!self.bus.interrupts.ime());
            self.execute_prefetched();

            // enable interrupts only if that instruction was no DI
            if self.state.contains(CpuState::EI_PENDING) {
                self.bus.interrupts.set_ime(true);
                self.state.remove(CpuState::EI_PENDING);
            }
            return;
        }

        // bring the IF register up to date before looking at it
        self.bus.handle_events();
        if self.bus.interrupts.next_interrupt_bit() != 0 {
            self.dispatch_interrupt();
            return;
        }

        self.execute_prefetched();
    }

    fn dispatch_interrupt(&mut self) {
        self.bus.clock.tick_machine_cycle();
        self.bus.clock.tick_machine_cycle();

        // Pushing the PC may overwrite IE or IF (SP pointing at 0xFFFF or
        // 0xFF0F), changing which interrupt gets dispatched; re-evaluate
        // between the two pushes.
        self.tick_push_byte((self.pc >> 8) as u8);

        self.bus.handle_events();
        let intr_bit = self.bus.interrupts.next_interrupt_bit();

        self.tick_push_byte(self.pc as u8);

        self.bus.interrupts.clear_interrupt_flag(intr_bit);

        self.pc = INTERRUPT_PC_LOOKUP[intr_bit as usize] as u16;
        self.prefetched_opcode = self.tick_read_byte(self.pc);

        self.bus.interrupts.finish_dispatch();
    }

    pub(super) fn halt(&mut self) {
        self.bus.clock.tick_machine_cycle();
        self.prefetched_opcode = self.bus.read_byte(self.pc);

        self.bus.handle_events();
        if self.bus.interrupts.halt() {
            if self.bus.device.is_dmg_device() {
                // extra DMG HALT delay; an interrupt raised by the events
                // drained here may terminate HALT right away
                self.bus.clock.tick_machine_cycle();
                self.bus.clock.tick_machine_cycle();
                self.bus.handle_events();
            }
            return;
        }

        // HALT bug: with pending interrupts and IME cleared the next
        // instruction is executed without the PC moving past it
        self.pc = self.pc.wrapping_sub(1);
    }

    pub(super) fn stop(&mut self) {
        self.prefetched_opcode = self.tick_read_byte(self.pc);
        self.bus.clock.tick_machine_cycle();

        self.bus.execute_stop();

        if self.bus.interrupts.halt() {
            // the oscillator stabilisation period after STOP, in machine
            // cycles independent of the (possibly just switched) speed
            let clk_offset = if self.bus.clock.is_double_speed() { 0x10000 } else { 0x20000 };
            self.bus
                .scheduler
                .schedule(EventType::Unhalt, self.bus.clock.cycle() + clk_offset);
        }
    }
}

#[cfg(test)]
pub(super) mod testing {
    use super::*;
    use crate::hardware::cartridge::CartridgeHeader;
    use crate::hardware::device::{DeviceProfile, DeviceType};
    use crate::hardware::ppu::ColorsHint;
    use crate::logging::LogCategories;

    /// A CPU over a 32 KiB no-MBC cartridge, code placed at 0x0100.
    pub fn cpu_with_rom(code: &[u8]) -> Cpu {
        let mut rom = vec![0u8; 0x8000];
        rom[0x100..0x100 + code.len()].copy_from_slice(code);
        let header = CartridgeHeader::new(&rom);
        let device = DeviceProfile::new(&rom, DeviceType::Dmg);
        let bus = Bus::new(&rom, &header, device, ColorsHint::Default, LogCategories::empty());
        Cpu::new(bus)
    }

    pub fn test_cpu() -> Cpu {
        cpu_with_rom(&[])
    }
}
