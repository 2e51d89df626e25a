use crate::hardware::clock::Clock;
use crate::hardware::device::DeviceProfile;

/// The five interrupt sources, ordered by priority (lowest bit wins).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Interrupt {
    VBlank = 0b0000_0001,
    LcdStat = 0b0000_0010,
    Timer = 0b0000_0100,
    Serial = 0b0000_1000,
    Joypad = 0b0001_0000,
}

/// During interrupt dispatch the CGB denies serial and timer interrupts
/// from re-requesting the bit that is being acknowledged.
const DENY_RETRIGGER: u8 = Interrupt::Serial as u8 | Interrupt::Timer as u8;

/// IF/IE/IME plus the HALT latch.
///
/// The three high IF bits are hard-wired to 1 on hardware, so `intr_flags`
/// always carries `0xE0`.
#[derive(Debug)]
pub struct Interrupts {
    intr_flags: u8,
    intr_enable: u8,
    during_dispatch: u8,
    ime: bool,
    halted: bool,
}

impl Interrupts {
    pub fn new() -> Self {
        Interrupts {
            intr_flags: 0xE1,
            intr_enable: 0,
            during_dispatch: 0,
            ime: false,
            halted: false,
        }
    }

    /// Request an interrupt. `irq_cycle` is the exact clock cycle the
    /// hardware condition occurred on, which may lie slightly in the past
    /// when the request is raised by a polled event.
    pub fn trigger(&mut self, interrupt: Interrupt, irq_cycle: i32, clock: &mut Clock, device: &DeviceProfile) {
        let intr_bit = interrupt as u8;

        // The CGB ignores serial/timer requests for the interrupt
        // currently being dispatched (its IF bit was just cleared).
        if (intr_bit & self.during_dispatch & DENY_RETRIGGER != 0) && device.is_cgb_hardware() {
            return;
        }

        self.intr_flags |= intr_bit;

        if !self.halted || (self.intr_flags & self.intr_enable & 0x1F == 0) {
            return;
        }

        // terminate HALT mode
        self.halted = false;

        // Leaving HALT costs one extra machine cycle on the CGB. On the
        // DMG the extra cycle only occurs when the interrupt arrived less
        // than half a machine cycle before now.
        if device.is_cgb_hardware() {
            clock.tick_machine_cycle();
            return;
        }

        let clks_diff = clock.cycle() - irq_cycle;
        debug_assert!(clks_diff >= 0);
        if clks_diff < clock.machine_cycle_clocks() / 2 {
            clock.tick_machine_cycle();
        }
    }

    pub fn read_if(&self) -> u8 {
        self.intr_flags | 0xE0
    }

    pub fn read_ie(&self) -> u8 {
        self.intr_enable
    }

    pub fn write_if(&mut self, value: u8) {
        self.intr_flags = value | 0xE0;
    }

    pub fn write_ie(&mut self, value: u8) {
        self.intr_enable = value;
    }

    pub fn ime(&self) -> bool {
        self.ime
    }

    pub fn set_ime(&mut self, ime: bool) {
        self.ime = ime;
    }

    /// The single interrupt bit to dispatch next: the lowest set bit of
    /// `IE & IF`, or 0 when IME is off or nothing is pending.
    pub fn next_interrupt_bit(&self) -> u8 {
        if !self.ime {
            return 0;
        }
        let interrupts = self.intr_enable & self.intr_flags & 0x1F;
        interrupts & interrupts.wrapping_neg()
    }

    /// Acknowledge `interrupt_bit`: clear it from IF and remember it so
    /// CGB re-requests can be denied until the dispatch finishes.
    pub fn clear_interrupt_flag(&mut self, interrupt_bit: u8) {
        self.intr_flags &= !interrupt_bit;
        self.during_dispatch = interrupt_bit;
    }

    pub fn finish_dispatch(&mut self) {
        self.ime = false;
        self.during_dispatch = 0;
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    /// Enter HALT mode. Fails (returns false) if an enabled interrupt is
    /// already pending.
    pub fn halt(&mut self) -> bool {
        debug_assert!(!self.halted);

        if self.intr_flags & self.intr_enable & 0x1F != 0 {
            return false;
        }
        self.halted = true;
        true
    }

    /// Terminate HALT without dispatching (the `Unhalt` event after STOP).
    pub fn clear_halted(&mut self) {
        self.halted = false;
    }
}
