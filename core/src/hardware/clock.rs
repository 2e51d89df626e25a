use crate::hardware::device::DeviceProfile;
use crate::CYCLES_PER_SECOND;

/// Sentinel for "no cycle scheduled / not active".
pub const NO_CYCLE: i32 = -1;

/// Rebase a stored clock cycle by subtracting a whole number of seconds.
/// [`NO_CYCLE`] values stay untouched.
pub fn set_back_cycle(cycle: &mut i32, cycle_offset: i32) {
    if *cycle == NO_CYCLE {
        return;
    }
    debug_assert!(cycle_offset >= CYCLES_PER_SECOND);
    debug_assert!(cycle_offset % CYCLES_PER_SECOND == 0);
    debug_assert!(*cycle >= cycle_offset);
    *cycle -= cycle_offset;
}

/// Outcome of a DIV reset for a counter driven by a specific DIV bit.
#[derive(Debug, Copy, Clone, Default)]
pub struct DivResetDetails {
    /// Clock cycles until the next counter increment, aligned with the
    /// DIV value before the reset.
    pub clks_to_old_increment: i32,
    /// Clock cycles until the next counter increment, aligned with the
    /// reset DIV.
    pub clks_to_new_increment: i32,
    /// Positive: the next increment is delayed by the reset
    /// (`new - old`). Negative: the reset flips the trigger bit high→low
    /// and the counter increments immediately (`-old`).
    pub clk_adjust: i32,
}

/// The 4 MHz master clock.
///
/// The counter always runs at 4 MHz; at CGB double speed a machine cycle
/// consumes 2 instead of 4 of its ticks. DIV is not stored anywhere,
/// it is derived from `cycle + div_offset` on each read.
#[derive(Debug)]
pub struct Clock {
    cycle: i32,
    machine_cycle_clocks: i8,
    key1: u8,
    /// Clock offset before the last DIV reset, needed by
    /// [`Clock::div_reset_details`].
    old_div_offset: i32,
    div_offset: i32,
}

impl Clock {
    pub fn new(device: &DeviceProfile) -> Self {
        // The power-on clock value encodes the time between switching the
        // machine on and the game gaining control; DIV-probing test roms
        // (boot_div, div/start_inc) depend on it per device.
        let cycle = if device.cgb_mode() {
            0x1F * 0x100 - 96
        } else if device.cgb_in_dmg_mode() {
            0x27 * 0x100 - 136
        } else {
            0xAC * 0x100 - 52
        };
        debug_assert!(cycle % 4 == 0);

        Clock {
            cycle,
            machine_cycle_clocks: 4,
            key1: 0x7E,
            old_div_offset: 0,
            div_offset: 0,
        }
    }

    /// The current 4 MHz cycle, relative to the last rebase.
    pub fn cycle(&self) -> i32 {
        debug_assert!(self.cycle >= 0);
        self.cycle
    }

    pub fn machine_cycle_clocks(&self) -> i32 {
        self.machine_cycle_clocks as i32
    }

    pub fn is_double_speed(&self) -> bool {
        self.machine_cycle_clocks == 2
    }

    pub fn tick_machine_cycle(&mut self) {
        self.cycle += self.machine_cycle_clocks as i32;
    }

    pub fn tick_2_clock_cycles(&mut self) {
        self.cycle += 2;
    }

    pub fn tick_clock_cycles(&mut self, clock_cycles: i32) {
        debug_assert!(clock_cycles >= 0);
        self.cycle += clock_cycles;
    }

    pub fn set_back_clock(&mut self, cycle_offset: i32) {
        set_back_cycle(&mut self.cycle, cycle_offset);
    }

    /// The stabilisation delay after a speed switch: the same number of
    /// machine cycles at either speed, so half the clock cycles when
    /// switching down from double speed.
    pub fn tick_speed_change_delay(&mut self) {
        let delay = if self.is_double_speed() { 0x10000 } else { 0x20000 };
        self.cycle += delay;
    }

    /// Toggle double speed if KEY1 bit 0 is armed. Returns whether a
    /// switch actually happened.
    pub fn change_speed(&mut self) -> bool {
        if self.key1 & 0x01 == 0 {
            return false;
        }

        self.key1 ^= 0x81;
        let double_speed = self.key1 & 0x80 != 0;
        self.machine_cycle_clocks = if double_speed { 2 } else { 4 };

        log::info!(
            "{} speed activated",
            if double_speed { "double" } else { "single" }
        );
        true
    }

    pub fn read_key1(&self) -> u8 {
        self.key1
    }

    pub fn write_key1(&mut self, value: u8) {
        self.key1 = (self.key1 & 0xFE) | (value & 0x01);
    }

    /// How a DIV reset affects a counter whose increment is triggered by
    /// `lowest_counter_bit` going low. Used verbatim by the timer and the
    /// serial port.
    pub fn div_reset_details(&self, lowest_counter_bit: i32) -> DivResetDetails {
        let lower_bits = lowest_counter_bit - 1;
        let trigger_bit = lowest_counter_bit / 2;
        debug_assert!(lowest_counter_bit & lower_bits == 0);

        let old_clock = self.cycle + self.old_div_offset;
        let new_clock = self.cycle + self.div_offset;

        let clks_to_old_increment = lowest_counter_bit - (old_clock & lower_bits);
        let clks_to_new_increment = lowest_counter_bit - (new_clock & lower_bits);

        let old_trigger_bit = old_clock & trigger_bit;
        let new_trigger_bit = new_clock & trigger_bit;

        let clk_adjust = if (old_trigger_bit != 0) && (new_trigger_bit == 0) {
            // trigger bit goes low: immediate counter increment
            -clks_to_old_increment
        } else {
            clks_to_new_increment - clks_to_old_increment
        };

        DivResetDetails {
            clks_to_old_increment,
            clks_to_new_increment,
            clk_adjust,
        }
    }

    pub fn div_offset(&self) -> i32 {
        self.div_offset
    }

    pub fn read_div(&self) -> u8 {
        let shift = if self.is_double_speed() { 7 } else { 8 };
        ((self.cycle + self.div_offset) >> shift) as u8
    }

    /// Any write to DIV zeroes the whole 16 bit counter. We keep the
    /// counter aligned to the free-running clock via an offset instead.
    pub fn write_div(&mut self) {
        let div_counter = self.cycle & 0xFFFF;
        self.old_div_offset = self.div_offset;
        self.div_offset = 0x10000 - div_counter;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::device::DeviceType;

    fn dmg_clock() -> Clock {
        let rom = vec![0u8; 0x150];
        Clock::new(&DeviceProfile::new(&rom, DeviceType::Dmg))
    }

    fn cgb_clock() -> Clock {
        let mut rom = vec![0u8; 0x150];
        rom[0x143] = 0x80;
        Clock::new(&DeviceProfile::new(&rom, DeviceType::CgbE))
    }

    #[test]
    fn power_on_values_per_device() {
        let rom = vec![0u8; 0x150];
        assert_eq!(dmg_clock().cycle(), 0xAC00 - 52);
        assert_eq!(cgb_clock().cycle(), 0x1F00 - 96);

        let compat = Clock::new(&DeviceProfile::new(&rom, DeviceType::CgbE));
        assert_eq!(compat.cycle(), 0x2700 - 136);
    }

    #[test]
    fn div_is_the_high_counter_byte() {
        let mut clock = dmg_clock();
        assert_eq!(clock.read_div(), 0xAB);

        clock.tick_clock_cycles(52);
        assert_eq!(clock.read_div(), 0xAC);
    }

    #[test]
    fn div_write_realigns_the_counter() {
        let mut clock = dmg_clock();
        clock.write_div();
        assert_eq!(clock.read_div(), 0);

        clock.tick_clock_cycles(0x100);
        assert_eq!(clock.read_div(), 1);
    }

    #[test]
    fn machine_cycles_shrink_at_double_speed() {
        let mut clock = cgb_clock();
        let start = clock.cycle();
        clock.tick_machine_cycle();
        assert_eq!(clock.cycle() - start, 4);

        clock.write_key1(0x01);
        assert!(clock.change_speed());
        assert!(clock.is_double_speed());
        assert_eq!(clock.read_key1() & 0x80, 0x80);

        let start = clock.cycle();
        clock.tick_machine_cycle();
        assert_eq!(clock.cycle() - start, 2);
    }

    #[test]
    fn speed_change_requires_armed_key1() {
        let mut clock = cgb_clock();
        assert!(!clock.change_speed());
        assert!(!clock.is_double_speed());
    }

    #[test]
    fn div_reset_details_flags_immediate_increments() {
        let mut clock = dmg_clock();
        // cycle 0xABCC → 0xAC00: trigger bit 7 is low before the reset,
        // so the reset only shifts the next increment.
        clock.tick_clock_cycles(0x34);
        clock.write_div();
        let details = clock.div_reset_details(0x100);
        assert!(details.clk_adjust >= 0);
        assert_eq!(
            details.clk_adjust,
            details.clks_to_new_increment - details.clks_to_old_increment
        );

        // Advance until bit 7 of the DIV-aligned counter is high, then
        // reset: the falling trigger bit increments the counter
        // immediately, reported as a negative adjustment.
        clock.tick_clock_cycles(0x80);
        clock.write_div();
        let details = clock.div_reset_details(0x100);
        assert!(details.clk_adjust < 0);
        assert_eq!(details.clk_adjust, -details.clks_to_old_increment);
    }

    #[test]
    fn rebase_keeps_div_alignment() {
        let mut clock = dmg_clock();
        clock.tick_clock_cycles(2 * CYCLES_PER_SECOND);
        let div_before = clock.read_div();

        clock.set_back_clock(CYCLES_PER_SECOND);
        assert_eq!(clock.read_div(), div_before);
    }
}
