use crate::hardware::clock::{set_back_cycle, Clock, NO_CYCLE};
use crate::hardware::device::DeviceProfile;
use crate::io::interrupts::{Interrupt, Interrupts};
use crate::scheduler::{EventType, Scheduler};

/// DMG: 512 clock cycles for transferring one bit (8192 bits/s).
const SIO_CLOCK_SHIFT: i32 = 9;

const SC_START_TRANSFER: u8 = 0x80;
const SC_SHIFT_CLOCK_SWITCH: u8 = 0x02;
const SC_TERMINAL_SELECTION: u8 = 0x01;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SioState {
    NoTransfer,
    /// Started with an external clock: without a link partner the
    /// transfer never progresses.
    ExternalClock,
    InternalClock,
}

/// SB/SC serial port.
///
/// Transfers with the internal clock are aligned to the DIV clock; a
/// transfer consists of 8 steps, one bit each. There is no link partner,
/// so 1-bits are shifted in.
#[derive(Debug)]
pub struct Serial {
    sio_state: SioState,
    sio_clk_started: i32,
    sio_clock_shift: i32,
    sio_initial_sb: u8,
    sb: u8,
    sc: u8,
}

impl Serial {
    pub fn new() -> Self {
        Serial {
            sio_state: SioState::NoTransfer,
            sio_clk_started: NO_CYCLE,
            sio_clock_shift: 0,
            sio_initial_sb: 0,
            sb: 0,
            sc: 0,
        }
    }

    pub fn read_sb(&mut self, clock: &mut Clock, interrupts: &mut Interrupts, scheduler: &mut Scheduler, device: &DeviceProfile) -> u8 {
        // bits received so far are visible during the transfer
        self.update_state(clock, interrupts, scheduler, device);
        self.sb
    }

    pub fn read_sc(&self, device: &DeviceProfile) -> u8 {
        // unused bits are always high
        let unused = if device.cgb_mode() { 0x7C } else { 0x7E };
        let transfer_flag = if self.sio_state == SioState::NoTransfer {
            0
        } else {
            SC_START_TRANSFER
        };

        (self.sc & 0x03) | unused | transfer_flag
    }

    pub fn write_sb(&mut self, value: u8) {
        // writing is prohibited while a transfer is in progress
        if self.sio_state == SioState::NoTransfer {
            self.sb = value;
        }
    }

    pub fn write_sc(&mut self, value: u8, clock: &Clock, scheduler: &mut Scheduler, device: &DeviceProfile) {
        self.sc = value;

        if value & SC_START_TRANSFER != 0 {
            if value & SC_TERMINAL_SELECTION != 0 {
                self.start_transfer(value, clock, scheduler, device);
            } else {
                // No counterpart attached: an externally clocked transfer
                // halts any transfer currently in flight.
                self.stop_transfer(SioState::ExternalClock, scheduler);
            }
        } else {
            // clearing SC bit 7 stops an ongoing transfer
            self.stop_transfer(SioState::NoTransfer, scheduler);
        }
    }

    fn start_transfer(&mut self, value_sc: u8, clock: &Clock, scheduler: &mut Scheduler, device: &DeviceProfile) {
        let fast_sio = device.cgb_mode() && (value_sc & SC_SHIFT_CLOCK_SWITCH != 0);
        let clock_shift = if fast_sio { SIO_CLOCK_SHIFT - 5 } else { SIO_CLOCK_SHIFT }
            - clock.is_double_speed() as i32;

        // number of clock cycles per serial transfer step
        let clks_per_step = 1 << (clock_shift - 1);

        // the first step is aligned to the DIV clock
        let current_clk = clock.cycle();
        let clk_div_aligned = current_clk + clock.div_offset();

        let clks_into_step = clk_div_aligned & (clks_per_step - 1);
        let clks_first_step = clks_per_step - clks_into_step;
        let clks_until_finished = clks_first_step + (15 << (clock_shift - 1));

        self.sio_state = SioState::InternalClock;
        self.sio_clock_shift = clock_shift;
        self.sio_clk_started = current_clk + clks_until_finished - (8 << clock_shift);
        self.sio_initial_sb = self.sb;
        debug_assert!(self.sio_clk_started <= current_clk);

        scheduler.schedule(EventType::SerialDone, current_clk + clks_until_finished);
    }

    /// Shift in the bits transferred so far; finishes the transfer and
    /// raises the serial interrupt once all 8 steps have passed.
    pub fn update_state(&mut self, clock: &mut Clock, interrupts: &mut Interrupts, scheduler: &mut Scheduler, device: &DeviceProfile) {
        if self.sio_state != SioState::InternalClock {
            return;
        }
        debug_assert!(self.sio_clk_started != NO_CYCLE);

        let clks_elapsed = clock.cycle() - self.sio_clk_started;
        let shifts = clks_elapsed >> self.sio_clock_shift;

        // no link partner: we receive 0xFF
        let tmp = (self.sio_initial_sb as i32) * 0x100 + 0xFF;
        self.sb = (tmp >> (8 - shifts.min(8))) as u8;

        if shifts >= 8 {
            let clk_irq = self.sio_clk_started + (8 << self.sio_clock_shift);
            self.stop_transfer(SioState::NoTransfer, scheduler);
            interrupts.trigger(Interrupt::Serial, clk_irq, clock, device);
        }
    }

    fn stop_transfer(&mut self, new_state: SioState, scheduler: &mut Scheduler) {
        self.sio_state = new_state;
        self.sio_clock_shift = 0;
        self.sio_clk_started = NO_CYCLE;
        self.sio_initial_sb = 0;
        scheduler.remove(EventType::SerialDone);
    }

    pub fn set_back_clock(&mut self, cycle_offset: i32) {
        set_back_cycle(&mut self.sio_clk_started, cycle_offset);
    }

    pub fn after_div_reset(&mut self, clock: &mut Clock, interrupts: &mut Interrupts, scheduler: &mut Scheduler, device: &DeviceProfile) {
        // may finish an active transfer
        self.update_state(clock, interrupts, scheduler, device);

        if self.sio_state != SioState::InternalClock {
            return;
        }

        // recompute the remaining transfer time against the reset DIV
        let clks_per_step = 1 << (self.sio_clock_shift - 1);
        let reset_details = clock.div_reset_details(clks_per_step);

        let clk_current = clock.cycle();
        let clk_finished = self.sio_clk_started + (8 << self.sio_clock_shift) + reset_details.clk_adjust;
        debug_assert!(clk_finished >= clk_current);

        self.sio_clk_started += reset_details.clk_adjust;
        scheduler.schedule(EventType::SerialDone, clk_finished);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::device::DeviceType;

    struct TestCtx {
        clock: Clock,
        interrupts: Interrupts,
        scheduler: Scheduler,
        device: DeviceProfile,
    }

    fn dmg_ctx() -> (Serial, TestCtx) {
        let rom = vec![0u8; 0x150];
        let device = DeviceProfile::new(&rom, DeviceType::Dmg);
        let ctx = TestCtx {
            clock: Clock::new(&device),
            interrupts: Interrupts::new(),
            scheduler: Scheduler::new(),
            device,
        };
        (Serial::new(), ctx)
    }

    fn update(serial: &mut Serial, ctx: &mut TestCtx) {
        serial.update_state(&mut ctx.clock, &mut ctx.interrupts, &mut ctx.scheduler, &ctx.device);
    }

    #[test]
    fn sb_shifts_in_ones_step_by_step() {
        let (mut serial, mut ctx) = dmg_ctx();
        ctx.clock.write_div();

        serial.write_sb(0x00);
        serial.write_sc(0x81, &ctx.clock, &mut ctx.scheduler, &ctx.device);

        // 512 cycles per bit on DMG, first step div-aligned (div is 0)
        ctx.clock.tick_clock_cycles(3 * 512);
        let sb = serial.read_sb(&mut ctx.clock, &mut ctx.interrupts, &mut ctx.scheduler, &ctx.device);
        assert_eq!(sb, 0b0000_0111);

        // mid-transfer SB writes are dropped
        serial.write_sb(0x55);
        let sb = serial.read_sb(&mut ctx.clock, &mut ctx.interrupts, &mut ctx.scheduler, &ctx.device);
        assert_eq!(sb, 0b0000_0111);
    }

    #[test]
    fn transfer_raises_interrupt_when_finished() {
        let (mut serial, mut ctx) = dmg_ctx();
        ctx.clock.write_div();
        ctx.interrupts.write_if(0x00);

        serial.write_sc(0x81, &ctx.clock, &mut ctx.scheduler, &ctx.device);
        let clk_done = ctx.scheduler.cycle_of(EventType::SerialDone);
        assert_eq!(clk_done, ctx.clock.cycle() + 8 * 512);

        ctx.clock.tick_clock_cycles(8 * 512);
        assert_eq!(ctx.scheduler.poll(ctx.clock.cycle()), Some(EventType::SerialDone));
        update(&mut serial, &mut ctx);

        assert_eq!(ctx.interrupts.read_if() & 0x08, 0x08);
        let sb = serial.read_sb(&mut ctx.clock, &mut ctx.interrupts, &mut ctx.scheduler, &ctx.device);
        assert_eq!(sb, 0xFF);
        assert_eq!(serial.read_sc(&ctx.device) & 0x80, 0);
    }

    #[test]
    fn external_clock_stalls_the_transfer() {
        let (mut serial, mut ctx) = dmg_ctx();
        ctx.clock.write_div();

        serial.write_sc(0x81, &ctx.clock, &mut ctx.scheduler, &ctx.device);
        ctx.clock.tick_clock_cycles(512);

        // switching to the external clock freezes the transfer forever
        serial.write_sc(0x80, &ctx.clock, &mut ctx.scheduler, &ctx.device);
        assert_eq!(ctx.scheduler.cycle_of(EventType::SerialDone), NO_CYCLE);

        ctx.clock.tick_clock_cycles(1 << 16);
        update(&mut serial, &mut ctx);
        assert_eq!(ctx.interrupts.read_if() & 0x08, 0);
        // SC still reports a transfer in progress
        assert_eq!(serial.read_sc(&ctx.device) & 0x80, 0x80);
    }

    #[test]
    fn div_reset_moves_the_completion_cycle() {
        let (mut serial, mut ctx) = dmg_ctx();
        ctx.clock.write_div();

        serial.write_sc(0x81, &ctx.clock, &mut ctx.scheduler, &ctx.device);
        let clk_done_before = ctx.scheduler.cycle_of(EventType::SerialDone);

        // half a step in, the step trigger bit (7) is high: resetting DIV
        // finishes the current step immediately
        ctx.clock.tick_clock_cycles(0x80);
        ctx.clock.write_div();
        serial.after_div_reset(&mut ctx.clock, &mut ctx.interrupts, &mut ctx.scheduler, &ctx.device);

        let clk_done_after = ctx.scheduler.cycle_of(EventType::SerialDone);
        assert_eq!(clk_done_after, clk_done_before - 0x80);
    }
}
