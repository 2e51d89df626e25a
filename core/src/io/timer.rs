use crate::hardware::clock::{set_back_cycle, Clock, NO_CYCLE};
use crate::hardware::device::DeviceProfile;
use crate::io::interrupts::{Interrupt, Interrupts};
use crate::scheduler::{EventType, Scheduler};

const TAC_START_TIMER: u8 = 0x04;

/// TIMA/TMA/TAC.
///
/// TIMA is never counted tick by tick. While the timer runs we only keep
/// `clk_timer_zero`, the clock cycle at which TIMA logically was 0, and
/// recompute `TIMA = (clock - clk_timer_zero) >> clock_shift` on access.
/// `clk_last_overflow` tracks the most recent overflow for the one
/// machine cycle wide reload window.
#[derive(Debug)]
pub struct Timer {
    clk_timer_zero: i32,
    clk_last_overflow: i32,
    clock_shift: u8,
    tima: u8,
    tma: u8,
    tac: u8,
}

impl Timer {
    pub fn new() -> Self {
        Timer {
            clk_timer_zero: NO_CYCLE,
            clk_last_overflow: NO_CYCLE,
            clock_shift: 0,
            tima: 0,
            tma: 0,
            tac: 0xF8,
        }
    }

    /// The number of clock cycles per TIMA increment, as a shift:
    ///
    /// ```text
    /// 00   (4096 Hz): clock cycle >> 10 (1024 clock cycles)
    /// 01 (262144 Hz): clock cycle >>  4   (16 clock cycles)
    /// 10  (65536 Hz): clock cycle >>  6   (64 clock cycles)
    /// 11  (16384 Hz): clock cycle >>  8  (256 clock cycles)
    /// ```
    ///
    /// CGB double speed increments twice as fast.
    fn get_clock_shift(&self, clock: &Clock) -> u8 {
        let clock_shift = 4 + (((self.tac.wrapping_sub(1)) & 0x03) << 1);
        clock_shift - clock.is_double_speed() as u8
    }

    pub fn read_tma(&self) -> u8 {
        self.tma
    }

    pub fn read_tac(&self) -> u8 {
        self.tac
    }

    pub fn read_tima(
        &mut self,
        clock: &mut Clock,
        interrupts: &mut Interrupts,
        scheduler: &mut Scheduler,
        device: &DeviceProfile,
    ) -> u8 {
        if self.clk_timer_zero != NO_CYCLE {
            self.update_timer_state(clock, interrupts, scheduler, device);

            // During the overflow cycle TIMA reads as zero, TMA is only
            // loaded one machine cycle later.
            if self.clk_last_overflow == clock.cycle() {
                return 0;
            }
        }
        self.tima
    }

    pub fn write_tima(
        &mut self,
        value: u8,
        clock: &mut Clock,
        interrupts: &mut Interrupts,
        scheduler: &mut Scheduler,
        device: &DeviceProfile,
    ) {
        // timer not active: plain storage
        if self.clk_timer_zero == NO_CYCLE {
            self.tima = value;
            return;
        }

        self.update_timer_state(clock, interrupts, scheduler, device);

        // The write is discarded while TMA is being loaded (one machine
        // cycle after the overflow).
        let clk_current = clock.cycle();
        if clk_current == self.clk_last_overflow + clock.machine_cycle_clocks() {
            return;
        }

        // Writing TIMA on the exact overflow cycle prevents the
        // interrupt from being raised.
        if self.clk_last_overflow == clk_current {
            self.clk_last_overflow = NO_CYCLE;
        }

        self.tima = value;
        self.start_timer(clock, scheduler);
    }

    pub fn write_tma(
        &mut self,
        value: u8,
        clock: &mut Clock,
        interrupts: &mut Interrupts,
        scheduler: &mut Scheduler,
        device: &DeviceProfile,
    ) {
        if self.clk_timer_zero != NO_CYCLE {
            self.update_timer_state(clock, interrupts, scheduler, device);

            // The new TMA is copied into TIMA if the overflow happened at
            // most one machine cycle ago.
            if self.clk_last_overflow != NO_CYCLE {
                let clks = clock.cycle() - self.clk_last_overflow;
                debug_assert!(clks >= 0);

                if clks <= clock.machine_cycle_clocks() {
                    self.tima = value;
                    self.tma = value;
                    self.start_timer(clock, scheduler);
                }
            }
        }
        self.tma = value;
    }

    pub fn write_tac(
        &mut self,
        value: u8,
        clock: &mut Clock,
        interrupts: &mut Interrupts,
        scheduler: &mut Scheduler,
        device: &DeviceProfile,
    ) {
        let old_clock_shift = self.clock_shift;
        self.tac = value | 0xF8;
        let start_new_timer = self.tac & TAC_START_TIMER != 0;

        // timer not active: maybe start it
        if self.clk_timer_zero == NO_CYCLE {
            if start_new_timer {
                self.start_timer(clock, scheduler);
            }
            return;
        }

        // timer active and to be stopped
        if !start_new_timer {
            self.update_timer_state(clock, interrupts, scheduler, device);
            self.stop_timer(clock, interrupts, scheduler, device);
            return;
        }

        // Timer stays active, the frequency may change though. When the
        // increment-triggering bit goes low due to the frequency change,
        // TIMA is incremented right away.
        let div_clock = clock.cycle() + clock.div_offset();

        let old_trigger_bit = 1 << (old_clock_shift - 1);
        let old_bit = div_clock & old_trigger_bit;

        let new_trigger_bit = 1 << (self.get_clock_shift(clock) - 1);
        let new_bit = div_clock & new_trigger_bit;

        if old_bit != 0 && new_bit == 0 {
            self.clk_timer_zero -= old_trigger_bit << 1;
        }

        self.update_timer_state(clock, interrupts, scheduler, device);
        self.start_timer(clock, scheduler);
    }

    /// Called when the scheduled timer-interrupt event fires.
    pub fn trigger_interrupt(
        &mut self,
        clock: &mut Clock,
        interrupts: &mut Interrupts,
        scheduler: &mut Scheduler,
        device: &DeviceProfile,
    ) {
        debug_assert!(self.clk_timer_zero != NO_CYCLE);

        // handles the overflow if it has not been accounted for yet
        let interrupt_triggered = self.update_timer_state(clock, interrupts, scheduler, device);
        debug_assert!(self.clk_last_overflow != NO_CYCLE);

        if !interrupt_triggered {
            let clk_irq = self.clk_last_overflow + clock.machine_cycle_clocks();
            interrupts.trigger(Interrupt::Timer, clk_irq, clock, device);
            // schedule the next interrupt event
            self.set_clk_timer_zero(self.clk_timer_zero, clock, scheduler);
        }
    }

    pub fn update_state(
        &mut self,
        clock: &mut Clock,
        interrupts: &mut Interrupts,
        scheduler: &mut Scheduler,
        device: &DeviceProfile,
    ) {
        if self.clk_timer_zero != NO_CYCLE {
            self.update_timer_state(clock, interrupts, scheduler, device);
        }
    }

    pub fn set_back_clock(&mut self, cycle_offset: i32) {
        set_back_cycle(&mut self.clk_timer_zero, cycle_offset);
        set_back_cycle(&mut self.clk_last_overflow, cycle_offset);
    }

    pub fn after_speed_change(
        &mut self,
        clock: &mut Clock,
        interrupts: &mut Interrupts,
        scheduler: &mut Scheduler,
        device: &DeviceProfile,
    ) {
        if self.clk_timer_zero == NO_CYCLE {
            return;
        }
        self.update_timer_state(clock, interrupts, scheduler, device);

        let clk_overflow_old = self.clk_timer_zero + (0x100 << self.clock_shift);
        let clk_current = clock.cycle();
        let clks_until_overflow = clk_overflow_old - clk_current;
        debug_assert!(clks_until_overflow > 0);

        let clks_until_overflow = if clock.is_double_speed() {
            clks_until_overflow >> 1
        } else {
            clks_until_overflow << 1
        };
        let clk_overflow_new = clk_current + clks_until_overflow;

        self.clock_shift = self.get_clock_shift(clock);
        self.set_clk_timer_zero(clk_overflow_new - (0x100 << self.clock_shift), clock, scheduler);
    }

    pub fn after_div_reset(
        &mut self,
        clock: &mut Clock,
        interrupts: &mut Interrupts,
        scheduler: &mut Scheduler,
        device: &DeviceProfile,
    ) {
        if self.clk_timer_zero == NO_CYCLE {
            return;
        }
        self.update_timer_state(clock, interrupts, scheduler, device);

        // a falling trigger bit increments TIMA right away
        let clks_per_inc = 1 << self.clock_shift;
        let reset_details = clock.div_reset_details(clks_per_inc);
        self.set_clk_timer_zero(self.clk_timer_zero + reset_details.clk_adjust, clock, scheduler);
    }

    /// Recompute TIMA for the current clock cycle. Returns true if this
    /// raised the timer interrupt.
    fn update_timer_state(
        &mut self,
        clock: &mut Clock,
        interrupts: &mut Interrupts,
        scheduler: &mut Scheduler,
        device: &DeviceProfile,
    ) -> bool {
        debug_assert!(self.clock_shift > 0);
        debug_assert!(self.clk_timer_zero != NO_CYCLE);

        let clk_current = clock.cycle();
        let clks_tima = clk_current - self.clk_timer_zero;
        let tima = clks_tima >> self.clock_shift;

        // no overflow: just update TIMA
        if tima < 0x100 {
            self.tima = tima as u8;
            return false;
        }
        // one or more overflows: reload with TMA
        self.tima = (self.tma as i32 + ((tima - 0x100) % (0x100 - self.tma as i32))) as u8;

        let clk_last_inc = clk_current - (clks_tima & ((1 << self.clock_shift) - 1));
        let incs_since_overflow = self.tima as i32 - self.tma as i32;
        self.clk_last_overflow = clk_last_inc - (incs_since_overflow << self.clock_shift);
        debug_assert!(self.clk_last_overflow <= clk_current);

        self.start_timer(clock, scheduler);

        // If the overflow is at least one machine cycle in the past the
        // interrupt event has already been consumed, so raise it here.
        if clk_current > self.clk_last_overflow {
            let clk_irq = self.clk_last_overflow + clock.machine_cycle_clocks();
            interrupts.trigger(Interrupt::Timer, clk_irq, clock, device);
            return true;
        }
        false
    }

    fn start_timer(&mut self, clock: &Clock, scheduler: &mut Scheduler) {
        let clk_shift = self.get_clock_shift(clock);
        let clks_per_inc = 1 << clk_shift;

        // align the timer with DIV
        let current_clk = clock.cycle();
        let clk_div_aligned = current_clk + clock.div_offset();

        let clks_next_inc = clks_per_inc - (clk_div_aligned & (clks_per_inc - 1));

        let overflow_incs = 0x100 - self.tima as i32;
        let clks_until_overflow = clks_next_inc + ((overflow_incs - 1) << clk_shift);

        self.clock_shift = clk_shift;
        self.set_clk_timer_zero(current_clk + clks_until_overflow - (0x100 << clk_shift), clock, scheduler);
    }

    fn stop_timer(
        &mut self,
        clock: &mut Clock,
        interrupts: &mut Interrupts,
        scheduler: &mut Scheduler,
        device: &DeviceProfile,
    ) {
        if self.clk_timer_zero == NO_CYCLE {
            return;
        }

        // Stopping the timer while the increment-triggering clock bit is
        // high causes an immediate increment.
        let clks_per_inc = 1 << self.clock_shift;
        let trigger_bit = clks_per_inc >> 1;

        let timer_clock = clock.cycle() + clock.div_offset();
        if timer_clock & trigger_bit != 0 {
            self.clk_timer_zero -= clks_per_inc;
            self.update_timer_state(clock, interrupts, scheduler, device);
        }

        self.clock_shift = 0;
        self.clk_timer_zero = NO_CYCLE;
        self.clk_last_overflow = NO_CYCLE;
        scheduler.remove(EventType::TimerIrq);
    }

    fn set_clk_timer_zero(&mut self, new_clk_timer_zero: i32, clock: &Clock, scheduler: &mut Scheduler) {
        debug_assert!(new_clk_timer_zero != NO_CYCLE);
        self.clk_timer_zero = new_clk_timer_zero;

        // The interrupt is raised one machine cycle after the overflow.
        // Don't overwrite an interrupt event that has not been handled
        // yet.
        let clk_current = clock.cycle();
        if self.clk_last_overflow == clk_current {
            return;
        }

        let clk_irq = self.clk_timer_zero + (0x100 << self.clock_shift) + clock.machine_cycle_clocks();
        debug_assert!(clk_irq >= clk_current);
        scheduler.schedule(EventType::TimerIrq, clk_irq);
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

    fn dmg_ctx() -> (Timer, TestCtx) {
        let rom = vec![0u8; 0x150];
        let device = DeviceProfile::new(&rom, DeviceType::Dmg);
        let ctx = TestCtx {
            clock: Clock::new(&device),
            interrupts: Interrupts::new(),
            scheduler: Scheduler::new(),
            device,
        };
        (Timer::new(), ctx)
    }

    fn read_tima(timer: &mut Timer, ctx: &mut TestCtx) -> u8 {
        timer.read_tima(&mut ctx.clock, &mut ctx.interrupts, &mut ctx.scheduler, &ctx.device)
    }

    fn write_tac(timer: &mut Timer, ctx: &mut TestCtx, value: u8) {
        timer.write_tac(value, &mut ctx.clock, &mut ctx.interrupts, &mut ctx.scheduler, &ctx.device);
    }

    fn write_tima(timer: &mut Timer, ctx: &mut TestCtx, value: u8) {
        timer.write_tima(value, &mut ctx.clock, &mut ctx.interrupts, &mut ctx.scheduler, &ctx.device);
    }

    fn write_tma(timer: &mut Timer, ctx: &mut TestCtx, value: u8) {
        timer.write_tma(value, &mut ctx.clock, &mut ctx.interrupts, &mut ctx.scheduler, &ctx.device);
    }

    #[test]
    fn tima_counts_at_the_selected_frequency() {
        let (mut timer, mut ctx) = dmg_ctx();
        ctx.clock.write_div();

        write_tac(&mut timer, &mut ctx, 0x05); // 16 cycles per increment
        assert_eq!(read_tima(&mut timer, &mut ctx), 0);

        ctx.clock.tick_clock_cycles(16 * 10);
        assert_eq!(read_tima(&mut timer, &mut ctx), 10);
    }

    #[test]
    fn overflow_reload_window() {
        let (mut timer, mut ctx) = dmg_ctx();
        ctx.clock.write_div();

        write_tac(&mut timer, &mut ctx, 0x05);
        write_tma(&mut timer, &mut ctx, 0x23);
        write_tima(&mut timer, &mut ctx, 0xFF);

        let clk_overflow = timer.clk_timer_zero + (0x100 << timer.clock_shift);
        let delta = clk_overflow - ctx.clock.cycle();
        assert!(delta > 0);
        ctx.clock.tick_clock_cycles(delta);

        // on the overflow cycle TIMA reads 0, not TMA
        assert_eq!(read_tima(&mut timer, &mut ctx), 0);

        // one machine cycle later TMA has been loaded
        ctx.clock.tick_machine_cycle();
        assert_eq!(read_tima(&mut timer, &mut ctx), 0x23);
    }

    #[test]
    fn tima_write_on_overflow_cycle_cancels_the_interrupt() {
        let (mut timer, mut ctx) = dmg_ctx();
        ctx.clock.write_div();

        write_tac(&mut timer, &mut ctx, 0x05);
        write_tima(&mut timer, &mut ctx, 0xFF);

        let clk_overflow = timer.clk_timer_zero + (0x100 << timer.clock_shift);
        ctx.clock.tick_clock_cycles(clk_overflow - ctx.clock.cycle());

        write_tima(&mut timer, &mut ctx, 0x42);

        assert_eq!(timer.clk_last_overflow, NO_CYCLE);
        assert_eq!(read_tima(&mut timer, &mut ctx), 0x42);
    }

    #[test]
    fn tima_write_after_reload_is_discarded() {
        let (mut timer, mut ctx) = dmg_ctx();
        ctx.clock.write_div();

        write_tac(&mut timer, &mut ctx, 0x05);
        write_tma(&mut timer, &mut ctx, 0x23);
        write_tima(&mut timer, &mut ctx, 0xFF);

        let clk_overflow = timer.clk_timer_zero + (0x100 << timer.clock_shift);
        ctx.clock.tick_clock_cycles(clk_overflow - ctx.clock.cycle());
        ctx.clock.tick_machine_cycle();

        // TMA is being loaded on this very cycle, the write is lost
        write_tima(&mut timer, &mut ctx, 0x42);
        assert_eq!(read_tima(&mut timer, &mut ctx), 0x23);
    }

    #[test]
    fn frequency_change_can_increment_tima() {
        let (mut timer, mut ctx) = dmg_ctx();
        ctx.clock.write_div();
        // bit 9 of the DIV-aligned clock high, bit 3 low
        ctx.clock.tick_clock_cycles(0x200);

        write_tac(&mut timer, &mut ctx, 0x04); // 1024 cycles per increment
        assert_eq!(read_tima(&mut timer, &mut ctx), 0);

        // switching to 16 cycles per increment drops the trigger bit
        write_tac(&mut timer, &mut ctx, 0x05);
        assert_eq!(read_tima(&mut timer, &mut ctx), 1);
    }

    #[test]
    fn div_reset_can_increment_tima() {
        let (mut timer, mut ctx) = dmg_ctx();
        ctx.clock.write_div();

        write_tac(&mut timer, &mut ctx, 0x05);
        // trigger bit 3 of the DIV-aligned clock is high
        ctx.clock.tick_clock_cycles(8);
        assert_eq!(read_tima(&mut timer, &mut ctx), 0);

        ctx.clock.write_div();
        timer.after_div_reset(&mut ctx.clock, &mut ctx.interrupts, &mut ctx.scheduler, &ctx.device);
        assert_eq!(read_tima(&mut timer, &mut ctx), 1);
    }

    #[test]
    fn overflow_raises_the_interrupt_one_machine_cycle_later() {
        let (mut timer, mut ctx) = dmg_ctx();
        ctx.clock.write_div();
        ctx.interrupts.write_if(0x00);

        write_tac(&mut timer, &mut ctx, 0x05);
        write_tima(&mut timer, &mut ctx, 0xFF);

        let clk_irq = ctx.scheduler.cycle_of(EventType::TimerIrq);
        let clk_overflow = timer.clk_timer_zero + (0x100 << timer.clock_shift);
        assert_eq!(clk_irq, clk_overflow + ctx.clock.machine_cycle_clocks());

        ctx.clock.tick_clock_cycles(clk_irq - ctx.clock.cycle());
        assert_eq!(ctx.scheduler.poll(ctx.clock.cycle()), Some(EventType::TimerIrq));
        timer.trigger_interrupt(&mut ctx.clock, &mut ctx.interrupts, &mut ctx.scheduler, &ctx.device);

        assert_eq!(ctx.interrupts.read_if() & 0x04, 0x04);
    }

    #[test]
    fn stopping_the_timer_keeps_tima() {
        let (mut timer, mut ctx) = dmg_ctx();
        ctx.clock.write_div();

        write_tac(&mut timer, &mut ctx, 0x05);
        ctx.clock.tick_clock_cycles(16 * 5);
        write_tac(&mut timer, &mut ctx, 0x01); // disable

        assert_eq!(timer.clk_timer_zero, NO_CYCLE);
        assert_eq!(ctx.scheduler.cycle_of(EventType::TimerIrq), NO_CYCLE);
        let tima = read_tima(&mut timer, &mut ctx);
        ctx.clock.tick_clock_cycles(1024);
        assert_eq!(read_tima(&mut timer, &mut ctx), tima);
    }
}
