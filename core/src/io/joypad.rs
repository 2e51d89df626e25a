use crate::hardware::clock::Clock;
use crate::hardware::device::DeviceProfile;
use crate::io::interrupts::{Interrupt, Interrupts};

const P14_SELECT_DIRECTIONS: u8 = 0x10;
const P15_SELECT_ACTIONS: u8 = 0x20;

/// The P1 joypad port.
///
/// Two internal 4 bit registers hold the direction (P14) and action (P15)
/// button states, 1 = released. Writing P1 selects which group is exposed
/// in the low nibble; any change of the exposed bits raises the joypad
/// interrupt (the hardware fires on the rising edge too).
#[derive(Debug)]
pub struct Joypad {
    p1: u8,
    p14: u8,
    p15: u8,
}

/// Button bit positions in the caller-facing mask:
/// 0 right, 1 left, 2 up, 3 down, 4 A, 5 B, 6 select, 7 start.
impl Joypad {
    pub fn new(device: &DeviceProfile) -> Self {
        Joypad {
            p1: if device.is_cgb_hardware() { 0xFF } else { 0xCF },
            p14: 0x0F,
            p15: 0x0F,
        }
    }

    pub fn read_p1(&self) -> u8 {
        self.p1
    }

    pub fn write_p1(&mut self, byte: u8, interrupts: &mut Interrupts, clock: &mut Clock, device: &DeviceProfile) {
        debug_assert!(self.p14 <= 0x0F);
        debug_assert!(self.p15 <= 0x0F);
        let mut byte = byte | 0x0F;

        if byte & P14_SELECT_DIRECTIONS == 0 {
            byte &= 0xF0 | self.p14;
        }
        if byte & P15_SELECT_ACTIONS == 0 {
            byte &= 0xF0 | self.p15;
        }

        if (self.p1 ^ byte) & 0x0F != 0 {
            // cycle 0: never counts as "fresh" for the HALT wake-up delay
            interrupts.trigger(Interrupt::Joypad, 0, clock, device);
        }

        self.p1 = byte | 0xC0;
    }

    pub fn set_buttons_down(&mut self, buttons: u8, interrupts: &mut Interrupts, clock: &mut Clock, device: &DeviceProfile) {
        if buttons != 0 {
            self.p14 &= !(buttons & 0x0F);
            self.p15 &= !((buttons >> 4) & 0x0F);
            self.write_p1(self.p1, interrupts, clock, device);
        }
    }

    pub fn set_buttons_up(&mut self, buttons: u8, interrupts: &mut Interrupts, clock: &mut Clock, device: &DeviceProfile) {
        if buttons != 0 {
            self.p14 |= buttons & 0x0F;
            self.p15 |= (buttons >> 4) & 0x0F;
            self.write_p1(self.p1, interrupts, clock, device);
        }
    }
}
