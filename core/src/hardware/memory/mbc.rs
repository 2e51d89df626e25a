use crate::hardware::cartridge::MbcKind;
use crate::hardware::memory::Memory;

/// Per-MBC banking state. The variants carry exactly the registers the
/// chip exposes; everything derived (effective bank numbers) lives in the
/// offset table.
#[derive(Debug, Copy, Clone)]
pub enum MbcState {
    None,
    Mbc1 {
        /// 5 bit rom bank register (0x2000 - 0x3FFF); 0 reads as 1.
        bank1: u8,
        /// 2 bit rom/ram bank register (0x4000 - 0x5FFF).
        bank2: u8,
        /// Banking mode select (0x6000 - 0x7FFF): mode 1 lets bank2
        /// affect 0x0000 - 0x3FFF and the ram bank.
        mode1: bool,
    },
    Mbc2,
    Mbc3,
    Mbc5 {
        bank_2000: u8,
        bank_3000: u8,
        rumble: bool,
    },
}

impl MbcState {
    pub fn new(kind: MbcKind) -> Self {
        match kind {
            MbcKind::None => MbcState::None,
            MbcKind::Mbc1 => MbcState::Mbc1 {
                bank1: 1,
                bank2: 0,
                mode1: false,
            },
            MbcKind::Mbc2 => MbcState::Mbc2,
            MbcKind::Mbc3 => MbcState::Mbc3,
            MbcKind::Mbc5 => MbcState::Mbc5 {
                bank_2000: 1,
                bank_3000: 0,
                rumble: false,
            },
            MbcKind::Mbc5Rumble => MbcState::Mbc5 {
                bank_2000: 1,
                bank_3000: 0,
                rumble: true,
            },
        }
    }
}

impl Memory {
    /// Dispatch a write to 0x0000 - 0x7FFF to the cartridge's MBC.
    pub(super) fn write_to_mbc(&mut self, address: u16, value: u8) {
        debug_assert!(address < 0x8000);

        match self.mbc {
            MbcState::None => {
                log::trace!("write to [{:#06X}] = {:#04X} ignored: no MBC configured", address, value);
            }
            MbcState::Mbc1 { bank1, bank2, mode1 } => self.write_to_mbc1(address, value, bank1, bank2, mode1),
            MbcState::Mbc2 => self.write_to_mbc2(address, value),
            MbcState::Mbc3 => self.write_to_mbc3(address, value),
            MbcState::Mbc5 {
                bank_2000,
                bank_3000,
                rumble,
            } => self.write_to_mbc5(address, value, bank_2000, bank_3000, rumble),
        }
    }

    fn write_to_mbc1(&mut self, address: u16, value: u8, mut bank1: u8, mut bank2: u8, mut mode1: bool) {
        match address & 0x6000 {
            0x0000 => {
                self.set_ram_enabled(value);
                return;
            }
            0x2000 => {
                // rom bank 0 cannot be selected directly
                bank1 = if value & 0x1F == 0 { value.wrapping_add(1) } else { value };
            }
            0x4000 => bank2 = value,
            _ => mode1 = value & 0x01 != 0,
        }
        self.mbc = MbcState::Mbc1 { bank1, bank2, mode1 };

        // The value written to 0x4000 switches rom banks independent of
        // the MBC1 mode; mode 1 additionally banks the 0x0000 region and
        // the cartridge ram (verified by mooneye's mbc1/rom_8Mb tests).
        // Multicarts wire only 4 bank1 pins, so bank2 moves up by 4.
        let high_bits = ((bank2 & 0x03) as i32) << if self.mbc1_multicart { 4 } else { 5 };
        let low_rom_bank_id = if mode1 { high_bits } else { 0 };
        let high_rom_bank_id = high_bits + (bank1 & if self.mbc1_multicart { 0x0F } else { 0x1F }) as i32;
        let ram_bank_id = if mode1 { (bank2 & 0x03) as i32 } else { 0 };

        self.set_rom_banks(low_rom_bank_id, high_rom_bank_id);
        self.set_ram_bank(ram_bank_id);
    }

    fn write_to_mbc2(&mut self, address: u16, value: u8) {
        // writes to 0x4000 - 0x7FFF have no effect
        if address >= 0x4000 {
            return;
        }

        // address bit 8 selects rom banking over ram enable
        if address & 0x100 == 0 {
            self.set_ram_enabled(value);
        } else {
            let rom_bank_id = (value & 0x0F) as i32;
            self.set_rom_banks(0, if rom_bank_id == 0 { 1 } else { rom_bank_id });
        }
    }

    fn write_to_mbc3(&mut self, address: u16, value: u8) {
        match address & 0x6000 {
            0x0000 => self.set_ram_enabled(value),
            0x2000 => {
                let rom_bank_id = (value & 0x7F) as i32;
                self.set_rom_banks(0, if rom_bank_id == 0 { 1 } else { rom_bank_id });
            }
            0x4000 => self.set_ram_bank((value & 0x03) as i32),
            _ => {
                // rtc latch request, the wall clock itself is not emulated
            }
        }
    }

    fn write_to_mbc5(&mut self, address: u16, value: u8, mut bank_2000: u8, mut bank_3000: u8, rumble: bool) {
        match address & 0x6000 {
            0x0000 => {
                self.set_ram_enabled(value);
                return;
            }
            0x2000 => {
                if address & 0x1000 == 0 {
                    bank_2000 = value;
                } else {
                    bank_3000 = value;
                }
                self.mbc = MbcState::Mbc5 {
                    bank_2000,
                    bank_3000,
                    rumble,
                };
                self.set_rom_banks(0, (((bank_3000 & 0x01) as i32) << 8) + bank_2000 as i32);
            }
            0x4000 => {
                // rumble carts use bit 3 for the motor, keep it away from
                // the ram bank number
                let value = if rumble { value & 0x07 } else { value };
                self.set_ram_bank((value & 0x0F) as i32);
            }
            _ => {}
        }
    }
}
