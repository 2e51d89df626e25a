use std::str::from_utf8;

pub const HEADER_START: usize = 0x0100;
pub const HEADER_END: usize = 0x014F;

/// The memory bank controller soldered onto the cartridge.
///
/// Unknown cartridge types degrade to `None` (32 KiB ROM, no banking).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MbcKind {
    None,
    Mbc1,
    Mbc2,
    Mbc3,
    Mbc5,
    Mbc5Rumble,
}

/// The decoded cartridge header.
#[derive(Debug, Clone)]
pub struct CartridgeHeader {
    /// Upper case ASCII, 16 characters, zero filled if less than that.
    pub title: [u8; 16],
    /// 0x80/0xC0 at 0x0143 marks a CGB-aware cartridge.
    pub cgb_flag: bool,
    /// Specifies which Memory Bank Controller (if any) is used in the
    /// cartridge, and if further external hardware exists in the cartridge.
    pub mbc: MbcKind,
    /// Number of 16 KiB ROM banks, always a power of two in 2..=512.
    pub rom_banks: u16,
    /// Number of 8 KiB cartridge RAM banks (0, 1, 4, 8 or 16).
    pub ram_banks: u16,
    /// Battery-buffered cartridge RAM survives power-off; only then is
    /// persistent RAM exposed by the emulator.
    pub has_battery: bool,
}

impl CartridgeHeader {
    pub fn new(rom: &[u8]) -> Self {
        let mut title = [0u8; 16];
        for (i, byte) in title.iter_mut().enumerate() {
            *byte = safe_get(rom, 0x134 + i);
        }

        let cartridge_type = safe_get(rom, 0x147);

        CartridgeHeader {
            title,
            cgb_flag: matches!(safe_get(rom, 0x143), 0x80 | 0xC0),
            mbc: read_mbc_kind(cartridge_type),
            rom_banks: read_rom_banks(safe_get(rom, 0x148)),
            ram_banks: read_ram_banks(safe_get(rom, 0x149)),
            has_battery: read_battery(cartridge_type),
        }
    }

    /// The title as a string, for display purposes only.
    pub fn title_string(&self) -> String {
        from_utf8(&self.title)
            .unwrap_or("")
            .trim_matches(char::from(0))
            .to_owned()
    }
}

fn safe_get(rom: &[u8], offset: usize) -> u8 {
    rom.get(offset).copied().unwrap_or(0)
}

fn read_mbc_kind(cartridge_type: u8) -> MbcKind {
    match cartridge_type {
        0x01..=0x03 => MbcKind::Mbc1,
        0x05 | 0x06 => MbcKind::Mbc2,
        0x0F..=0x13 => MbcKind::Mbc3,
        0x19..=0x1B => MbcKind::Mbc5,
        0x1C..=0x1E => MbcKind::Mbc5Rumble,
        _ => MbcKind::None,
    }
}

fn read_rom_banks(rom_size: u8) -> u16 {
    match rom_size {
        0x01 => 4,
        0x02 => 8,
        0x03 => 16,
        0x04 => 32,
        0x05 => 64,
        0x06 => 128,
        0x07 => 256,
        0x08 => 512,
        _ => 2,
    }
}

fn read_ram_banks(ram_size: u8) -> u16 {
    match ram_size {
        // 0x01 is actually only 2048 bytes, but one whole bank is easier
        // to handle
        0x01 | 0x02 => 1,
        0x03 => 4,
        0x04 => 16,
        0x05 => 8,
        _ => 0,
    }
}

fn read_battery(cartridge_type: u8) -> bool {
    matches!(cartridge_type, 0x03 | 0x06 | 0x09 | 0x0D | 0x13 | 0x1B | 0x1E)
}
