/// The hardware revision the caller wants to emulate.
///
/// `Auto` picks CGB-E hardware, which runs both CGB and plain DMG
/// cartridges (the latter in CGB-in-DMG compatibility mode).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeviceType {
    Auto,
    Dmg,
    CgbAbcd,
    CgbE,
}

/// Immutable facts derived from the cartridge and the chosen hardware.
///
/// Everything timing-sensitive in the core keys off these three
/// predicates, so they are computed once at construction.
#[derive(Debug, Copy, Clone)]
pub struct DeviceProfile {
    device_type: DeviceType,
    cgb_flagged_cartridge: bool,
}

impl DeviceProfile {
    pub fn new(rom: &[u8], device_type: DeviceType) -> Self {
        let device_type = match device_type {
            DeviceType::Auto => DeviceType::CgbE,
            explicit => explicit,
        };
        DeviceProfile {
            device_type,
            cgb_flagged_cartridge: read_cgb_flag(rom),
        }
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// CGB hardware, regardless of the cartridge in the slot.
    pub fn is_cgb_hardware(&self) -> bool {
        matches!(self.device_type, DeviceType::CgbAbcd | DeviceType::CgbE)
    }

    pub fn is_dmg_device(&self) -> bool {
        !self.is_cgb_hardware()
    }

    /// CGB hardware running a CGB cartridge: all CGB features active.
    pub fn cgb_mode(&self) -> bool {
        self.is_cgb_hardware() && self.cgb_flagged_cartridge
    }

    /// CGB hardware running a plain DMG cartridge.
    pub fn cgb_in_dmg_mode(&self) -> bool {
        self.is_cgb_hardware() && !self.cgb_flagged_cartridge
    }
}

fn read_cgb_flag(rom: &[u8]) -> bool {
    matches!(rom.get(0x143), Some(0x80) | Some(0xC0))
}
