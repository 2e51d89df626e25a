pub mod emulator;
pub mod hardware;
pub mod io;
pub mod logging;
pub mod scheduler;

pub use crate::emulator::{Emulator, EmulatorError};
pub use crate::hardware::apu::StereoFrame;
pub use crate::hardware::device::DeviceType;
pub use crate::hardware::ppu::{ColorsHint, Pixel};
pub use crate::logging::{LogCategories, LogEntry};

/// The 4 MHz master clock frequency shared by every component.
pub const CYCLES_PER_SECOND: i32 = 4_194_304;

/// Construction parameters for the [`Emulator`].
#[derive(Debug)]
pub struct EmulatorOptions {
    pub device_type: DeviceType,
    pub colors: ColorsHint,
    pub log_categories: LogCategories,
    pub saved_ram: Option<Vec<u8>>,
}

#[derive(Debug)]
pub struct EmulatorOptionsBuilder {
    device_type: DeviceType,
    colors: ColorsHint,
    log_categories: LogCategories,
    saved_ram: Option<Vec<u8>>,
}

impl EmulatorOptionsBuilder {
    pub fn new() -> Self {
        EmulatorOptionsBuilder {
            device_type: DeviceType::Auto,
            colors: ColorsHint::Default,
            log_categories: LogCategories::empty(),
            saved_ram: None,
        }
    }

    pub fn device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = device_type;
        self
    }

    pub fn colors(mut self, colors: ColorsHint) -> Self {
        self.colors = colors;
        self
    }

    pub fn log_categories(mut self, log_categories: LogCategories) -> Self {
        self.log_categories = log_categories;
        self
    }

    pub fn saved_ram(mut self, saved_ram: Option<Vec<u8>>) -> Self {
        self.saved_ram = saved_ram;
        self
    }

    pub fn build(self) -> EmulatorOptions {
        EmulatorOptions {
            device_type: self.device_type,
            colors: self.colors,
            log_categories: self.log_categories,
            saved_ram: self.saved_ram,
        }
    }
}

impl Default for EmulatorOptionsBuilder {
    fn default() -> Self {
        EmulatorOptionsBuilder::new()
    }
}
