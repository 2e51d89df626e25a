use crate::hardware::apu::{Apu, APU_REGISTERS_END, APU_REGISTERS_START};
use crate::hardware::cartridge::CartridgeHeader;
use crate::hardware::clock::{Clock, NO_CYCLE};
use crate::hardware::device::DeviceProfile;
use crate::hardware::memory::Memory;
use crate::hardware::ppu::{ColorsHint, Ppu};
use crate::io::interrupts::Interrupts;
use crate::io::joypad::Joypad;
use crate::io::serial::Serial;
use crate::io::timer::Timer;
use crate::logging::{LogCategories, Logger};
use crate::scheduler::{EventType, Scheduler};

mod dma;

pub const P1_REGISTER: u16 = 0xFF00;
pub const SIO_DATA: u16 = 0xFF01;
pub const SIO_CONT: u16 = 0xFF02;
pub const DIVIDER_REGISTER: u16 = 0xFF04;
pub const TIMER_COUNTER: u16 = 0xFF05;
pub const TIMER_MODULO: u16 = 0xFF06;
pub const TIMER_CONTROL: u16 = 0xFF07;
pub const INTERRUPTS_FLAG: u16 = 0xFF0F;
pub const LCD_CONTROL: u16 = 0xFF40;
pub const LCD_STATUS: u16 = 0xFF41;
pub const SCY_REGISTER: u16 = 0xFF42;
pub const SCX_REGISTER: u16 = 0xFF43;
pub const LY_REGISTER: u16 = 0xFF44;
pub const LYC_REGISTER: u16 = 0xFF45;
pub const DMA_TRANSFER: u16 = 0xFF46;
pub const BG_PALETTE: u16 = 0xFF47;
pub const OB_PALETTE_0: u16 = 0xFF48;
pub const OB_PALETTE_1: u16 = 0xFF49;
pub const WY_REGISTER: u16 = 0xFF4A;
pub const WX_REGISTER: u16 = 0xFF4B;
pub const CGB_KEY1: u16 = 0xFF4D;
pub const CGB_VRAM_BANK: u16 = 0xFF4F;
pub const CGB_HDMA_1: u16 = 0xFF51;
pub const CGB_HDMA_2: u16 = 0xFF52;
pub const CGB_HDMA_3: u16 = 0xFF53;
pub const CGB_HDMA_4: u16 = 0xFF54;
pub const CGB_HDMA_5: u16 = 0xFF55;
pub const CGB_RP: u16 = 0xFF56;
pub const CGB_BCPS: u16 = 0xFF68;
pub const CGB_BCPD: u16 = 0xFF69;
pub const CGB_OCPS: u16 = 0xFF6A;
pub const CGB_OCPD: u16 = 0xFF6B;
pub const CGB_UN6C: u16 = 0xFF6C;
pub const CGB_WRAM_BANK: u16 = 0xFF70;
pub const CGB_UN72: u16 = 0xFF72;
pub const CGB_UN73: u16 = 0xFF73;
pub const CGB_UN75: u16 = 0xFF75;
pub const CGB_PCM12: u16 = 0xFF76;
pub const CGB_PCM34: u16 = 0xFF77;
pub const INTERRUPTS_ENABLE: u16 = 0xFFFF;

pub const INVALID_READ: u8 = 0xFF;

/// Post-boot high ram (0xFF80 - 0xFFFE) contents, distinct per device.
#[rustfmt::skip]
const DMG_FF80_DUMP: [u8; 0x80] = [
    0x2B, 0x0B, 0x64, 0x2F, 0xAF, 0x15, 0x60, 0x6D, 0x61, 0x4E, 0xAC, 0x45, 0x0F, 0xDA, 0x92, 0xF3,
    0x83, 0x38, 0xE4, 0x4E, 0xA7, 0x6C, 0x38, 0x58, 0xBE, 0xEA, 0xE5, 0x81, 0xB4, 0xCB, 0xBF, 0x7B,
    0x59, 0xAD, 0x50, 0x13, 0x5E, 0xF6, 0xB3, 0xC1, 0xDC, 0xDF, 0x9E, 0x68, 0xD7, 0x59, 0x26, 0xF3,
    0x62, 0x54, 0xF8, 0x36, 0xB7, 0x78, 0x6A, 0x22, 0xA7, 0xDD, 0x88, 0x15, 0xCA, 0x96, 0x39, 0xD3,
    0xE6, 0x55, 0x6E, 0xEA, 0x90, 0x76, 0xB8, 0xFF, 0x50, 0xCD, 0xB5, 0x1B, 0x1F, 0xA5, 0x4D, 0x2E,
    0xB4, 0x09, 0x47, 0x8A, 0xC4, 0x5A, 0x8C, 0x4E, 0xE7, 0x29, 0x50, 0x88, 0xA8, 0x66, 0x85, 0x4B,
    0xAA, 0x38, 0xE7, 0x6B, 0x45, 0x3E, 0x30, 0x37, 0xBA, 0xC5, 0x31, 0xF2, 0x71, 0xB4, 0xCF, 0x29,
    0xBC, 0x7F, 0x7E, 0xD0, 0xC7, 0xC3, 0xBD, 0xCF, 0x59, 0xEA, 0x39, 0x01, 0x2E, 0x00, 0x69, 0x00,
];

#[rustfmt::skip]
const CGB_FF80_DUMP: [u8; 0x80] = [
    0xCE, 0xED, 0x66, 0x66, 0xCC, 0x0D, 0x00, 0x0B, 0x03, 0x73, 0x00, 0x83, 0x00, 0x0C, 0x00, 0x0D,
    0x00, 0x08, 0x11, 0x1F, 0x88, 0x89, 0x00, 0x0E, 0xDC, 0xCC, 0x6E, 0xE6, 0xDD, 0xDD, 0xD9, 0x99,
    0xBB, 0xBB, 0x67, 0x63, 0x6E, 0x0E, 0xEC, 0xCC, 0xDD, 0xDC, 0x99, 0x9F, 0xBB, 0xB9, 0x33, 0x3E,
    0x45, 0xEC, 0x42, 0xFA, 0x08, 0xB7, 0x07, 0x5D, 0x01, 0xF5, 0xC0, 0xFF, 0x08, 0xFC, 0x00, 0xE5,
    0x0B, 0xF8, 0xC2, 0xCA, 0xF4, 0xF9, 0x0D, 0x7F, 0x44, 0x6D, 0x19, 0xFE, 0x46, 0x97, 0x33, 0x5E,
    0x08, 0xFF, 0xD1, 0xFF, 0xC6, 0x8B, 0x24, 0x74, 0x12, 0xFC, 0x00, 0x9F, 0x94, 0xB7, 0x06, 0xD5,
    0x40, 0x7A, 0x20, 0x9E, 0x04, 0x5F, 0x41, 0x2F, 0x3D, 0x77, 0x36, 0x75, 0x81, 0x8A, 0x70, 0x3A,
    0x98, 0xD1, 0x71, 0x02, 0x4D, 0x01, 0xC1, 0xFF, 0x0D, 0x00, 0xD3, 0x05, 0xF9, 0x00, 0x0B, 0x00,
];

/// The unusable region 0xFEA0 - 0xFEFF on CGB is built from this 24 byte
/// source: each 8 byte group is written four times per 32 byte row.
#[rustfmt::skip]
const CGB_SPARSE_FEA0_DUMP: [u8; 24] = [
    0x08, 0x01, 0xEF, 0xDE, 0x06, 0x4A, 0xCD, 0xBD,
    0x00, 0x90, 0xF7, 0x7F, 0xC0, 0xB1, 0xBC, 0xFB,
    0x24, 0x13, 0xFD, 0x3A, 0x10, 0x10, 0xAD, 0x45,
];

/// Memory-mapped read/write dispatch plus everything that needs the
/// whole machine in one place: event draining, OAM DMA and HDMA/GDMA.
///
/// The bus owns all components; peripherals receive the clock, scheduler
/// and interrupt controller as explicit arguments per call.
pub struct Bus {
    pub device: DeviceProfile,
    pub clock: Clock,
    pub scheduler: Scheduler,
    pub logger: Logger,
    pub interrupts: Interrupts,
    pub memory: Memory,
    pub timer: Timer,
    pub serial: Serial,
    pub joypad: Joypad,
    pub ppu: Ppu,
    pub apu: Apu,

    /// 0xFE00 - 0xFFFF; the OAM and I/O slots in here stay unused, the
    /// uniform indexing keeps the address decoding simple.
    high_ram: [u8; 0x200],
    rp: u8,
    un6c: u8,
    un72: u8,
    un73: u8,
    un75: u8,

    oam_dma_byte: u8,
    oam_dma_active: bool,
    oam_dma_address: i32,
    oam_dma_offset: i32,
    oam_dma_last_cycle: i32,

    hdma5: u8,
    dma_source: i32,
    dma_destination: i32,
    hdma_active: bool,
    during_dma: bool,
}

impl Bus {
    pub fn new(rom: &[u8], header: &CartridgeHeader, device: DeviceProfile, colors: ColorsHint, log_categories: LogCategories) -> Self {
        let clock = Clock::new(&device);
        let mut scheduler = Scheduler::new();
        let memory = Memory::new(rom, header, device.is_cgb_hardware());
        let ppu = Ppu::new(&clock, &mut scheduler, &device, colors);
        let apu = Apu::new(&clock);

        let mut high_ram = [0u8; 0x200];
        let ff80_dump = if device.is_cgb_hardware() {
            &CGB_FF80_DUMP
        } else {
            &DMG_FF80_DUMP
        };
        high_ram[0x180..].copy_from_slice(ff80_dump);

        if device.is_cgb_hardware() {
            for row in 0..3 {
                let src = &CGB_SPARSE_FEA0_DUMP[row * 8..row * 8 + 8];
                let dst = 0xA0 + row * 0x20;
                for quad in 0..4 {
                    high_ram[dst + quad * 8..dst + quad * 8 + 8].copy_from_slice(src);
                }
            }
        }

        Bus {
            joypad: Joypad::new(&device),
            interrupts: Interrupts::new(),
            timer: Timer::new(),
            serial: Serial::new(),
            logger: Logger::new(log_categories),
            oam_dma_byte: if device.is_cgb_hardware() { 0x00 } else { 0xFF },
            oam_dma_active: false,
            oam_dma_address: 0,
            oam_dma_offset: 0,
            oam_dma_last_cycle: NO_CYCLE,
            hdma5: 0xFF,
            dma_source: 0,
            dma_destination: 0,
            hdma_active: false,
            during_dma: false,
            high_ram,
            rp: 0x3E,
            un6c: 0xFE,
            un72: 0,
            un73: 0,
            un75: 0x8F,
            device,
            clock,
            scheduler,
            memory,
            ppu,
            apu,
        }
    }

    pub fn read_byte(&mut self, address: u16) -> u8 {
        if address & 0xE000 == 0x8000 {
            if !self.ppu.vram_accessible(&self.clock) {
                self.log(LogCategories::LCD, format!("read VRAM [{:#06X}] blocked", address));
                return INVALID_READ;
            }
            return self.memory.read_byte(address);
        }
        if address < 0xFE00 {
            return self.memory.read_byte(address);
        }
        // 0xFE00 - 0xFE9F : object attribute memory
        if address < 0xFEA0 {
            self.handle_events();
            if self.oam_dma_active {
                self.log(LogCategories::LCD, format!("read OAM[{:#04X}] blocked by OAM DMA", address - 0xFE00));
                return INVALID_READ;
            }
            return self.ppu.read_oam((address - 0xFE00) as usize);
        }
        // 0xFEA0 - 0xFEFF and 0xFF80 - 0xFFFF : high ram & IE
        if address & 0x0180 != 0x0100 {
            self.handle_events();
            if address == INTERRUPTS_ENABLE {
                return self.interrupts.read_ie();
            }
            return self.high_ram[(address - 0xFE00) as usize];
        }
        // 0xFF00 - 0xFF7F : i/o ports
        self.handle_events();
        self.read_io_byte(address)
    }

    fn read_io_byte(&mut self, address: u16) -> u8 {
        let mut result = match address {
            P1_REGISTER => self.joypad.read_p1(),
            SIO_DATA => self.serial.read_sb(&mut self.clock, &mut self.interrupts, &mut self.scheduler, &self.device),
            SIO_CONT => self.serial.read_sc(&self.device),
            DIVIDER_REGISTER => self.clock.read_div(),
            TIMER_COUNTER => {
                self.timer
                    .read_tima(&mut self.clock, &mut self.interrupts, &mut self.scheduler, &self.device)
            }
            TIMER_MODULO => self.timer.read_tma(),
            TIMER_CONTROL => self.timer.read_tac(),
            INTERRUPTS_FLAG => self.interrupts.read_if(),
            APU_REGISTERS_START..=APU_REGISTERS_END => self.apu.read_register(address),
            LCD_CONTROL => self.ppu.read_lcdc(),
            LCD_STATUS => self.ppu.read_stat(&self.clock),
            SCY_REGISTER => self.ppu.read_scy(),
            SCX_REGISTER => self.ppu.read_scx(),
            LY_REGISTER => self.ppu.read_ly(&self.clock),
            LYC_REGISTER => self.ppu.read_lyc(),
            DMA_TRANSFER => self.oam_dma_byte,
            BG_PALETTE => self.ppu.read_bgp(),
            OB_PALETTE_0 => self.ppu.read_obp0(),
            OB_PALETTE_1 => self.ppu.read_obp1(),
            WY_REGISTER => self.ppu.read_wy(),
            WX_REGISTER => self.ppu.read_wx(),
            _ => INVALID_READ,
        };

        if self.device.cgb_mode() {
            result = match address {
                CGB_KEY1 => self.clock.read_key1(),
                CGB_VRAM_BANK => self.memory.read_vbk(),
                CGB_HDMA_5 => self.hdma5,
                CGB_RP => self.rp,
                CGB_BCPS => self.ppu.read_bcps(),
                CGB_BCPD => self.ppu.read_bcpd(),
                CGB_OCPS => self.ppu.read_ocps(),
                CGB_OCPD => self.ppu.read_ocpd(),
                CGB_UN6C => self.un6c,
                CGB_WRAM_BANK => self.memory.read_svbk(),
                CGB_UN72 => self.un72,
                CGB_UN73 => self.un73,
                CGB_UN75 => self.un75,
                CGB_PCM12 => self.apu.read_pcm12(),
                CGB_PCM34 => self.apu.read_pcm34(),
                _ => result,
            };
        } else if self.device.cgb_in_dmg_mode() {
            // a limited register subset still responds on CGB hardware
            // running in DMG compatibility mode
            result = match address {
                CGB_VRAM_BANK => 0xFE,
                CGB_BCPS => 0xC8,
                CGB_OCPS => 0xD0,
                CGB_UN72 => self.un72,
                CGB_UN73 => self.un73,
                CGB_UN75 => self.un75,
                CGB_PCM12 => self.apu.read_pcm12(),
                CGB_PCM34 => self.apu.read_pcm34(),
                _ => result,
            };
        }

        result
    }

    pub fn write_byte(&mut self, address: u16, byte: u8) {
        if address & 0xE000 == 0x8000 {
            if !self.ppu.vram_accessible(&self.clock) {
                self.log(
                    LogCategories::LCD,
                    format!("write VRAM [{:#06X}] = {:#04X} blocked", address, byte),
                );
                return;
            }
            self.memory.write_byte(address, byte);
            return;
        }
        if address < 0xFE00 {
            self.memory.write_byte(address, byte);
            return;
        }
        // 0xFE00 - 0xFE9F : object attribute memory
        if address < 0xFEA0 {
            self.handle_events();
            if self.oam_dma_active {
                self.log(
                    LogCategories::LCD,
                    format!("write OAM[{:#04X}] = {:#04X} blocked by OAM DMA", address - 0xFE00, byte),
                );
                return;
            }
            self.ppu.write_oam((address - 0xFE00) as usize, byte);
            return;
        }
        // 0xFEA0 - 0xFEFF and 0xFF80 - 0xFFFF : high ram & IE
        if address & 0x0180 != 0x0100 {
            if address == INTERRUPTS_ENABLE {
                self.handle_events();
                self.interrupts.write_ie(byte);
            } else {
                self.high_ram[(address - 0xFE00) as usize] = byte;
            }
            return;
        }
        // 0xFF00 - 0xFF7F : i/o ports
        self.handle_events();
        self.write_io_byte(address, byte);
    }

    fn write_io_byte(&mut self, address: u16, byte: u8) {
        match address {
            P1_REGISTER => self
                .joypad
                .write_p1(byte, &mut self.interrupts, &mut self.clock, &self.device),
            SIO_DATA => self.serial.write_sb(byte),
            SIO_CONT => self.serial.write_sc(byte, &self.clock, &mut self.scheduler, &self.device),
            DIVIDER_REGISTER => self.reset_div(false),
            TIMER_COUNTER => {
                self.timer
                    .write_tima(byte, &mut self.clock, &mut self.interrupts, &mut self.scheduler, &self.device)
            }
            TIMER_MODULO => {
                self.timer
                    .write_tma(byte, &mut self.clock, &mut self.interrupts, &mut self.scheduler, &self.device)
            }
            TIMER_CONTROL => {
                self.timer
                    .write_tac(byte, &mut self.clock, &mut self.interrupts, &mut self.scheduler, &self.device)
            }
            INTERRUPTS_FLAG => self.interrupts.write_if(byte),
            APU_REGISTERS_START..=APU_REGISTERS_END => self.apu.write_register(address, byte),
            LCD_CONTROL => self.ppu.write_lcdc(byte, &self.clock, &mut self.scheduler),
            LCD_STATUS => self.ppu.write_stat(byte, &self.clock, &mut self.scheduler),
            SCY_REGISTER => self.ppu.write_scy(byte),
            SCX_REGISTER => self.ppu.write_scx(byte),
            LY_REGISTER => {} // read-only
            LYC_REGISTER => self.ppu.write_lyc(byte, &self.clock, &mut self.scheduler),
            DMA_TRANSFER => self.write_dma(byte),
            BG_PALETTE => self.ppu.write_bgp(byte),
            OB_PALETTE_0 => self.ppu.write_obp0(byte),
            OB_PALETTE_1 => self.ppu.write_obp1(byte),
            WY_REGISTER => self.ppu.write_wy(byte),
            WX_REGISTER => self.ppu.write_wx(byte),
            _ => {}
        }

        if self.device.cgb_mode() {
            match address {
                CGB_KEY1 => self.clock.write_key1(byte),
                CGB_VRAM_BANK => self.memory.write_vbk(byte),
                CGB_HDMA_1 => self.dma_source = (self.dma_source & 0xFF) + ((byte as i32) << 8),
                CGB_HDMA_2 => self.dma_source = (self.dma_source & 0xFF00) + (byte & 0xF0) as i32,
                CGB_HDMA_3 => self.dma_destination = (self.dma_destination & 0xFF) + ((byte as i32) << 8),
                CGB_HDMA_4 => self.dma_destination = (self.dma_destination & 0xFF00) + (byte & 0xF0) as i32,
                CGB_HDMA_5 => self.write_hdma5(byte),
                CGB_RP => self.rp = byte | 0x3E,
                CGB_BCPS => self.ppu.write_bcps(byte),
                CGB_BCPD => self.ppu.write_bcpd(byte),
                CGB_OCPS => self.ppu.write_ocps(byte),
                CGB_OCPD => self.ppu.write_ocpd(byte),
                CGB_UN6C => self.un6c = byte | 0xFE,
                CGB_WRAM_BANK => self.memory.write_svbk(byte),
                CGB_UN72 => self.un72 = byte,
                CGB_UN73 => self.un73 = byte,
                CGB_UN75 => self.un75 = byte | 0x8F,
                CGB_PCM12 => self.apu.write_pcm12(byte),
                CGB_PCM34 => self.apu.write_pcm34(byte),
                _ => {}
            }
        } else if self.device.cgb_in_dmg_mode() {
            match address {
                CGB_UN72 => self.un72 = byte,
                CGB_UN73 => self.un73 = byte,
                CGB_UN75 => self.un75 = byte | 0x8F,
                _ => {}
            }
        }
    }

    /// Drain all events scheduled at or before the current clock cycle,
    /// then service a running OAM DMA.
    pub fn handle_events(&mut self) {
        while let Some(event) = self.scheduler.poll(self.clock.cycle()) {
            match event {
                EventType::VblankIrq => {
                    self.ppu
                        .trigger_irq_vblank(&mut self.clock, &mut self.interrupts, &mut self.scheduler, &self.device)
                }
                EventType::LycIrq => {
                    self.ppu
                        .trigger_irq_lyc(&mut self.clock, &mut self.interrupts, &mut self.scheduler, &self.device)
                }
                EventType::Mode2Irq => {
                    self.ppu
                        .trigger_irq_mode2(&mut self.clock, &mut self.interrupts, &mut self.scheduler, &self.device)
                }
                EventType::Mode0Irq => {
                    self.ppu
                        .trigger_irq_mode0(&mut self.clock, &mut self.interrupts, &mut self.scheduler, &self.device)
                }
                EventType::SerialDone => {
                    self.serial
                        .update_state(&mut self.clock, &mut self.interrupts, &mut self.scheduler, &self.device)
                }
                EventType::TimerIrq => {
                    self.timer
                        .trigger_interrupt(&mut self.clock, &mut self.interrupts, &mut self.scheduler, &self.device)
                }
                EventType::Unhalt => self.interrupts.clear_halted(),
                EventType::NextEmptyFrame => self.ppu.next_empty_frame(&mut self.scheduler),
                EventType::OamDmaStart => self.start_oam_dma(),
                EventType::HdmaStart => self.during_dma = true,
            }
        }

        if self.oam_dma_active {
            self.handle_oam_dma();
        }
    }

    /// STOP: reset DIV and, if KEY1 is armed, perform the speed switch.
    pub fn execute_stop(&mut self) {
        self.reset_div(true);

        self.timer
            .update_state(&mut self.clock, &mut self.interrupts, &mut self.scheduler, &self.device);

        if !self.clock.change_speed() {
            return;
        }

        self.ppu.after_speed_change();
        self.apu.after_speed_change();
        self.timer
            .after_speed_change(&mut self.clock, &mut self.interrupts, &mut self.scheduler, &self.device);

        self.clock.tick_speed_change_delay();
    }

    fn reset_div(&mut self, during_stop: bool) {
        self.apu.update_state(&self.clock);
        self.timer
            .update_state(&mut self.clock, &mut self.interrupts, &mut self.scheduler, &self.device);

        self.clock.write_div();
        self.log(LogCategories::CLOCK, "DIV reset".to_owned());

        self.serial
            .after_div_reset(&mut self.clock, &mut self.interrupts, &mut self.scheduler, &self.device);
        self.apu.after_div_reset(during_stop);
        self.timer
            .after_div_reset(&mut self.clock, &mut self.interrupts, &mut self.scheduler, &self.device);
    }

    pub fn set_back_clock(&mut self, cycle_offset: i32) {
        crate::hardware::clock::set_back_cycle(&mut self.oam_dma_last_cycle, cycle_offset);
    }

    pub(crate) fn log(&mut self, category: LogCategories, message: String) {
        if self.logger.is_enabled(category) {
            let clock_cycle = self.clock.cycle();
            self.logger
                .log(category, clock_cycle, clock_cycle + self.clock.div_offset(), message);
        }
    }
}
