use std::{fmt, fs, io, path::Path};

use thiserror::Error;

use crate::memory::MemoryDevice;

const HEADER_END: usize = 0x0150;
const ROM_BANK_SIZE: usize = 0x4000;
const RAM_BANK_SIZE: usize = 0x2000;

#[derive(Debug, Error)]
pub enum CartridgeError {
    #[error("failed to read ROM: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
    #[error("ROM image is {len} bytes, too small to hold a cartridge header")]
    TooSmall { len: usize },
    #[error("unsupported ROM size code {code:#04X}")]
    UnsupportedRomSize { code: u8 },
}

/// Cartridge header fields at 0x0134-0x014F.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub title: String,
    pub cgb_flag: u8,
    pub new_licensee: [u8; 2],
    pub sgb_flag: u8,
    pub cart_type: u8,
    pub rom_size_code: u8,
    pub ram_size_code: u8,
    pub destination: u8,
    pub old_licensee: u8,
    pub version: u8,
    pub header_checksum: u8,
    pub global_checksum: u16,
    /// Header checksum recomputed over 0x0134-0x014C.
    pub computed_header_checksum: u8,
    /// Global checksum recomputed over the whole image.
    pub computed_global_checksum: u16,
}

impl Header {
    pub fn parse(rom: &[u8]) -> Result<Self, CartridgeError> {
        if rom.len() < HEADER_END {
            return Err(CartridgeError::TooSmall { len: rom.len() });
        }
        let mut title = &rom[0x0134..0x0144];
        if let Some(pos) = title.iter().position(|&b| b == 0) {
            title = &title[..pos];
        }
        Ok(Self {
            title: String::from_utf8_lossy(title).trim().to_string(),
            cgb_flag: rom[0x0143],
            new_licensee: [rom[0x0144], rom[0x0145]],
            sgb_flag: rom[0x0146],
            cart_type: rom[0x0147],
            rom_size_code: rom[0x0148],
            ram_size_code: rom[0x0149],
            destination: rom[0x014A],
            old_licensee: rom[0x014B],
            version: rom[0x014C],
            header_checksum: rom[0x014D],
            global_checksum: u16::from_be_bytes([rom[0x014E], rom[0x014F]]),
            computed_header_checksum: header_checksum(rom),
            computed_global_checksum: global_checksum(rom),
        })
    }

    pub fn header_checksum_ok(&self) -> bool {
        self.header_checksum == self.computed_header_checksum
    }

    pub fn global_checksum_ok(&self) -> bool {
        self.global_checksum == self.computed_global_checksum
    }

    /// ROM size in bytes, or `None` for codes outside 0x00-0x08.
    pub fn rom_size(&self) -> Option<usize> {
        (self.rom_size_code <= 0x08).then(|| (32 * 1024) << self.rom_size_code)
    }

    pub fn ram_size(&self) -> usize {
        match self.ram_size_code {
            0x01 => 0x800,
            0x02 => 0x2000,
            0x03 => 0x8000,
            0x04 => 0x20000,
            0x05 => 0x10000,
            _ => 0,
        }
    }

    pub fn cart_type_name(&self) -> &'static str {
        cart_type_name(self.cart_type)
    }

    pub fn rom_size_name(&self) -> &'static str {
        match self.rom_size_code {
            0x00 => "32 KiB",
            0x01 => "64 KiB",
            0x02 => "128 KiB",
            0x03 => "256 KiB",
            0x04 => "512 KiB",
            0x05 => "1 MiB",
            0x06 => "2 MiB",
            0x07 => "4 MiB",
            0x08 => "8 MiB",
            _ => "unknown",
        }
    }

    pub fn ram_size_name(&self) -> &'static str {
        match self.ram_size_code {
            0x00 => "none",
            0x01 => "2 KiB",
            0x02 => "8 KiB",
            0x03 => "32 KiB",
            0x04 => "128 KiB",
            0x05 => "64 KiB",
            _ => "unknown",
        }
    }

    pub fn destination_name(&self) -> &'static str {
        match self.destination {
            0x00 => "Japan",
            0x01 => "Overseas",
            _ => "unknown",
        }
    }
}

fn cart_type_name(code: u8) -> &'static str {
    match code {
        0x00 => "ROM ONLY",
        0x01 => "MBC1",
        0x02 => "MBC1+RAM",
        0x03 => "MBC1+RAM+BATTERY",
        0x05 => "MBC2",
        0x06 => "MBC2+BATTERY",
        0x08 => "ROM+RAM",
        0x09 => "ROM+RAM+BATTERY",
        0x0B => "MMM01",
        0x0C => "MMM01+RAM",
        0x0D => "MMM01+RAM+BATTERY",
        0x0F => "MBC3+TIMER+BATTERY",
        0x10 => "MBC3+TIMER+RAM+BATTERY",
        0x11 => "MBC3",
        0x12 => "MBC3+RAM",
        0x13 => "MBC3+RAM+BATTERY",
        0x19 => "MBC5",
        0x1A => "MBC5+RAM",
        0x1B => "MBC5+RAM+BATTERY",
        0x1C => "MBC5+RUMBLE",
        0x1D => "MBC5+RUMBLE+RAM",
        0x1E => "MBC5+RUMBLE+RAM+BATTERY",
        0x20 => "MBC6",
        0x22 => "MBC7+SENSOR+RUMBLE+RAM+BATTERY",
        0xFC => "POCKET CAMERA",
        0xFD => "BANDAI TAMA5",
        0xFE => "HuC3",
        0xFF => "HuC1+RAM+BATTERY",
        _ => "unknown",
    }
}

/// `x = x - rom[i] - 1` over 0x0134..=0x014C.
pub fn header_checksum(rom: &[u8]) -> u8 {
    rom.get(0x0134..=0x014C)
        .unwrap_or_default()
        .iter()
        .fold(0u8, |x, &b| x.wrapping_sub(b).wrapping_sub(1))
}

/// 16-bit sum of every byte except the checksum itself.
pub fn global_checksum(rom: &[u8]) -> u16 {
    rom.iter()
        .enumerate()
        .filter(|(i, _)| !matches!(i, 0x014E | 0x014F))
        .fold(0u16, |sum, (_, &b)| sum.wrapping_add(b as u16))
}

/// Bank-switching controller.
///
/// The mapper owns only its control registers; ROM and RAM storage belong to
/// the [`Cartridge`] and are passed in on every access.
pub trait Mapper: Send + fmt::Debug {
    fn name(&self) -> &'static str;
    fn read_rom(&self, rom: &[u8], addr: u16) -> u8;
    /// Writes to 0x0000-0x7FFF.
    fn write_control(&mut self, addr: u16, val: u8);
    fn read_ram(&self, ram: &[u8], addr: u16) -> u8;
    fn write_ram(&mut self, ram: &mut [u8], addr: u16, val: u8);
}

/// 32 KiB ROM with optional unbanked RAM.
#[derive(Debug, Default)]
pub struct RomOnly;

impl Mapper for RomOnly {
    fn name(&self) -> &'static str {
        "ROM ONLY"
    }

    fn read_rom(&self, rom: &[u8], addr: u16) -> u8 {
        rom.get(addr as usize).copied().unwrap_or(0xFF)
    }

    fn write_control(&mut self, _addr: u16, _val: u8) {}

    fn read_ram(&self, ram: &[u8], addr: u16) -> u8 {
        ram.get(addr as usize - 0xA000).copied().unwrap_or(0xFF)
    }

    fn write_ram(&mut self, ram: &mut [u8], addr: u16, val: u8) {
        if let Some(b) = ram.get_mut(addr as usize - 0xA000) {
            *b = val;
        }
    }
}

#[derive(Debug)]
pub struct Mbc1 {
    rom_bank: u8,
    ram_bank: u8,
    mode: u8,
    ram_enable: bool,
}

impl Mbc1 {
    pub fn new() -> Self {
        Self {
            rom_bank: 1,
            ram_bank: 0,
            mode: 0,
            ram_enable: false,
        }
    }

    fn ram_index(&self, ram: &[u8], addr: u16) -> usize {
        let offset = addr as usize - 0xA000;
        let banks = ram.len().div_ceil(RAM_BANK_SIZE);
        if self.mode == 0 || banks == 0 {
            offset
        } else {
            (self.ram_bank as usize % banks) * RAM_BANK_SIZE + offset
        }
    }
}

impl Default for Mbc1 {
    fn default() -> Self {
        Self::new()
    }
}

impl Mapper for Mbc1 {
    fn name(&self) -> &'static str {
        "MBC1"
    }

    fn read_rom(&self, rom: &[u8], addr: u16) -> u8 {
        let banks = (rom.len() / ROM_BANK_SIZE).max(1);
        let high = (self.ram_bank as usize & 0x03) << 5;
        let (bank, offset) = match addr {
            0x0000..=0x3FFF => {
                let bank = if self.mode == 0 { 0 } else { high % banks };
                (bank, addr as usize)
            }
            _ => {
                let bank = (high | (self.rom_bank as usize & 0x1F)) % banks;
                (bank, addr as usize - ROM_BANK_SIZE)
            }
        };
        rom.get(bank * ROM_BANK_SIZE + offset)
            .copied()
            .unwrap_or(0xFF)
    }

    fn write_control(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x1FFF => self.ram_enable = val & 0x0F == 0x0A,
            0x2000..=0x3FFF => {
                self.rom_bank = val & 0x1F;
                if self.rom_bank == 0 {
                    self.rom_bank = 1;
                }
            }
            0x4000..=0x5FFF => self.ram_bank = val & 0x03,
            _ => self.mode = val & 0x01,
        }
    }

    fn read_ram(&self, ram: &[u8], addr: u16) -> u8 {
        if !self.ram_enable {
            return 0xFF;
        }
        ram.get(self.ram_index(ram, addr))
            .copied()
            .unwrap_or(0xFF)
    }

    fn write_ram(&mut self, ram: &mut [u8], addr: u16, val: u8) {
        if !self.ram_enable {
            return;
        }
        let idx = self.ram_index(ram, addr);
        if let Some(b) = ram.get_mut(idx) {
            *b = val;
        }
    }
}

fn mapper_for(header: &Header) -> Box<dyn Mapper> {
    match header.cart_type {
        0x00 | 0x08 | 0x09 => Box::new(RomOnly),
        0x01..=0x03 => Box::new(Mbc1::new()),
        other => {
            log::warn!(
                "cartridge type {other:#04X} ({}) is not supported, mapping as ROM ONLY",
                cart_type_name(other)
            );
            Box::new(RomOnly)
        }
    }
}

#[derive(Debug)]
pub struct Cartridge {
    rom: Vec<u8>,
    ram: Vec<u8>,
    header: Header,
    mapper: Box<dyn Mapper>,
}

impl Cartridge {
    pub fn from_bytes(rom: Vec<u8>) -> Result<Self, CartridgeError> {
        let header = Header::parse(&rom)?;
        let declared = header.rom_size().ok_or(CartridgeError::UnsupportedRomSize {
            code: header.rom_size_code,
        })?;
        if declared != rom.len() {
            log::warn!(
                "header declares {} but image is {} bytes",
                header.rom_size_name(),
                rom.len()
            );
        }
        if !header.header_checksum_ok() {
            log::warn!(
                "header checksum mismatch: stored {:02X}, computed {:02X}",
                header.header_checksum,
                header.computed_header_checksum
            );
        }
        if !header.global_checksum_ok() {
            log::warn!(
                "global checksum mismatch: stored {:04X}, computed {:04X}",
                header.global_checksum,
                header.computed_global_checksum
            );
        }

        let mut ram_size = header.ram_size();
        if header.cart_type == 0x00 && ram_size == 0 {
            // Plain ROM carts still decode 0xA000-0xBFFF; homebrew test ROMs use it.
            ram_size = RAM_BANK_SIZE;
        }
        let mapper = mapper_for(&header);
        log::info!(
            "loaded \"{}\": {} ROM {} RAM {} ({})",
            header.title,
            header.cart_type_name(),
            header.rom_size_name(),
            header.ram_size_name(),
            header.destination_name()
        );
        Ok(Self {
            rom,
            ram: vec![0; ram_size],
            header,
            mapper,
        })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CartridgeError> {
        let data = fs::read(path)?;
        Self::from_bytes(data)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn title(&self) -> &str {
        &self.header.title
    }

    pub fn mapper_name(&self) -> &'static str {
        self.mapper.name()
    }

    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }
}

impl MemoryDevice for Cartridge {
    fn read(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x7FFF => self.mapper.read_rom(&self.rom, addr),
            0xA000..=0xBFFF => self.mapper.read_ram(&self.ram, addr),
            _ => 0xFF,
        }
    }

    fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x7FFF => self.mapper.write_control(addr, val),
            0xA000..=0xBFFF => self.mapper.write_ram(&mut self.ram, addr, val),
            _ => {}
        }
    }
}
