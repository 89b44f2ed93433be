use crate::{
    apu::Apu,
    bus::Bus,
    cartridge::Cartridge,
    dma::Dma,
    interrupts::{Interrupt, Interrupts},
    joypad::{Button, Joypad},
    memory::{MemoryDevice, Ram},
    ppu::Ppu,
    serial::{LinkPort, Serial},
    timer::Timer,
};

const WRAM_START: u16 = 0xC000;
const WRAM_SIZE: usize = 0x2000;
const ECHO_OFFSET: u16 = 0x2000;
const OAM_START: u16 = 0xFE00;
const HRAM_START: u16 = 0xFF80;
const HRAM_SIZE: usize = 0x7F;
const BOOT_ROM_SIZE: usize = 0x100;

/// Internal divider value the DMG boot ROM hands over with.
const POST_BOOT_DIV: u16 = 0xABCC;

/// Address dispatcher and owner of every addressable component.
///
/// The CPU reaches everything through the [`Bus`] impl. Peripherals never
/// hold references back into the MMU; they receive `&mut Interrupts` while
/// ticking instead.
pub struct Mmu {
    wram: Ram,
    hram: Ram,
    pub cart: Option<Cartridge>,
    boot_rom: Option<Vec<u8>>,
    boot_mapped: bool,
    pub irqs: Interrupts,
    pub timer: Timer,
    pub dma: Dma,
    pub ppu: Ppu,
    pub serial: Serial,
    pub apu: Apu,
    pub joypad: Joypad,
}

impl Mmu {
    /// Hardware state as the boot ROM leaves it.
    pub fn new() -> Self {
        let mut timer = Timer::new();
        timer.div = POST_BOOT_DIV;
        Self {
            wram: Ram::new(WRAM_SIZE, WRAM_START),
            hram: Ram::new(HRAM_SIZE, HRAM_START),
            cart: None,
            boot_rom: None,
            boot_mapped: false,
            irqs: Interrupts::new(),
            timer,
            dma: Dma::new(),
            ppu: Ppu::new(),
            serial: Serial::new(),
            apu: Apu::new(),
            joypad: Joypad::new(),
        }
    }

    /// Hardware state at power on, before any boot ROM code has run.
    pub fn new_power_on() -> Self {
        let mut irqs = Interrupts::new();
        irqs.write_if(0);
        Self {
            wram: Ram::new(WRAM_SIZE, WRAM_START),
            hram: Ram::new(HRAM_SIZE, HRAM_START),
            cart: None,
            boot_rom: None,
            boot_mapped: false,
            irqs,
            timer: Timer::new(),
            dma: Dma::new(),
            ppu: Ppu::new_power_on(),
            serial: Serial::new(),
            apu: Apu::new_power_on(),
            joypad: Joypad::new(),
        }
    }

    pub fn load_cart(&mut self, cart: Cartridge) {
        self.cart = Some(cart);
    }

    pub fn take_cart(&mut self) -> Option<Cartridge> {
        self.cart.take()
    }

    /// Overlay `data` on 0x0000-0x00FF until the program writes FF50.
    pub fn load_boot_rom(&mut self, data: Vec<u8>) {
        if data.len() < BOOT_ROM_SIZE {
            log::warn!(
                "boot ROM is {} bytes, expected {}; missing bytes read 0xFF",
                data.len(),
                BOOT_ROM_SIZE
            );
        }
        self.boot_rom = Some(data);
        self.boot_mapped = true;
    }

    pub fn take_boot_rom(&mut self) -> Option<Vec<u8>> {
        self.boot_mapped = false;
        self.boot_rom.take()
    }

    pub fn boot_rom_mapped(&self) -> bool {
        self.boot_mapped
    }

    pub fn press(&mut self, button: Button) {
        self.joypad.press(button, &mut self.irqs);
    }

    pub fn release(&mut self, button: Button) {
        self.joypad.release(button);
    }

    pub fn connect_link(&mut self, port: Box<dyn LinkPort>) {
        self.serial.connect(port);
    }

    pub fn take_serial(&mut self) -> Vec<u8> {
        self.serial.take_output()
    }

    fn read_byte_inner(&self, addr: u16, allow_dma: bool) -> u8 {
        match addr {
            0x0000..=0x00FF if self.boot_mapped => self
                .boot_rom
                .as_ref()
                .and_then(|b| b.get(addr as usize).copied())
                .unwrap_or(0xFF),
            0x0000..=0x7FFF | 0xA000..=0xBFFF => {
                self.cart.as_ref().map(|c| c.read(addr)).unwrap_or(0xFF)
            }
            0x8000..=0x9FFF => self.ppu.read_vram(addr),
            0xC000..=0xDFFF => self.wram.read(addr),
            0xE000..=0xFDFF => self.wram.read(addr - ECHO_OFFSET),
            0xFE00..=0xFE9F => {
                if !allow_dma && self.dma.blocks_oam() {
                    return 0xFF;
                }
                self.ppu.read_oam(addr)
            }
            0xFEA0..=0xFEFF => 0xFF,
            0xFF00 => self.joypad.read(),
            0xFF01 | 0xFF02 => self.serial.read(addr),
            0xFF04..=0xFF07 => self.timer.read(addr),
            0xFF0F => self.irqs.read_if(),
            0xFF10..=0xFF3F => self.apu.read_reg(addr),
            0xFF46 => self.dma.page(),
            0xFF40..=0xFF4B => self.ppu.read_reg(addr),
            0xFF80..=0xFFFE => self.hram.read(addr),
            0xFFFF => self.irqs.read_ie(),
            _ => 0xFF,
        }
    }

    pub fn read_byte(&self, addr: u16) -> u8 {
        self.read_byte_inner(addr, false)
    }

    /// Source read for an OAM DMA byte. Pages above 0xDF see echo RAM.
    fn dma_read_byte(&self, addr: u16) -> u8 {
        let addr = if addr >= OAM_START {
            addr.wrapping_sub(ECHO_OFFSET)
        } else {
            addr
        };
        self.read_byte_inner(addr, true)
    }

    pub fn write_byte(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x7FFF | 0xA000..=0xBFFF => {
                if let Some(cart) = self.cart.as_mut() {
                    cart.write(addr, val);
                }
            }
            0x8000..=0x9FFF => self.ppu.write_vram(addr, val),
            0xC000..=0xDFFF => self.wram.write(addr, val),
            0xE000..=0xFDFF => self.wram.write(addr - ECHO_OFFSET, val),
            0xFE00..=0xFE9F => {
                if !self.dma.blocks_oam() {
                    self.ppu.write_oam(addr, val);
                }
            }
            0xFEA0..=0xFEFF => {}
            0xFF00 => self.joypad.write(val),
            0xFF01 | 0xFF02 => self.serial.write(addr, val),
            0xFF04 => {
                let before = self.timer.div;
                self.timer.write(addr, val, &mut self.irqs);
                self.apu.on_div_reset(before);
            }
            0xFF05..=0xFF07 => self.timer.write(addr, val, &mut self.irqs),
            0xFF0F => self.irqs.write_if(val),
            0xFF10..=0xFF3F => self.apu.write_reg(addr, val),
            0xFF46 => self.dma.start(val),
            0xFF40..=0xFF4B => self.ppu.write_reg(addr, val),
            0xFF50 => {
                if val != 0 && self.boot_mapped {
                    log::debug!("boot ROM unmapped");
                    self.boot_mapped = false;
                }
            }
            0xFF80..=0xFFFE => self.hram.write(addr, val),
            0xFFFF => self.irqs.write_ie(val),
            _ => {}
        }
    }

    /// Advance every peripheral by one T-cycle.
    fn tick_t(&mut self) {
        let prev_div = self.timer.div;
        self.timer.step(1, &mut self.irqs);
        let curr_div = self.timer.div;

        if let Some((src, idx)) = self.dma.tick() {
            let val = self.dma_read_byte(src);
            self.ppu.write_oam(OAM_START + idx as u16, val);
        }

        self.ppu.tick(&mut self.irqs);
        self.serial.step(prev_div, curr_div, &mut self.irqs);
        self.apu.tick(prev_div, curr_div);
    }
}

impl Default for Mmu {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for Mmu {
    #[inline]
    fn read(&mut self, addr: u16) -> u8 {
        self.read_byte(addr)
    }

    #[inline]
    fn write(&mut self, addr: u16, val: u8) {
        self.write_byte(addr, val)
    }

    fn peek(&self, addr: u16) -> u8 {
        self.read_byte(addr)
    }

    fn tick(&mut self, m_cycles: u8) {
        for _ in 0..m_cycles as u32 * 4 {
            self.tick_t();
        }
    }

    fn interrupt_flags(&self) -> u8 {
        self.irqs.flags()
    }

    fn interrupt_enable(&self) -> u8 {
        self.irqs.enable()
    }

    fn acknowledge(&mut self, irq: Interrupt) {
        self.irqs.clear(irq);
    }
}
