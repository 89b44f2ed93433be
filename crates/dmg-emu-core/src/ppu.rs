mod fetcher;
pub mod oam;

use crate::{
    interrupts::{Interrupt, Interrupts},
    memory::{MemoryDevice, Ram},
};

use fetcher::{Fetcher, LineContext};
pub use fetcher::FetchState;
use oam::{OAM_START, Oam, OamEntry};

#[cfg(feature = "ppu-trace")]
macro_rules! ppu_trace {
    ($($arg:tt)*) => {
        log::trace!(target: "dmg_emu_core::ppu", $($arg)*);
    };
}
#[cfg(not(feature = "ppu-trace"))]
macro_rules! ppu_trace {
    ($($arg:tt)*) => {};
}

pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;

const DOTS_PER_LINE: u16 = 456;
const OAM_SCAN_DOTS: u16 = 80;
const LAST_LINE: u8 = 153;

const MAX_SPRITES_PER_LINE: usize = 10;

const VRAM_START: u16 = 0x8000;
const VRAM_SIZE: usize = 0x2000;

// Shades as 0xAARRGGBB, lightest first.
pub const DEFAULT_PALETTE: [u32; 4] = [0xFFFFFFFF, 0xFFAAAAAA, 0xFF555555, 0xFF000000];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    HBlank = 0,
    VBlank = 1,
    OamScan = 2,
    Transfer = 3,
}

/// LCD control and status registers (0xFF40-0xFF4B, minus DMA).
#[derive(Debug, Clone, Default)]
pub struct LcdRegs {
    pub lcdc: u8,
    /// STAT interrupt-source enables (bits 3-6); mode and LYC flag are live.
    pub stat: u8,
    pub scy: u8,
    pub scx: u8,
    pub ly: u8,
    pub lyc: u8,
    pub bgp: u8,
    pub obp0: u8,
    pub obp1: u8,
    pub wy: u8,
    pub wx: u8,
}

impl LcdRegs {
    pub fn lcd_enabled(&self) -> bool {
        self.lcdc & 0x80 != 0
    }

    pub fn window_map_high(&self) -> bool {
        self.lcdc & 0x40 != 0
    }

    pub fn window_enabled(&self) -> bool {
        self.lcdc & 0x20 != 0
    }

    /// Tiles addressed from 0x8000 with unsigned indices.
    pub fn unsigned_tile_data(&self) -> bool {
        self.lcdc & 0x10 != 0
    }

    pub fn bg_map_high(&self) -> bool {
        self.lcdc & 0x08 != 0
    }

    pub fn obj_height(&self) -> u8 {
        if self.lcdc & 0x04 != 0 { 16 } else { 8 }
    }

    pub fn obj_enabled(&self) -> bool {
        self.lcdc & 0x02 != 0
    }

    /// On DMG this bit blanks both background and window.
    pub fn bg_enabled(&self) -> bool {
        self.lcdc & 0x01 != 0
    }
}

pub struct Ppu {
    vram: Ram,
    oam: Oam,
    regs: LcdRegs,
    mode: Mode,
    lyc_eq_ly: bool,
    stat_irq_line: bool,
    /// Dots elapsed on the current line.
    dots: u16,
    /// Dots since pixel transfer started on this line.
    transfer_dots: u16,
    line_sprites: Vec<OamEntry>,
    fetcher: Fetcher,
    /// Internal window line counter
    window_line: u8,
    /// WY matched LY at some point this frame.
    window_y_triggered: bool,
    palette: [u32; 4],
    back_buffer: [u32; SCREEN_WIDTH * SCREEN_HEIGHT],
    framebuffer: [u32; SCREEN_WIDTH * SCREEN_HEIGHT],
    /// Indicates a completed frame is available in `framebuffer`
    frame_ready: bool,
    frame_counter: u64,
}

impl Ppu {
    /// PPU as left by the boot ROM: LCD on, showing line 0.
    pub fn new() -> Self {
        Self {
            vram: Ram::new(VRAM_SIZE, VRAM_START),
            oam: Oam::new(),
            regs: LcdRegs {
                lcdc: 0x91,
                stat: 0,
                bgp: 0xFC,
                obp0: 0xFF,
                obp1: 0xFF,
                ..LcdRegs::default()
            },
            mode: Mode::OamScan,
            lyc_eq_ly: true,
            stat_irq_line: false,
            dots: 0,
            transfer_dots: 0,
            line_sprites: Vec::with_capacity(MAX_SPRITES_PER_LINE),
            fetcher: Fetcher::new(),
            window_line: 0,
            window_y_triggered: false,
            palette: DEFAULT_PALETTE,
            back_buffer: [DEFAULT_PALETTE[0]; SCREEN_WIDTH * SCREEN_HEIGHT],
            framebuffer: [DEFAULT_PALETTE[0]; SCREEN_WIDTH * SCREEN_HEIGHT],
            frame_ready: false,
            frame_counter: 0,
        }
    }

    /// Power-on state before any boot ROM code runs: LCD off.
    pub fn new_power_on() -> Self {
        let mut ppu = Self::new();
        ppu.regs.lcdc = 0;
        ppu.regs.bgp = 0;
        ppu.regs.obp0 = 0;
        ppu.regs.obp1 = 0;
        ppu.mode = Mode::HBlank;
        ppu
    }

    /// Replace the four shades (lightest first, 0xAARRGGBB).
    pub fn set_palette(&mut self, palette: [u32; 4]) {
        self.palette = palette;
    }

    pub fn palette(&self) -> [u32; 4] {
        self.palette
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn ly(&self) -> u8 {
        self.regs.ly
    }

    pub fn regs(&self) -> &LcdRegs {
        &self.regs
    }

    pub fn oam(&self) -> &Oam {
        &self.oam
    }

    pub fn vram(&self) -> &[u8] {
        self.vram.as_slice()
    }

    pub fn fetch_state(&self) -> FetchState {
        self.fetcher.state()
    }

    /// Returns the current value of the internal window line counter.
    pub fn window_line_counter(&self) -> u8 {
        self.window_line
    }

    /// Returns true if a full frame has been rendered and is ready to display.
    pub fn frame_ready(&self) -> bool {
        self.frame_ready
    }

    /// Clears the frame ready flag after a frame has been consumed.
    pub fn clear_frame_flag(&mut self) {
        self.frame_ready = false;
    }

    /// Last completed frame, published on VBLANK entry.
    pub fn framebuffer(&self) -> &[u32; SCREEN_WIDTH * SCREEN_HEIGHT] {
        &self.framebuffer
    }

    /// Returns the number of frames that have been completed since power on.
    pub fn frames(&self) -> u64 {
        self.frame_counter
    }

    pub fn read_vram(&self, addr: u16) -> u8 {
        self.vram.read(addr)
    }

    pub fn write_vram(&mut self, addr: u16, val: u8) {
        self.vram.write(addr, val);
    }

    pub fn read_oam(&self, addr: u16) -> u8 {
        self.oam.read(addr.wrapping_sub(OAM_START) as usize)
    }

    pub fn write_oam(&mut self, addr: u16, val: u8) {
        self.oam.write(addr.wrapping_sub(OAM_START) as usize, val);
    }

    pub fn read_reg(&self, addr: u16) -> u8 {
        let r = &self.regs;
        match addr {
            0xFF40 => r.lcdc,
            0xFF41 => {
                (r.stat & 0x78) | 0x80 | self.mode as u8 | if self.lyc_eq_ly { 0x04 } else { 0 }
            }
            0xFF42 => r.scy,
            0xFF43 => r.scx,
            0xFF44 => r.ly,
            0xFF45 => r.lyc,
            0xFF47 => r.bgp,
            0xFF48 => r.obp0,
            0xFF49 => r.obp1,
            0xFF4A => r.wy,
            0xFF4B => r.wx,
            _ => 0xFF,
        }
    }

    pub fn write_reg(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF40 => {
                let was_on = self.regs.lcd_enabled();
                self.regs.lcdc = val;
                let on = self.regs.lcd_enabled();
                if was_on && !on {
                    ppu_trace!("LCD off at ly={} dots={}", self.regs.ly, self.dots);
                    self.mode = Mode::HBlank;
                    self.dots = 0;
                    self.window_line = 0;
                    self.window_y_triggered = false;
                    self.regs.ly = 0;
                } else if !was_on && on {
                    ppu_trace!("LCD on");
                    self.mode = Mode::OamScan;
                    self.dots = 0;
                    self.update_lyc_compare();
                }
            }
            0xFF41 => self.regs.stat = (self.regs.stat & 0x07) | (val & 0xF8),
            0xFF42 => self.regs.scy = val,
            0xFF43 => self.regs.scx = val,
            // LY is read-only
            0xFF44 => {}
            0xFF45 => {
                self.regs.lyc = val;
                self.update_lyc_compare();
            }
            0xFF47 => self.regs.bgp = val,
            0xFF48 => self.regs.obp0 = val,
            0xFF49 => self.regs.obp1 = val,
            0xFF4A => self.regs.wy = val,
            0xFF4B => self.regs.wx = val,
            _ => {}
        }
    }

    fn update_lyc_compare(&mut self) {
        if self.regs.lcd_enabled() {
            self.lyc_eq_ly = self.regs.ly == self.regs.lyc;
        }
    }

    /// Collect the first 10 sprites in OAM order that cover this line, then order them by X.
    fn oam_scan(&mut self) {
        let height = self.regs.obj_height();
        let ly = self.regs.ly;
        self.line_sprites.clear();
        self.line_sprites.extend(
            self.oam
                .entries()
                .iter()
                .filter(|e| e.on_line(ly, height))
                .take(MAX_SPRITES_PER_LINE)
                .copied(),
        );
        // Stable sort keeps OAM order among equal X.
        self.line_sprites.sort_by_key(|e| e.x);
    }

    /// Advance the PPU by one dot.
    pub fn tick(&mut self, irqs: &mut Interrupts) {
        if !self.regs.lcd_enabled() {
            return;
        }
        self.dots += 1;

        match self.mode {
            Mode::OamScan => {
                if self.dots == 1 {
                    if self.regs.ly == self.regs.wy {
                        self.window_y_triggered = true;
                    }
                    self.oam_scan();
                }
                if self.dots >= OAM_SCAN_DOTS {
                    self.mode = Mode::Transfer;
                    self.transfer_dots = 0;
                    self.fetcher.start_line(self.regs.scx);
                }
            }
            Mode::Transfer => {
                self.transfer_step();
                if self.fetcher.line_done() {
                    ppu_trace!("ly={} transfer took {} dots", self.regs.ly, self.transfer_dots);
                    self.mode = Mode::HBlank;
                }
            }
            Mode::HBlank => {
                if self.dots >= DOTS_PER_LINE {
                    self.dots = 0;
                    if self.fetcher.window_drawn() {
                        self.window_line = self.window_line.wrapping_add(1);
                    }
                    self.regs.ly += 1;
                    if self.regs.ly as usize == SCREEN_HEIGHT {
                        self.enter_vblank(irqs);
                    } else {
                        self.mode = Mode::OamScan;
                    }
                    self.update_lyc_compare();
                }
            }
            Mode::VBlank => {
                if self.dots >= DOTS_PER_LINE {
                    self.dots = 0;
                    if self.regs.ly >= LAST_LINE {
                        self.regs.ly = 0;
                        self.window_line = 0;
                        self.window_y_triggered = false;
                        self.mode = Mode::OamScan;
                    } else {
                        self.regs.ly += 1;
                    }
                    self.update_lyc_compare();
                }
            }
        }

        self.update_stat_irq(irqs);
    }

    fn transfer_step(&mut self) {
        let fetch_dot = self.transfer_dots % 2 == 0;
        self.transfer_dots += 1;
        let ly = self.regs.ly as usize;
        let ctx = LineContext {
            vram: self.vram.as_slice(),
            regs: &self.regs,
            sprites: &self.line_sprites,
            palette: &self.palette,
            window_line: self.window_line,
            window_active: self.regs.window_enabled()
                && self.regs.bg_enabled()
                && self.window_y_triggered
                && self.regs.wx <= 166,
        };
        let line = &mut self.back_buffer[ly * SCREEN_WIDTH..(ly + 1) * SCREEN_WIDTH];
        self.fetcher.tick(&ctx, fetch_dot, line);
    }

    fn enter_vblank(&mut self, irqs: &mut Interrupts) {
        self.mode = Mode::VBlank;
        self.framebuffer.copy_from_slice(&self.back_buffer);
        self.frame_ready = true;
        self.frame_counter = self.frame_counter.wrapping_add(1);
        irqs.request(Interrupt::VBlank);
    }

    /// STAT interrupts fire on the rising edge of the OR of all enabled sources.
    fn update_stat_irq(&mut self, irqs: &mut Interrupts) {
        let stat = self.regs.stat;
        let coincidence = self.lyc_eq_ly && stat & 0x40 != 0;
        let mode_signal = match self.mode {
            Mode::HBlank => stat & 0x08 != 0,
            Mode::VBlank => stat & 0x10 != 0,
            Mode::OamScan => stat & 0x20 != 0,
            Mode::Transfer => false,
        };
        let current = coincidence || mode_signal;
        if current && !self.stat_irq_line {
            irqs.request(Interrupt::Stat);
        }
        self.stat_irq_line = current;
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_irqs() -> Interrupts {
        let mut irqs = Interrupts::new();
        irqs.write_if(0);
        irqs
    }

    #[test]
    fn line_timing_and_modes() {
        let mut ppu = Ppu::new();
        let mut irqs = quiet_irqs();
        ppu.tick(&mut irqs);
        assert_eq!(ppu.mode(), Mode::OamScan);
        for _ in 1..OAM_SCAN_DOTS {
            ppu.tick(&mut irqs);
        }
        assert_eq!(ppu.mode(), Mode::Transfer);
        let mut dots = OAM_SCAN_DOTS;
        while ppu.mode() == Mode::Transfer {
            ppu.tick(&mut irqs);
            dots += 1;
        }
        assert_eq!(ppu.mode(), Mode::HBlank);
        assert!(dots > OAM_SCAN_DOTS + 160 && dots < DOTS_PER_LINE);
        while ppu.ly() == 0 {
            ppu.tick(&mut irqs);
            dots += 1;
        }
        assert_eq!(dots, DOTS_PER_LINE);
        assert_eq!(ppu.mode(), Mode::OamScan);
    }

    #[test]
    fn frame_is_70224_dots() {
        let mut ppu = Ppu::new();
        let mut irqs = quiet_irqs();
        let mut dots = 0u32;
        while !ppu.frame_ready() {
            ppu.tick(&mut irqs);
            dots += 1;
        }
        assert_eq!(dots, 144 * 456);
        assert_ne!(irqs.flags() & Interrupt::VBlank.bit(), 0);
        ppu.clear_frame_flag();
        dots = 0;
        while !ppu.frame_ready() {
            ppu.tick(&mut irqs);
            dots += 1;
        }
        assert_eq!(dots, 70224);
        assert_eq!(ppu.frames(), 2);
    }

    #[test]
    fn stat_reads_mode_and_coincidence() {
        let mut ppu = Ppu::new();
        let mut irqs = quiet_irqs();
        ppu.write_reg(0xFF41, 0xFF);
        assert_eq!(ppu.read_reg(0xFF41), 0xF8 | 0x04 | Mode::OamScan as u8);
        ppu.write_reg(0xFF45, 5);
        assert_eq!(ppu.read_reg(0xFF41) & 0x04, 0);
        for _ in 0..(5 * DOTS_PER_LINE) {
            ppu.tick(&mut irqs);
        }
        assert_eq!(ppu.ly(), 5);
        assert_ne!(ppu.read_reg(0xFF41) & 0x04, 0);
    }

    #[test]
    fn lyc_stat_interrupt_on_rising_edge() {
        let mut ppu = Ppu::new();
        let mut irqs = quiet_irqs();
        ppu.write_reg(0xFF45, 2);
        ppu.write_reg(0xFF41, 0x40);
        for _ in 0..(2 * DOTS_PER_LINE - 1) {
            ppu.tick(&mut irqs);
        }
        assert_eq!(irqs.flags() & Interrupt::Stat.bit(), 0);
        ppu.tick(&mut irqs);
        assert_ne!(irqs.flags() & Interrupt::Stat.bit(), 0);
        irqs.clear(Interrupt::Stat);
        for _ in 0..100 {
            ppu.tick(&mut irqs);
        }
        assert_eq!(irqs.flags() & Interrupt::Stat.bit(), 0);
    }

    #[test]
    fn lcd_off_resets_ly_and_mode() {
        let mut ppu = Ppu::new();
        let mut irqs = quiet_irqs();
        for _ in 0..(3 * DOTS_PER_LINE + 10) {
            ppu.tick(&mut irqs);
        }
        ppu.write_reg(0xFF40, 0x11);
        assert_eq!(ppu.ly(), 0);
        assert_eq!(ppu.mode(), Mode::HBlank);
        for _ in 0..1000 {
            ppu.tick(&mut irqs);
        }
        assert_eq!(ppu.ly(), 0);
        ppu.write_reg(0xFF40, 0x91);
        assert_eq!(ppu.mode(), Mode::OamScan);
    }

    #[test]
    fn oam_scan_keeps_first_ten_in_oam_order() {
        let mut ppu = Ppu::new();
        for i in 0..12u8 {
            let base = 0xFE00 + i as u16 * 4;
            ppu.write_oam(base, 16);
            ppu.write_oam(base + 1, 100 - i);
        }
        ppu.oam_scan();
        assert_eq!(ppu.line_sprites.len(), MAX_SPRITES_PER_LINE);
        // Entries 10 and 11 have the lowest X but are past the limit.
        assert_eq!(ppu.line_sprites[0].x, 91);
        assert_eq!(ppu.line_sprites[9].x, 100);
        assert!(ppu.line_sprites.windows(2).all(|w| w[0].x <= w[1].x));
    }

    #[test]
    fn palette_applies_to_rendered_frame() {
        let mut ppu = Ppu::new();
        let mut irqs = quiet_irqs();
        ppu.set_palette([1, 2, 3, 4]);
        ppu.write_reg(0xFF47, 0xE4);
        while !ppu.frame_ready() {
            ppu.tick(&mut irqs);
        }
        assert!(ppu.framebuffer().iter().all(|&c| c == 1));
    }
}
