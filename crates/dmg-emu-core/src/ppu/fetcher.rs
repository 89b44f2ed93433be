//! Pixel FIFO and the background/window/sprite fetcher that feeds it.

use std::collections::VecDeque;

use super::{LcdRegs, SCREEN_WIDTH, oam::OamEntry};

const MAX_TILE_SPRITES: usize = 3;

const BG_MAP_0_BASE: usize = 0x1800;
const BG_MAP_1_BASE: usize = 0x1C00;
const TILE_DATA_1_BASE: usize = 0x0800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Tile,
    DataLow,
    DataHigh,
    Sleep,
    Push,
}

/// What the fetcher may look at while drawing one line.
pub(super) struct LineContext<'a> {
    pub vram: &'a [u8],
    pub regs: &'a LcdRegs,
    pub sprites: &'a [OamEntry],
    pub palette: &'a [u32; 4],
    pub window_line: u8,
    /// Window enabled and WY reached on this frame.
    pub window_active: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct TileSprite {
    entry: OamEntry,
    lo: u8,
    hi: u8,
}

pub(super) struct Fetcher {
    state: FetchState,
    queue: VecDeque<u32>,
    /// Pixels fetched from the current tile stream.
    fetch_x: u8,
    /// Pixels written to the line so far.
    pushed_x: u8,
    /// Popped pixels still to be dropped (SCX fine scroll, window left clip).
    discard: u8,
    /// Screen X of stream pixel 0; negative while the first pixels are clipped.
    origin: i16,
    in_window: bool,
    tile: u8,
    lo: u8,
    hi: u8,
    sprites: [TileSprite; MAX_TILE_SPRITES],
    sprite_count: usize,
}

impl Fetcher {
    pub fn new() -> Self {
        Self {
            state: FetchState::Tile,
            queue: VecDeque::with_capacity(16),
            fetch_x: 0,
            pushed_x: 0,
            discard: 0,
            origin: 0,
            in_window: false,
            tile: 0,
            lo: 0,
            hi: 0,
            sprites: [TileSprite::default(); MAX_TILE_SPRITES],
            sprite_count: 0,
        }
    }

    /// Prepare for a new line's pixel transfer.
    pub fn start_line(&mut self, scx: u8) {
        self.state = FetchState::Tile;
        self.queue.clear();
        self.fetch_x = 0;
        self.pushed_x = 0;
        self.discard = scx % 8;
        self.origin = -((scx % 8) as i16);
        self.in_window = false;
        self.sprite_count = 0;
    }

    pub fn state(&self) -> FetchState {
        self.state
    }

    pub fn pushed_x(&self) -> u8 {
        self.pushed_x
    }

    pub fn line_done(&self) -> bool {
        self.pushed_x as usize >= SCREEN_WIDTH
    }

    pub fn window_drawn(&self) -> bool {
        self.in_window
    }

    /// One transfer dot. The fetcher advances on even dots; the FIFO shifts
    /// one pixel out every dot.
    pub fn tick(&mut self, ctx: &LineContext, fetch_dot: bool, line: &mut [u32]) {
        self.check_window(ctx);
        if fetch_dot {
            self.step_fetch(ctx);
        }
        self.shift_out(line);
    }

    fn check_window(&mut self, ctx: &LineContext) {
        if !ctx.window_active || self.in_window {
            return;
        }
        let wx = ctx.regs.wx;
        if self.pushed_x as u16 + 7 < wx as u16 {
            return;
        }
        self.in_window = true;
        self.queue.clear();
        self.state = FetchState::Tile;
        self.fetch_x = 0;
        self.discard = 7u8.saturating_sub(wx);
        self.origin = self.pushed_x as i16 - self.discard as i16;
    }

    fn step_fetch(&mut self, ctx: &LineContext) {
        match self.state {
            FetchState::Tile => {
                self.fetch_tile_index(ctx);
                self.select_sprites(ctx);
                self.state = FetchState::DataLow;
            }
            FetchState::DataLow => {
                self.lo = ctx.vram[self.tile_row_addr(ctx)];
                self.fetch_sprite_rows(ctx, 0);
                self.state = FetchState::DataHigh;
            }
            FetchState::DataHigh => {
                self.hi = ctx.vram[self.tile_row_addr(ctx) + 1];
                self.fetch_sprite_rows(ctx, 1);
                self.state = FetchState::Sleep;
            }
            FetchState::Sleep => self.state = FetchState::Push,
            FetchState::Push => {
                if self.queue.len() < 9 {
                    self.push_tile(ctx);
                    self.state = FetchState::Tile;
                }
            }
        }
    }

    fn fetch_tile_index(&mut self, ctx: &LineContext) {
        let regs = ctx.regs;
        let (map_base, map_x, map_y) = if self.in_window {
            let base = if regs.window_map_high() {
                BG_MAP_1_BASE
            } else {
                BG_MAP_0_BASE
            };
            (base, self.fetch_x as usize / 8, ctx.window_line as usize / 8)
        } else {
            let base = if regs.bg_map_high() {
                BG_MAP_1_BASE
            } else {
                BG_MAP_0_BASE
            };
            let x = (self.fetch_x as usize + regs.scx as usize) / 8;
            let y = regs.ly.wrapping_add(regs.scy) as usize / 8;
            (base, x, y)
        };
        self.tile = ctx.vram[map_base + (map_y & 31) * 32 + (map_x & 31)];
    }

    /// VRAM offset of the low bit-plane byte for the current tile row.
    fn tile_row_addr(&self, ctx: &LineContext) -> usize {
        let regs = ctx.regs;
        let row = if self.in_window {
            ctx.window_line % 8
        } else {
            regs.ly.wrapping_add(regs.scy) % 8
        } as usize;
        let base = if regs.unsigned_tile_data() {
            self.tile as usize * 16
        } else {
            TILE_DATA_1_BASE + self.tile.wrapping_add(128) as usize * 16
        };
        base + row * 2
    }

    fn tile_screen_x(&self) -> i16 {
        self.origin + self.fetch_x as i16
    }

    fn select_sprites(&mut self, ctx: &LineContext) {
        self.sprite_count = 0;
        if !ctx.regs.obj_enabled() {
            return;
        }
        let left = self.tile_screen_x();
        for entry in ctx.sprites {
            let sprite_left = entry.x as i16 - 8;
            if sprite_left < left + 8 && sprite_left + 8 > left {
                self.sprites[self.sprite_count] = TileSprite {
                    entry: *entry,
                    lo: 0,
                    hi: 0,
                };
                self.sprite_count += 1;
                if self.sprite_count == MAX_TILE_SPRITES {
                    break;
                }
            }
        }
    }

    fn fetch_sprite_rows(&mut self, ctx: &LineContext, plane: usize) {
        let height = ctx.regs.obj_height();
        for sprite in &mut self.sprites[..self.sprite_count] {
            let entry = sprite.entry;
            let mut row = (ctx.regs.ly as i16 - (entry.y as i16 - 16)) as u8 % height;
            if entry.y_flip() {
                row = height - 1 - row;
            }
            let tile = if height == 16 {
                entry.tile & 0xFE
            } else {
                entry.tile
            };
            let byte = ctx.vram[tile as usize * 16 + row as usize * 2 + plane];
            if plane == 0 {
                sprite.lo = byte;
            } else {
                sprite.hi = byte;
            }
        }
    }

    /// Decode the fetched tile row, resolve sprites over it and queue the
    /// resulting 8 colors.
    fn push_tile(&mut self, ctx: &LineContext) {
        let regs = ctx.regs;
        let left = self.tile_screen_x();
        for i in 0..8u8 {
            let bit = 7 - i;
            let bg_index = if regs.bg_enabled() {
                ((self.hi >> bit) & 1) << 1 | ((self.lo >> bit) & 1)
            } else {
                0
            };
            let mut color = if regs.bg_enabled() {
                ctx.palette[shade(regs.bgp, bg_index) as usize]
            } else {
                ctx.palette[0]
            };

            let x = left + i as i16;
            if let Some((sprite, index)) = self.sprite_pixel(x)
                && !(sprite.behind_bg() && bg_index != 0)
            {
                let palette = if sprite.uses_obp1() {
                    regs.obp1
                } else {
                    regs.obp0
                };
                color = ctx.palette[shade(palette, index) as usize];
            }
            self.queue.push_back(color);
        }
        self.fetch_x = self.fetch_x.wrapping_add(8);
    }

    /// First opaque sprite pixel at screen column `x`.
    fn sprite_pixel(&self, x: i16) -> Option<(OamEntry, u8)> {
        self.sprites[..self.sprite_count].iter().find_map(|s| {
            let offset = x - (s.entry.x as i16 - 8);
            if !(0..8).contains(&offset) {
                return None;
            }
            let bit = if s.entry.x_flip() {
                offset as u8
            } else {
                7 - offset as u8
            };
            let index = ((s.hi >> bit) & 1) << 1 | ((s.lo >> bit) & 1);
            (index != 0).then_some((s.entry, index))
        })
    }

    fn shift_out(&mut self, line: &mut [u32]) {
        if self.queue.len() <= 8 || self.line_done() {
            return;
        }
        let Some(color) = self.queue.pop_front() else {
            return;
        };
        if self.discard > 0 {
            self.discard -= 1;
            return;
        }
        if let Some(px) = line.get_mut(self.pushed_x as usize) {
            *px = color;
        }
        self.pushed_x += 1;
    }
}

#[inline(always)]
fn shade(palette: u8, color_id: u8) -> u8 {
    (palette >> (color_id * 2)) & 0x03
}
