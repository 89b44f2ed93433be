pub const OAM_START: u16 = 0xFE00;
pub const OAM_ENTRIES: usize = 40;

const FLAG_PRIORITY: u8 = 0x80;
const FLAG_Y_FLIP: u8 = 0x40;
const FLAG_X_FLIP: u8 = 0x20;
const FLAG_PALETTE: u8 = 0x10;

/// One sprite descriptor as laid out in OAM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OamEntry {
    pub y: u8,
    pub x: u8,
    pub tile: u8,
    pub flags: u8,
}

impl OamEntry {
    /// Background colors 1-3 are drawn over this sprite.
    pub fn behind_bg(&self) -> bool {
        self.flags & FLAG_PRIORITY != 0
    }

    pub fn y_flip(&self) -> bool {
        self.flags & FLAG_Y_FLIP != 0
    }

    pub fn x_flip(&self) -> bool {
        self.flags & FLAG_X_FLIP != 0
    }

    /// OBP1 instead of OBP0.
    pub fn uses_obp1(&self) -> bool {
        self.flags & FLAG_PALETTE != 0
    }

    /// Whether the sprite covers scanline `ly` for the given sprite height.
    pub fn on_line(&self, ly: u8, height: u8) -> bool {
        let top = self.y as i16 - 16;
        let ly = ly as i16;
        top <= ly && ly < top + height as i16
    }
}

/// Object attribute memory, stored as 40 structured entries.
///
/// The byte view seen by the bus is computed: entry `offset / 4`, field
/// `offset % 4` in the order y, x, tile, flags.
#[derive(Debug, Clone)]
pub struct Oam {
    entries: [OamEntry; OAM_ENTRIES],
}

impl Oam {
    pub fn new() -> Self {
        Self {
            entries: [OamEntry::default(); OAM_ENTRIES],
        }
    }

    pub fn entries(&self) -> &[OamEntry; OAM_ENTRIES] {
        &self.entries
    }

    /// Read by byte offset from `OAM_START` (0..0xA0).
    pub fn read(&self, offset: usize) -> u8 {
        let Some(entry) = self.entries.get(offset / 4) else {
            return 0xFF;
        };
        match offset % 4 {
            0 => entry.y,
            1 => entry.x,
            2 => entry.tile,
            _ => entry.flags,
        }
    }

    pub fn write(&mut self, offset: usize, val: u8) {
        let Some(entry) = self.entries.get_mut(offset / 4) else {
            return;
        };
        match offset % 4 {
            0 => entry.y = val,
            1 => entry.x = val,
            2 => entry.tile = val,
            _ => entry.flags = val,
        }
    }
}

impl Default for Oam {
    fn default() -> Self {
        Self::new()
    }
}
