/// Bytes copied by one OAM DMA transfer.
pub const DMA_LENGTH: u8 = 0xA0;

/// Ticks between the FF46 write and the first copied byte.
const STARTUP_DELAY: u8 = 2;

/// OAM DMA controller.
///
/// The controller only sequences the transfer. Each [`Dma::tick`] that
/// moves a byte hands the source address and OAM index back to the owner of
/// the bus, which performs the read and the OAM write.
#[derive(Debug, Clone, Default)]
pub struct Dma {
    page: u8,
    delay: u8,
    index: u8,
    active: bool,
    /// Restarted while a previous transfer still held the bus.
    restarted: bool,
}

impl Dma {
    pub fn new() -> Self {
        Self::default()
    }

    /// FF46 write: latch the source page and restart the transfer.
    pub fn start(&mut self, page: u8) {
        self.restarted = self.blocks_oam();
        self.page = page;
        self.delay = STARTUP_DELAY;
        self.index = 0;
        self.active = true;
        log::debug!("OAM DMA from {:04X}", self.source());
    }

    /// Last page written to FF46.
    pub fn page(&self) -> u8 {
        self.page
    }

    pub fn active(&self) -> bool {
        self.active
    }

    /// True once the startup delay has elapsed and bytes are moving.
    pub fn transferring(&self) -> bool {
        self.active && self.delay == 0
    }

    /// CPU access to OAM is cut off while bytes move. A restart keeps the
    /// bus held through its own startup delay.
    pub fn blocks_oam(&self) -> bool {
        self.active && (self.delay == 0 || self.restarted)
    }

    /// Advance by one tick, returning `(source address, OAM index)` when a
    /// byte must be copied this tick.
    pub fn tick(&mut self) -> Option<(u16, u8)> {
        if !self.active {
            return None;
        }
        if self.delay > 0 {
            self.delay -= 1;
            return None;
        }
        let idx = self.index;
        let src = self.source().wrapping_add(idx as u16);
        self.index += 1;
        if self.index >= DMA_LENGTH {
            self.active = false;
            self.restarted = false;
        }
        Some((src, idx))
    }

    fn source(&self) -> u16 {
        (self.page as u16) << 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_then_one_byte_per_tick() {
        let mut dma = Dma::new();
        dma.start(0xC1);
        assert_eq!(dma.tick(), None);
        assert_eq!(dma.tick(), None);
        assert!(!dma.transferring() || dma.active());
        assert_eq!(dma.tick(), Some((0xC100, 0)));
        assert_eq!(dma.tick(), Some((0xC101, 1)));
        assert!(dma.transferring());
    }

    #[test]
    fn finishes_after_162_ticks() {
        let mut dma = Dma::new();
        dma.start(0x80);
        let copied = (0..161).filter_map(|_| dma.tick()).count();
        assert_eq!(copied, 159);
        assert!(dma.active());
        assert_eq!(dma.tick(), Some((0x809F, 0x9F)));
        assert!(!dma.active());
        assert_eq!(dma.tick(), None);
        assert_eq!(dma.page(), 0x80);
    }

    #[test]
    fn restart_mid_transfer_resets_index() {
        let mut dma = Dma::new();
        dma.start(0xC0);
        for _ in 0..50 {
            dma.tick();
        }
        dma.start(0xD0);
        assert!(!dma.transferring());
        assert!(dma.blocks_oam());
        dma.tick();
        dma.tick();
        assert_eq!(dma.tick(), Some((0xD000, 0)));
    }

    #[test]
    fn fresh_start_leaves_oam_open_during_delay() {
        let mut dma = Dma::new();
        dma.start(0xC0);
        assert!(!dma.blocks_oam());
        dma.tick();
        dma.tick();
        dma.tick();
        assert!(dma.blocks_oam());
        for _ in 0..DMA_LENGTH {
            dma.tick();
        }
        assert!(!dma.blocks_oam());

        // Starting again after completion is a fresh start.
        dma.start(0xC0);
        assert!(!dma.blocks_oam());
    }
}
