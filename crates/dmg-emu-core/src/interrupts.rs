// Interrupt vectors (gbdev.io/pandocs/Interrupts.html)
const VECTOR_VBLANK: u16 = 0x40;
const VECTOR_STAT: u16 = 0x48;
const VECTOR_TIMER: u16 = 0x50;
const VECTOR_SERIAL: u16 = 0x58;
const VECTOR_JOYPAD: u16 = 0x60;

const INTERRUPT_MASK: u8 = 0x1F;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interrupt {
    VBlank,
    Stat,
    Timer,
    Serial,
    Joypad,
}

impl Interrupt {
    /// All interrupt sources from highest to lowest priority.
    pub const PRIORITY: [Interrupt; 5] = [
        Interrupt::VBlank,
        Interrupt::Stat,
        Interrupt::Timer,
        Interrupt::Serial,
        Interrupt::Joypad,
    ];

    pub const fn bit(self) -> u8 {
        match self {
            Interrupt::VBlank => 0x01,
            Interrupt::Stat => 0x02,
            Interrupt::Timer => 0x04,
            Interrupt::Serial => 0x08,
            Interrupt::Joypad => 0x10,
        }
    }

    pub const fn vector(self) -> u16 {
        match self {
            Interrupt::VBlank => VECTOR_VBLANK,
            Interrupt::Stat => VECTOR_STAT,
            Interrupt::Timer => VECTOR_TIMER,
            Interrupt::Serial => VECTOR_SERIAL,
            Interrupt::Joypad => VECTOR_JOYPAD,
        }
    }

    /// Highest-priority interrupt whose bit is set in `pending`.
    pub fn highest(pending: u8) -> Option<Interrupt> {
        Self::PRIORITY
            .into_iter()
            .find(|irq| pending & irq.bit() != 0)
    }
}

/// IF/IE register pair.
///
/// Peripherals receive `&mut Interrupts` while ticking and call
/// [`Interrupts::request`] instead of poking IF bits directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupts {
    flags: u8,
    enable: u8,
}

impl Interrupts {
    pub fn new() -> Self {
        Self {
            flags: 0x01,
            enable: 0x00,
        }
    }

    #[inline]
    pub fn request(&mut self, irq: Interrupt) {
        self.flags |= irq.bit();
    }

    #[inline]
    pub fn clear(&mut self, irq: Interrupt) {
        self.flags &= !irq.bit();
    }

    #[inline]
    pub fn flags(&self) -> u8 {
        self.flags
    }

    #[inline]
    pub fn enable(&self) -> u8 {
        self.enable
    }

    /// IF as seen by the CPU; the upper three bits are unused and read as 1.
    pub fn read_if(&self) -> u8 {
        self.flags | 0xE0
    }

    pub fn write_if(&mut self, val: u8) {
        self.flags = val & INTERRUPT_MASK;
    }

    pub fn read_ie(&self) -> u8 {
        self.enable
    }

    pub fn write_ie(&mut self, val: u8) {
        self.enable = val;
    }
}

impl Default for Interrupts {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_follows_fixed_priority() {
        assert_eq!(Interrupt::highest(0x00), None);
        assert_eq!(Interrupt::highest(0x1F), Some(Interrupt::VBlank));
        assert_eq!(Interrupt::highest(0x14), Some(Interrupt::Timer));
        assert_eq!(Interrupt::highest(0x18), Some(Interrupt::Serial));
        assert_eq!(Interrupt::highest(0x10), Some(Interrupt::Joypad));
    }

    #[test]
    fn request_and_clear_touch_only_if() {
        let mut irqs = Interrupts::new();
        irqs.write_if(0);
        irqs.request(Interrupt::Timer);
        assert_eq!(irqs.flags(), Interrupt::Timer.bit());
        assert_eq!(irqs.enable(), 0);
        irqs.write_ie(Interrupt::Timer.bit());
        irqs.clear(Interrupt::Timer);
        assert_eq!(irqs.flags(), 0);
        assert_eq!(irqs.enable(), Interrupt::Timer.bit());
    }

    #[test]
    fn if_upper_bits_read_high() {
        let mut irqs = Interrupts::new();
        irqs.write_if(0xFF);
        assert_eq!(irqs.flags(), 0x1F);
        assert_eq!(irqs.read_if(), 0xFF);
        irqs.write_if(0x00);
        assert_eq!(irqs.read_if(), 0xE0);
    }
}
