use crate::interrupts::{Interrupt, Interrupts};

const SELECT_DPAD: u8 = 0x10;
const SELECT_BUTTONS: u8 = 0x20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    A,
    B,
    Select,
    Start,
    Right,
    Left,
    Up,
    Down,
}

impl Button {
    pub const ALL: [Button; 8] = [
        Button::A,
        Button::B,
        Button::Select,
        Button::Start,
        Button::Right,
        Button::Left,
        Button::Up,
        Button::Down,
    ];

    /// Bit in the pressed mask: action buttons in the low nibble,
    /// directions in the high nibble.
    const fn mask(self) -> u8 {
        1 << self as u8
    }

    const fn select_line(self) -> u8 {
        match self {
            Button::A | Button::B | Button::Select | Button::Start => SELECT_BUTTONS,
            _ => SELECT_DPAD,
        }
    }
}

/// P1/JOYP register.
#[derive(Debug, Clone)]
pub struct Joypad {
    /// Select bits 4-5 as last written (active low).
    select: u8,
    /// Pressed buttons, one bit per [`Button`].
    pressed: u8,
}

impl Joypad {
    pub fn new() -> Self {
        Self {
            select: SELECT_DPAD | SELECT_BUTTONS,
            pressed: 0,
        }
    }

    pub fn read(&self) -> u8 {
        let mut lo = 0x0F;
        if self.select & SELECT_BUTTONS == 0 {
            lo &= !self.pressed & 0x0F;
        }
        if self.select & SELECT_DPAD == 0 {
            lo &= !(self.pressed >> 4) & 0x0F;
        }
        0xC0 | self.select | lo
    }

    pub fn write(&mut self, val: u8) {
        self.select = val & (SELECT_DPAD | SELECT_BUTTONS);
    }

    pub fn press(&mut self, button: Button, irqs: &mut Interrupts) {
        let newly = self.pressed & button.mask() == 0;
        self.pressed |= button.mask();
        if newly && self.select & button.select_line() == 0 {
            irqs.request(Interrupt::Joypad);
        }
    }

    pub fn release(&mut self, button: Button) {
        self.pressed &= !button.mask();
    }

    pub fn is_pressed(&self, button: Button) -> bool {
        self.pressed & button.mask() != 0
    }
}

impl Default for Joypad {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_selected_reads_all_released() {
        let mut pad = Joypad::new();
        let mut irqs = Interrupts::new();
        pad.press(Button::A, &mut irqs);
        pad.write(0x30);
        assert_eq!(pad.read(), 0xFF);
    }

    #[test]
    fn selected_group_reads_active_low() {
        let mut pad = Joypad::new();
        let mut irqs = Interrupts::new();
        pad.press(Button::Start, &mut irqs);
        pad.press(Button::Left, &mut irqs);

        pad.write(0x10);
        assert_eq!(pad.read(), 0xD0 | 0x07);
        pad.write(0x20);
        assert_eq!(pad.read(), 0xE0 | 0x0D);
        pad.write(0x00);
        assert_eq!(pad.read(), 0xC0 | 0x05);

        pad.release(Button::Start);
        pad.write(0x10);
        assert_eq!(pad.read(), 0xDF);
    }

    #[test]
    fn press_on_selected_line_requests_interrupt() {
        let mut pad = Joypad::new();
        let mut irqs = Interrupts::new();
        irqs.write_if(0);

        pad.write(0x20);
        pad.press(Button::A, &mut irqs);
        assert_eq!(irqs.flags() & Interrupt::Joypad.bit(), 0);

        pad.press(Button::Down, &mut irqs);
        assert_ne!(irqs.flags() & Interrupt::Joypad.bit(), 0);
        assert!(pad.is_pressed(Button::Down));
    }
}
