use crate::interrupts::{Interrupt, Interrupts};

/// DIV/TIMA/TMA/TAC block.
///
/// TIMA is clocked by the falling edge of `signal`, which is one bit of the
/// internal counter gated by the TAC enable bit. Anything that changes either
/// input (ticking, writing DIV, writing TAC) can produce that edge.
pub struct Timer {
    /// 16-bit internal divider counter. DIV register is the upper 8 bits.
    pub div: u16,
    pub tima: u8,
    pub tma: u8,
    pub tac: u8,
    last_signal: bool,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            div: 0,
            tima: 0,
            tma: 0,
            tac: 0,
            last_signal: false,
        }
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0xFF04 => (self.div >> 8) as u8,
            0xFF05 => self.tima,
            0xFF06 => self.tma,
            0xFF07 => self.tac | 0xF8,
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8, irqs: &mut Interrupts) {
        match addr {
            0xFF04 => self.reset_div(irqs),
            0xFF05 => self.tima = val,
            0xFF06 => self.tma = val,
            0xFF07 => {
                self.tac = val & 0x07;
                self.update_signal(irqs);
            }
            _ => {}
        }
    }

    /// Advance the timer by `cycles` clock ticks.
    pub fn step(&mut self, cycles: u16, irqs: &mut Interrupts) {
        for _ in 0..cycles {
            self.div = self.div.wrapping_add(1);
            self.update_signal(irqs);
        }
    }

    /// Reset the internal divider counter, applying TIMA edge logic.
    pub fn reset_div(&mut self, irqs: &mut Interrupts) {
        self.div = 0;
        self.update_signal(irqs);
    }

    fn update_signal(&mut self, irqs: &mut Interrupts) {
        let new = Self::signal_with(self.div, self.tac);
        if self.last_signal && !new {
            self.increment(irqs);
        }
        self.last_signal = new;
    }

    fn increment(&mut self, irqs: &mut Interrupts) {
        let (next, overflow) = self.tima.overflowing_add(1);
        if overflow {
            self.tima = self.tma;
            irqs.request(Interrupt::Timer);
        } else {
            self.tima = next;
        }
    }

    /// Bit of the internal counter watched for each TAC clock select.
    pub const fn tap_bit(tac: u8) -> u16 {
        match tac & 0x03 {
            0x00 => 9,
            0x01 => 3,
            0x02 => 5,
            _ => 7,
        }
    }

    fn signal_with(div: u16, tac: u8) -> bool {
        tac & 0x04 != 0 && (div >> Self::tap_bit(tac)) & 1 != 0
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
