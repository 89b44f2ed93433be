//! Length counter, volume envelope and frequency sweep shared by the channels.

/// Down-counter that silences a channel when it expires.
#[derive(Debug, Clone, Copy, Default)]
pub struct LengthCounter {
    counter: u16,
    /// One-shot mode; when clear the channel plays continuously.
    pub enabled: bool,
    max: u16,
}

impl LengthCounter {
    pub fn new(max: u16) -> Self {
        Self {
            counter: 0,
            enabled: false,
            max,
        }
    }

    /// Load from the length field of NRx1.
    pub fn load(&mut self, value: u8) {
        self.counter = self.max - value as u16;
    }

    pub fn value(&self) -> u16 {
        self.counter
    }

    /// Reload to the maximum if the counter has run out.
    pub fn trigger(&mut self) {
        if self.counter == 0 {
            self.counter = self.max;
        }
    }

    /// Returns true when this clock expired the counter.
    pub fn clock(&mut self) -> bool {
        if self.enabled && self.counter > 0 {
            self.counter -= 1;
            return self.counter == 0;
        }
        false
    }
}

/// Volume envelope (NRx2).
#[derive(Debug, Clone, Copy, Default)]
pub struct Envelope {
    initial: u8,
    add: bool,
    pace: u8,
    timer: u8,
    pub volume: u8,
}

impl Envelope {
    pub fn write(&mut self, val: u8) {
        self.initial = val >> 4;
        self.add = val & 0x08 != 0;
        self.pace = val & 0x07;
    }

    pub fn trigger(&mut self) {
        self.volume = self.initial;
        self.timer = self.pace;
    }

    /// Step the volume once every `pace` clocks, saturating at 0 and 15.
    pub fn clock(&mut self) {
        if self.pace == 0 {
            return;
        }
        if self.timer > 0 {
            self.timer -= 1;
        }
        if self.timer == 0 {
            self.timer = self.pace;
            if self.add && self.volume < 15 {
                self.volume += 1;
            } else if !self.add && self.volume > 0 {
                self.volume -= 1;
            }
        }
    }
}

/// Channel 1 frequency sweep (NR10).
#[derive(Debug, Clone, Copy, Default)]
pub struct Sweep {
    pace: u8,
    negate: bool,
    shift: u8,
    timer: u8,
    shadow: u16,
    enabled: bool,
}

/// Result of a sweep clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepResult {
    Unchanged,
    Frequency(u16),
    Overflow,
}

impl Sweep {
    pub fn write(&mut self, val: u8) {
        self.pace = (val >> 4) & 0x07;
        self.negate = val & 0x08 != 0;
        self.shift = val & 0x07;
    }

    fn calculate(&self) -> u16 {
        let delta = self.shadow >> self.shift;
        if self.negate {
            self.shadow.wrapping_sub(delta)
        } else {
            self.shadow + delta
        }
    }

    fn reload_timer(&mut self) {
        self.timer = if self.pace == 0 { 8 } else { self.pace };
    }

    /// Latch the channel frequency on trigger. Returns false when the
    /// immediate overflow check fails.
    pub fn trigger(&mut self, frequency: u16) -> bool {
        self.shadow = frequency;
        self.reload_timer();
        self.enabled = self.pace != 0 || self.shift != 0;
        !(self.shift != 0 && self.calculate() > 2047)
    }

    pub fn clock(&mut self) -> SweepResult {
        if self.timer > 0 {
            self.timer -= 1;
        }
        if self.timer != 0 {
            return SweepResult::Unchanged;
        }
        self.reload_timer();
        if !self.enabled || self.pace == 0 {
            return SweepResult::Unchanged;
        }
        let next = self.calculate();
        if next > 2047 {
            self.enabled = false;
            return SweepResult::Overflow;
        }
        if self.shift == 0 {
            return SweepResult::Unchanged;
        }
        self.shadow = next;
        if self.calculate() > 2047 {
            self.enabled = false;
            return SweepResult::Overflow;
        }
        SweepResult::Frequency(next)
    }
}
