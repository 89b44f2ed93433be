//! The four sound generators. Each one is advanced once per T-cycle by
//! `tick` and clocked by the frame sequencer through the unit helpers.

use super::units::{Envelope, LengthCounter, Sweep, SweepResult};

// 0 -> 00000001 (12.5%)
// 1 -> 10000001 (25%)
// 2 -> 10000111 (50%)
// 3 -> 01111110 (75%)
const DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 0, 0, 0, 0, 0, 0, 1],
    [1, 0, 0, 0, 0, 0, 0, 1],
    [1, 0, 0, 0, 0, 1, 1, 1],
    [0, 1, 1, 1, 1, 1, 1, 0],
];

pub const WAVE_RAM_SIZE: usize = 0x10;

#[derive(Debug, Clone)]
pub struct SquareChannel {
    pub enabled: bool,
    pub dac_enabled: bool,
    pub length: LengthCounter,
    pub envelope: Envelope,
    sweep: Option<Sweep>,
    duty: u8,
    duty_pos: u8,
    frequency: u16,
    timer: u32,
}

impl SquareChannel {
    pub fn new(with_sweep: bool) -> Self {
        Self {
            enabled: false,
            dac_enabled: false,
            length: LengthCounter::new(64),
            envelope: Envelope::default(),
            sweep: with_sweep.then(Sweep::default),
            duty: 0,
            duty_pos: 0,
            frequency: 0,
            timer: 0,
        }
    }

    pub fn frequency(&self) -> u16 {
        self.frequency
    }

    fn period(&self) -> u32 {
        (2048 - self.frequency as u32) * 4
    }

    pub fn write_sweep(&mut self, val: u8) {
        if let Some(sweep) = self.sweep.as_mut() {
            sweep.write(val);
        }
    }

    /// NRx1: duty in bits 6-7, length in bits 0-5.
    pub fn write_duty_length(&mut self, val: u8) {
        self.duty = val >> 6;
        self.length.load(val & 0x3F);
    }

    /// NRx2. Clearing the top five bits turns the DAC off and silences the channel.
    pub fn write_envelope(&mut self, val: u8) {
        self.envelope.write(val);
        self.dac_enabled = val & 0xF8 != 0;
        if !self.dac_enabled {
            self.enabled = false;
        }
    }

    pub fn write_frequency_low(&mut self, val: u8) {
        self.frequency = (self.frequency & 0x700) | val as u16;
    }

    /// NRx4 without the trigger bit; returns whether a trigger was requested.
    pub fn write_control(&mut self, val: u8) -> bool {
        self.frequency = (self.frequency & 0xFF) | (((val & 0x07) as u16) << 8);
        self.length.enabled = val & 0x40 != 0;
        val & 0x80 != 0
    }

    pub fn trigger(&mut self) {
        self.enabled = self.dac_enabled;
        self.length.trigger();
        self.envelope.trigger();
        self.timer = self.period();
        let frequency = self.frequency;
        if let Some(sweep) = self.sweep.as_mut() {
            if !sweep.trigger(frequency) {
                self.enabled = false;
            }
        }
    }

    pub fn tick(&mut self) {
        if !self.enabled {
            return;
        }
        self.timer = self.timer.saturating_sub(1);
        if self.timer == 0 {
            self.timer = self.period();
            self.duty_pos = (self.duty_pos + 1) & 7;
        }
    }

    pub fn clock_length(&mut self) {
        if self.length.clock() {
            self.enabled = false;
        }
    }

    pub fn clock_envelope(&mut self) {
        if self.enabled {
            self.envelope.clock();
        }
    }

    pub fn clock_sweep(&mut self) {
        if !self.enabled {
            return;
        }
        let Some(sweep) = self.sweep.as_mut() else {
            return;
        };
        match sweep.clock() {
            SweepResult::Unchanged => {}
            SweepResult::Frequency(freq) => self.frequency = freq,
            SweepResult::Overflow => self.enabled = false,
        }
    }

    pub fn output(&self) -> u8 {
        if !self.enabled || !self.dac_enabled {
            return 0;
        }
        DUTY_TABLE[self.duty as usize][self.duty_pos as usize] * self.envelope.volume
    }
}

#[derive(Debug, Clone)]
pub struct WaveChannel {
    pub enabled: bool,
    pub dac_enabled: bool,
    pub length: LengthCounter,
    volume_code: u8,
    position: u8,
    sample: u8,
    frequency: u16,
    timer: u32,
}

impl WaveChannel {
    pub fn new() -> Self {
        Self {
            enabled: false,
            dac_enabled: false,
            length: LengthCounter::new(255),
            volume_code: 0,
            position: 0,
            sample: 0,
            frequency: 0,
            timer: 0,
        }
    }

    fn period(&self) -> u32 {
        (2048 - self.frequency as u32) * 2
    }

    pub fn position(&self) -> u8 {
        self.position
    }

    pub fn write_dac(&mut self, val: u8) {
        self.dac_enabled = val & 0x80 != 0;
        if !self.dac_enabled {
            self.enabled = false;
        }
    }

    pub fn write_volume(&mut self, val: u8) {
        self.volume_code = (val >> 5) & 0x03;
    }

    pub fn write_frequency_low(&mut self, val: u8) {
        self.frequency = (self.frequency & 0x700) | val as u16;
    }

    pub fn write_control(&mut self, val: u8) -> bool {
        self.frequency = (self.frequency & 0xFF) | (((val & 0x07) as u16) << 8);
        self.length.enabled = val & 0x40 != 0;
        val & 0x80 != 0
    }

    pub fn trigger(&mut self) {
        self.enabled = self.dac_enabled;
        self.length.trigger();
        self.position = 0;
        self.timer = self.period();
    }

    pub fn tick(&mut self, wave_ram: &[u8; WAVE_RAM_SIZE]) {
        if !self.enabled {
            return;
        }
        self.timer = self.timer.saturating_sub(1);
        if self.timer == 0 {
            self.timer = self.period();
            self.position = (self.position + 1) & 0x1F;
            let byte = wave_ram[(self.position / 2) as usize];
            self.sample = if self.position & 1 == 0 {
                byte >> 4
            } else {
                byte & 0x0F
            };
        }
    }

    pub fn clock_length(&mut self) {
        if self.length.clock() {
            self.enabled = false;
        }
    }

    pub fn output(&self) -> u8 {
        if !self.enabled || !self.dac_enabled {
            return 0;
        }
        match self.volume_code {
            1 => self.sample,
            2 => self.sample >> 1,
            3 => self.sample >> 2,
            _ => 0,
        }
    }
}

impl Default for WaveChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct NoiseChannel {
    pub enabled: bool,
    pub dac_enabled: bool,
    pub length: LengthCounter,
    pub envelope: Envelope,
    clock_shift: u8,
    width7: bool,
    divisor: u8,
    lfsr: u16,
    timer: u32,
}

impl NoiseChannel {
    pub fn new() -> Self {
        Self {
            enabled: false,
            dac_enabled: false,
            length: LengthCounter::new(64),
            envelope: Envelope::default(),
            clock_shift: 0,
            width7: false,
            divisor: 0,
            lfsr: 0x7FFF,
            timer: 0,
        }
    }

    fn period(&self) -> u32 {
        let base = match self.divisor {
            0 => 8,
            d => d as u32 * 16,
        };
        base << self.clock_shift
    }

    pub fn lfsr(&self) -> u16 {
        self.lfsr
    }

    pub fn write_length(&mut self, val: u8) {
        self.length.load(val & 0x3F);
    }

    pub fn write_envelope(&mut self, val: u8) {
        self.envelope.write(val);
        self.dac_enabled = val & 0xF8 != 0;
        if !self.dac_enabled {
            self.enabled = false;
        }
    }

    /// NR43: clock shift, 7-bit width flag and divisor code.
    pub fn write_polynomial(&mut self, val: u8) {
        self.clock_shift = val >> 4;
        self.width7 = val & 0x08 != 0;
        self.divisor = val & 0x07;
    }

    pub fn write_control(&mut self, val: u8) -> bool {
        self.length.enabled = val & 0x40 != 0;
        val & 0x80 != 0
    }

    pub fn trigger(&mut self) {
        self.enabled = self.dac_enabled;
        self.length.trigger();
        self.envelope.trigger();
        self.lfsr = 0x7FFF;
        self.timer = self.period();
    }

    pub fn tick(&mut self) {
        if !self.enabled || self.clock_shift >= 14 {
            return;
        }
        self.timer = self.timer.saturating_sub(1);
        if self.timer == 0 {
            self.timer = self.period();
            self.shift_lfsr();
        }
    }

    // Stored inverted relative to the hardware register, which clears to
    // zero and feeds back XNOR. The all-ones reset value is the same state.
    fn shift_lfsr(&mut self) {
        let bit = (self.lfsr ^ (self.lfsr >> 1)) & 1;
        self.lfsr = (self.lfsr >> 1) | (bit << 14);
        if self.width7 {
            self.lfsr = (self.lfsr & !0x40) | (bit << 6);
        }
    }

    pub fn clock_length(&mut self) {
        if self.length.clock() {
            self.enabled = false;
        }
    }

    pub fn clock_envelope(&mut self) {
        if self.enabled {
            self.envelope.clock();
        }
    }

    pub fn output(&self) -> u8 {
        if !self.enabled || !self.dac_enabled {
            return 0;
        }
        if self.lfsr & 1 != 0 {
            self.envelope.volume
        } else {
            0
        }
    }
}

impl Default for NoiseChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_duty_advances_every_period() {
        let mut ch = SquareChannel::new(false);
        ch.write_duty_length(0x80); // 50%
        ch.write_envelope(0xF0);
        ch.write_frequency_low(0xFF);
        assert!(ch.write_control(0x87)); // frequency 0x7FF, period 4
        ch.trigger();
        assert!(ch.enabled);
        // Each group of four ticks lands on the next pattern position, 1 through 0.
        let mut outputs = Vec::new();
        for _ in 0..8 {
            for _ in 0..4 {
                ch.tick();
            }
            outputs.push(ch.output());
        }
        assert_eq!(outputs, vec![0, 0, 0, 0, 15, 15, 15, 15]);
    }

    #[test]
    fn trigger_without_dac_keeps_channel_off() {
        let mut ch = SquareChannel::new(false);
        ch.write_envelope(0x00);
        ch.trigger();
        assert!(!ch.enabled);
        assert_eq!(ch.output(), 0);
    }

    #[test]
    fn sweep_overflow_on_trigger_disables_channel() {
        let mut ch = SquareChannel::new(true);
        ch.write_sweep(0x11);
        ch.write_envelope(0xF0);
        ch.write_frequency_low(0xF0);
        ch.write_control(0x87);
        ch.trigger();
        assert!(!ch.enabled);
    }

    #[test]
    fn wave_volume_codes_shift_sample() {
        let mut ram = [0u8; WAVE_RAM_SIZE];
        ram[0] = 0x8C;
        let mut ch = WaveChannel::new();
        ch.write_dac(0x80);
        ch.write_frequency_low(0xFF);
        ch.write_control(0x87); // period 2
        ch.trigger();
        ch.write_volume(0x20);
        for _ in 0..2 {
            ch.tick(&ram);
        }
        assert_eq!(ch.position(), 1);
        assert_eq!(ch.output(), 0x0C);
        ch.write_volume(0x40);
        assert_eq!(ch.output(), 0x06);
        ch.write_volume(0x60);
        assert_eq!(ch.output(), 0x03);
        ch.write_volume(0x00);
        assert_eq!(ch.output(), 0);
    }

    #[test]
    fn noise_lfsr_resets_and_shifts() {
        let mut ch = NoiseChannel::new();
        ch.write_envelope(0xF0);
        ch.write_polynomial(0x00); // period 8
        ch.trigger();
        assert_eq!(ch.lfsr(), 0x7FFF);
        assert_eq!(ch.output(), 15);
        for _ in 0..8 {
            ch.tick();
        }
        // 1 ^ 1 feeds a zero into bit 14.
        assert_eq!(ch.lfsr(), 0x3FFF);
    }

    #[test]
    fn noise_width7_mirrors_feedback_into_bit6() {
        let mut ch = NoiseChannel::new();
        ch.write_envelope(0xF0);
        ch.write_polynomial(0x08);
        ch.trigger();
        for _ in 0..8 {
            ch.tick();
        }
        assert_eq!(ch.lfsr(), 0x3FBF);
    }

    #[test]
    fn length_expiry_silences_noise() {
        let mut ch = NoiseChannel::new();
        ch.write_envelope(0xF0);
        ch.write_length(0x3F);
        ch.write_control(0xC0);
        ch.trigger();
        assert!(ch.enabled);
        ch.clock_length();
        assert!(!ch.enabled);
    }
}
