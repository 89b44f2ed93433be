use std::collections::VecDeque;

mod channels;
mod units;

use channels::{NoiseChannel, SquareChannel, WaveChannel, WAVE_RAM_SIZE};

#[cfg(feature = "apu-trace")]
macro_rules! apu_trace {
    ($($arg:tt)*) => {
        log::trace!(target: "apu", $($arg)*);
    };
}
#[cfg(not(feature = "apu-trace"))]
macro_rules! apu_trace {
    ($($arg:tt)*) => {};
}

pub const CPU_CLOCK_HZ: u32 = 4_194_304;
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
const VOLUME_FACTOR: i16 = 64;
pub const AUDIO_LATENCY_MS: u32 = 40;
// Falling edges of this DIV bit step the frame sequencer (every 8192 T-cycles).
const SEQUENCER_DIV_BIT: u16 = 12;

const NR52: u16 = 0xFF26;
const WAVE_RAM: std::ops::RangeInclusive<u16> = 0xFF30..=0xFF3F;

// Register state left behind by the boot ROM, NR10 through NR51.
const POST_BOOT_REGS: [(u16, u8); 19] = [
    (0xFF10, 0x80),
    (0xFF11, 0xBF),
    (0xFF12, 0xF3),
    (0xFF13, 0xFF),
    (0xFF14, 0x3F),
    (0xFF16, 0x3F),
    (0xFF17, 0x00),
    (0xFF18, 0xFF),
    (0xFF19, 0x3F),
    (0xFF1A, 0x7F),
    (0xFF1B, 0xFF),
    (0xFF1C, 0x9F),
    (0xFF1D, 0xFF),
    (0xFF1E, 0x3F),
    (0xFF20, 0xFF),
    (0xFF21, 0x00),
    (0xFF22, 0x00),
    (0xFF23, 0x3F),
    (0xFF24, 0x77),
];
const POST_BOOT_NR51: u8 = 0xF3;

/// Receives mixed stereo samples as they are produced.
pub trait AudioSink: Send {
    fn push_sample(&mut self, left: i16, right: i16);
}

impl<F> AudioSink for F
where
    F: FnMut(i16, i16) + Send,
{
    fn push_sample(&mut self, left: i16, right: i16) {
        self(left, right)
    }
}

struct FrameSequencer {
    step: u8,
}

impl FrameSequencer {
    fn new() -> Self {
        Self { step: 0 }
    }

    fn advance(&mut self) -> u8 {
        let s = self.step;
        self.step = (self.step + 1) & 7;
        s
    }
}

pub struct Apu {
    ch1: SquareChannel,
    ch2: SquareChannel,
    ch3: WaveChannel,
    ch4: NoiseChannel,
    wave_ram: [u8; WAVE_RAM_SIZE],
    /// Raw bytes last written to NR10..NR51, indexed from 0xFF10.
    regs: [u8; 0x16],
    nr50: u8,
    nr51: u8,
    powered: bool,
    sequencer: FrameSequencer,
    sample_rate: u32,
    sample_timer: u32,
    samples: VecDeque<(i16, i16)>,
    sink: Option<Box<dyn AudioSink>>,
    hp_coef: f32,
    hp_prev_input_left: f32,
    hp_prev_output_left: f32,
    hp_prev_input_right: f32,
    hp_prev_output_right: f32,
}

impl Apu {
    fn calc_hp_coef(rate: u32) -> f32 {
        0.999_958_f32.powf(CPU_CLOCK_HZ as f32 / rate as f32)
    }

    fn max_queued(&self) -> usize {
        (self.sample_rate * AUDIO_LATENCY_MS / 1000) as usize
    }

    fn read_mask(addr: u16) -> u8 {
        match addr {
            0xFF10 => 0x80,
            0xFF11 => 0x3F,
            0xFF12 => 0x00,
            0xFF13 => 0xFF,
            0xFF14 => 0xBF,
            0xFF16 => 0x3F,
            0xFF17 => 0x00,
            0xFF18 => 0xFF,
            0xFF19 => 0xBF,
            0xFF1A => 0x7F,
            0xFF1B => 0xFF,
            0xFF1C => 0x9F,
            0xFF1D => 0xFF,
            0xFF1E => 0xBF,
            0xFF20 => 0xFF,
            0xFF21 => 0x00,
            0xFF22 => 0x00,
            0xFF23 => 0xBF,
            0xFF24 => 0x00,
            0xFF25 => 0x00,
            0xFF26 => 0x70,
            0xFF15 | 0xFF1F => 0xFF,
            0xFF30..=0xFF3F => 0x00,
            _ => 0xFF,
        }
    }

    /// APU in its power-on state: everything silent and NR52 cleared.
    pub fn new_power_on() -> Self {
        Self {
            ch1: SquareChannel::new(true),
            ch2: SquareChannel::new(false),
            ch3: WaveChannel::new(),
            ch4: NoiseChannel::new(),
            wave_ram: [0; WAVE_RAM_SIZE],
            regs: [0; 0x16],
            nr50: 0,
            nr51: 0,
            powered: false,
            sequencer: FrameSequencer::new(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            sample_timer: 0,
            samples: VecDeque::new(),
            sink: None,
            hp_coef: Apu::calc_hp_coef(DEFAULT_SAMPLE_RATE),
            hp_prev_input_left: 0.0,
            hp_prev_output_left: 0.0,
            hp_prev_input_right: 0.0,
            hp_prev_output_right: 0.0,
        }
    }

    /// APU as the boot ROM leaves it. No channel is left playing.
    pub fn new() -> Self {
        let mut apu = Self::new_power_on();
        apu.write_reg(NR52, 0x80);
        for (addr, val) in POST_BOOT_REGS {
            apu.write_reg(addr, val);
        }
        apu.write_reg(0xFF25, POST_BOOT_NR51);
        apu
    }

    fn power_off(&mut self) {
        self.ch1 = SquareChannel::new(true);
        self.ch2 = SquareChannel::new(false);
        self.ch3 = WaveChannel::new();
        self.ch4 = NoiseChannel::new();
        self.regs.fill(0);
        self.nr50 = 0;
        self.nr51 = 0;
        self.samples.clear();
        self.reset_filter();
    }

    fn reset_filter(&mut self) {
        self.hp_prev_input_left = 0.0;
        self.hp_prev_output_left = 0.0;
        self.hp_prev_input_right = 0.0;
        self.hp_prev_output_right = 0.0;
    }

    pub fn read_reg(&self, addr: u16) -> u8 {
        if addr == NR52 {
            let mut val = if self.powered { 0x80 } else { 0x00 };
            if self.ch1.enabled {
                val |= 0x01;
            }
            if self.ch2.enabled {
                val |= 0x02;
            }
            if self.ch3.enabled {
                val |= 0x04;
            }
            if self.ch4.enabled {
                val |= 0x08;
            }
            return val | Apu::read_mask(addr);
        }

        if WAVE_RAM.contains(&addr) {
            if self.ch3.enabled {
                return 0xFF;
            }
            return self.wave_ram[(addr - 0xFF30) as usize];
        }

        match addr {
            0xFF10..=0xFF25 => self.regs[(addr - 0xFF10) as usize] | Apu::read_mask(addr),
            _ => 0xFF,
        }
    }

    pub fn write_reg(&mut self, addr: u16, val: u8) {
        if WAVE_RAM.contains(&addr) {
            if !self.ch3.enabled {
                self.wave_ram[(addr - 0xFF30) as usize] = val;
            }
            return;
        }
        if addr == NR52 {
            self.write_power(val);
            return;
        }
        if !self.powered || !(0xFF10..=0xFF25).contains(&addr) {
            return;
        }

        self.regs[(addr - 0xFF10) as usize] = val;
        match addr {
            0xFF10 => self.ch1.write_sweep(val),
            0xFF11 => self.ch1.write_duty_length(val),
            0xFF12 => self.ch1.write_envelope(val),
            0xFF13 => self.ch1.write_frequency_low(val),
            0xFF14 => {
                if self.ch1.write_control(val) {
                    apu_trace!("ch1 trigger freq={:03X}", self.ch1.frequency());
                    self.ch1.trigger();
                }
            }
            0xFF16 => self.ch2.write_duty_length(val),
            0xFF17 => self.ch2.write_envelope(val),
            0xFF18 => self.ch2.write_frequency_low(val),
            0xFF19 => {
                if self.ch2.write_control(val) {
                    apu_trace!("ch2 trigger freq={:03X}", self.ch2.frequency());
                    self.ch2.trigger();
                }
            }
            0xFF1A => self.ch3.write_dac(val),
            0xFF1B => self.ch3.length.load(val),
            0xFF1C => self.ch3.write_volume(val),
            0xFF1D => self.ch3.write_frequency_low(val),
            0xFF1E => {
                if self.ch3.write_control(val) {
                    apu_trace!("ch3 trigger");
                    self.ch3.trigger();
                }
            }
            0xFF20 => self.ch4.write_length(val),
            0xFF21 => self.ch4.write_envelope(val),
            0xFF22 => self.ch4.write_polynomial(val),
            0xFF23 => {
                if self.ch4.write_control(val) {
                    apu_trace!("ch4 trigger");
                    self.ch4.trigger();
                }
            }
            0xFF24 => self.nr50 = val,
            0xFF25 => self.nr51 = val,
            _ => {}
        }
    }

    fn write_power(&mut self, val: u8) {
        let on = val & 0x80 != 0;
        if on == self.powered {
            return;
        }
        log::debug!("APU power {}", if on { "on" } else { "off" });
        if on {
            self.sequencer.step = 0;
        } else {
            self.power_off();
        }
        self.powered = on;
    }

    fn clock_frame_sequencer(&mut self, step: u8) {
        if matches!(step, 0 | 2 | 4 | 6) {
            self.ch1.clock_length();
            self.ch2.clock_length();
            self.ch3.clock_length();
            self.ch4.clock_length();
        }
        if step == 2 || step == 6 {
            self.ch1.clock_sweep();
        }
        if step == 7 {
            self.ch1.clock_envelope();
            self.ch2.clock_envelope();
            self.ch4.clock_envelope();
        }
    }

    /// Run one frame-sequencer step directly.
    pub fn step_frame_sequencer(&mut self) {
        if !self.powered {
            return;
        }
        let step = self.sequencer.advance();
        self.clock_frame_sequencer(step);
    }

    /// A write to DIV while its sequencer bit is high counts as a falling edge.
    pub fn on_div_reset(&mut self, div_before: u16) {
        if (div_before >> SEQUENCER_DIV_BIT) & 1 == 1 {
            self.step_frame_sequencer();
        }
    }

    /// Advance by one T-cycle. `div_prev` and `div_now` are the timer's
    /// internal counter before and after the same cycle.
    pub fn tick(&mut self, div_prev: u16, div_now: u16) {
        if self.powered {
            let prev_bit = (div_prev >> SEQUENCER_DIV_BIT) & 1;
            let curr_bit = (div_now >> SEQUENCER_DIV_BIT) & 1;
            if prev_bit == 1 && curr_bit == 0 {
                self.step_frame_sequencer();
            }
            self.ch1.tick();
            self.ch2.tick();
            self.ch3.tick(&self.wave_ram);
            self.ch4.tick();
        }

        self.sample_timer += self.sample_rate;
        if self.sample_timer >= CPU_CLOCK_HZ {
            self.sample_timer -= CPU_CLOCK_HZ;
            let (left, right) = self.mix_output();
            self.emit(left, right);
        }
    }

    fn emit(&mut self, left: i16, right: i16) {
        if let Some(sink) = self.sink.as_mut() {
            sink.push_sample(left, right);
            return;
        }
        let max = self.max_queued();
        if self.samples.len() >= max {
            let excess = self.samples.len() + 1 - max;
            self.samples.drain(..excess);
        }
        self.samples.push_back((left, right));
    }

    fn mix_output(&mut self) -> (i16, i16) {
        let dacs_on = self.ch1.dac_enabled
            || self.ch2.dac_enabled
            || self.ch3.dac_enabled
            || self.ch4.dac_enabled;
        if !dacs_on {
            self.reset_filter();
            return (0, 0);
        }

        let outputs = [
            (self.ch1.dac_enabled, self.ch1.output()),
            (self.ch2.dac_enabled, self.ch2.output()),
            (self.ch3.dac_enabled, self.ch3.output()),
            (self.ch4.dac_enabled, self.ch4.output()),
        ];

        let mut left = 0i16;
        let mut right = 0i16;
        for (idx, (dac_on, out)) in outputs.into_iter().enumerate() {
            // A disconnected DAC contributes nothing, not its zero level.
            if !dac_on {
                continue;
            }
            let level = 8 - out as i16;
            if self.nr51 & (0x10 << idx) != 0 {
                left += level;
            }
            if self.nr51 & (0x01 << idx) != 0 {
                right += level;
            }
        }

        let left_vol = ((self.nr50 >> 4) & 0x07) as i16 + 1;
        let right_vol = (self.nr50 & 0x07) as i16 + 1;

        self.dc_block(
            left * left_vol * VOLUME_FACTOR,
            right * right_vol * VOLUME_FACTOR,
        )
    }

    fn dc_block(&mut self, left: i16, right: i16) -> (i16, i16) {
        let r = self.hp_coef;
        let left_in = left as f32;
        let right_in = right as f32;
        let left_out = left_in - self.hp_prev_input_left + r * self.hp_prev_output_left;
        let right_out = right_in - self.hp_prev_input_right + r * self.hp_prev_output_right;
        self.hp_prev_input_left = left_in;
        self.hp_prev_output_left = left_out;
        self.hp_prev_input_right = right_in;
        self.hp_prev_output_right = right_out;
        (left_out.round() as i16, right_out.round() as i16)
    }

    pub fn set_sample_rate(&mut self, rate: u32) {
        let rate = rate.clamp(1, CPU_CLOCK_HZ);
        self.sample_rate = rate;
        self.sample_timer = 0;
        self.hp_coef = Apu::calc_hp_coef(rate);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Route samples to `sink` instead of the internal queue.
    pub fn set_sink(&mut self, sink: Box<dyn AudioSink>) {
        self.samples.clear();
        self.sink = Some(sink);
    }

    pub fn clear_sink(&mut self) -> Option<Box<dyn AudioSink>> {
        self.sink.take()
    }

    pub fn pop_sample(&mut self) -> Option<(i16, i16)> {
        self.samples.pop_front()
    }

    pub fn queued_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn sequencer_step(&self) -> u8 {
        self.sequencer.step
    }

    pub fn powered(&self) -> bool {
        self.powered
    }

    pub fn ch1_frequency(&self) -> u16 {
        self.ch1.frequency()
    }

    pub fn ch3_length(&self) -> u16 {
        self.ch3.length.value()
    }

    pub fn ch4_lfsr(&self) -> u16 {
        self.ch4.lfsr()
    }
}

impl Default for Apu {
    fn default() -> Self {
        Self::new()
    }
}
