use thiserror::Error;

use crate::{
    apu::AudioSink,
    cartridge::Cartridge,
    cpu::{Cpu, StepOutcome},
    joypad::Button,
    mmu::Mmu,
    ppu::{SCREEN_HEIGHT, SCREEN_WIDTH},
    serial::LinkPort,
    trace::TraceSink,
};

/// T-cycles in one full frame of 154 lines.
pub const FRAME_CYCLES: u64 = 70_224;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EmuError {
    #[error("illegal opcode {opcode:#04X} at {pc:#06X}")]
    IllegalOpcode { opcode: u8, pc: u16 },
    #[error("no cartridge loaded")]
    NoCartridge,
}

pub struct GameBoy {
    pub cpu: Cpu,
    pub mmu: Mmu,
    power_on: bool,
}

impl GameBoy {
    /// Machine in the state the boot ROM hands over with, PC at 0x0100.
    pub fn new() -> Self {
        Self {
            cpu: Cpu::new(),
            mmu: Mmu::new(),
            power_on: false,
        }
    }

    /// Machine at power on, suitable for executing a boot ROM from 0x0000.
    pub fn new_power_on() -> Self {
        Self {
            cpu: Cpu::new_power_on(),
            mmu: Mmu::new_power_on(),
            power_on: true,
        }
    }

    pub fn load_cartridge(&mut self, cart: Cartridge) {
        self.mmu.load_cart(cart);
    }

    pub fn load_boot_rom(&mut self, data: Vec<u8>) {
        self.mmu.load_boot_rom(data);
    }

    /// Reset to the initial state this machine was created with.
    ///
    /// The cartridge, boot ROM, audio sink, trace sink, sample rate and
    /// palette survive; a connected link port does not.
    pub fn reset(&mut self) {
        let cart = self.mmu.take_cart();
        let boot = self.mmu.take_boot_rom();
        let sink = self.mmu.apu.clear_sink();
        let sample_rate = self.mmu.apu.sample_rate();
        let palette = self.mmu.ppu.palette();
        let trace = self.cpu.take_trace_sink();

        *self = if self.power_on {
            Self::new_power_on()
        } else {
            Self::new()
        };

        if let Some(c) = cart {
            self.mmu.load_cart(c);
        }
        if let Some(b) = boot {
            self.mmu.load_boot_rom(b);
        }
        if let Some(s) = sink {
            self.mmu.apu.set_sink(s);
        }
        self.mmu.apu.set_sample_rate(sample_rate);
        self.mmu.ppu.set_palette(palette);
        if let Some(t) = trace {
            self.cpu.set_trace_sink(t);
        }
        log::debug!("machine reset");
    }

    /// Execute one instruction, HALT cycle or interrupt dispatch.
    pub fn step(&mut self) -> StepOutcome {
        self.cpu.step(&mut self.mmu)
    }

    fn ensure_program(&self) -> Result<(), EmuError> {
        if self.mmu.cart.is_none() && !self.mmu.boot_rom_mapped() {
            return Err(EmuError::NoCartridge);
        }
        Ok(())
    }

    fn check(&self, outcome: StepOutcome) -> Result<(), EmuError> {
        match outcome {
            StepOutcome::FatalOpcode(opcode) => {
                let pc = self.cpu.fault().map(|f| f.pc).unwrap_or(self.cpu.regs.pc);
                Err(EmuError::IllegalOpcode { opcode, pc })
            }
            StepOutcome::Continue | StepOutcome::Halted => Ok(()),
        }
    }

    /// Run until the PPU enters VBlank and a new frame is available.
    ///
    /// With the LCD off no frame is ever produced, so the call returns after
    /// one frame's worth of cycles instead.
    pub fn run_frame(&mut self) -> Result<(), EmuError> {
        self.ensure_program()?;
        self.mmu.ppu.clear_frame_flag();
        let start = self.cpu.cycles();
        while !self.mmu.ppu.frame_ready() {
            let outcome = self.step();
            self.check(outcome)?;
            if self.cpu.cycles() - start >= FRAME_CYCLES {
                break;
            }
        }
        self.mmu.ppu.clear_frame_flag();
        Ok(())
    }

    /// Run for at least `cycles` T-cycles, returning how many actually ran.
    pub fn run_cycles(&mut self, cycles: u64) -> Result<u64, EmuError> {
        self.ensure_program()?;
        let start = self.cpu.cycles();
        while self.cpu.cycles() - start < cycles {
            let outcome = self.step();
            self.check(outcome)?;
        }
        Ok(self.cpu.cycles() - start)
    }

    pub fn framebuffer(&self) -> &[u32; SCREEN_WIDTH * SCREEN_HEIGHT] {
        self.mmu.ppu.framebuffer()
    }

    pub fn frame_count(&self) -> u64 {
        self.mmu.ppu.frames()
    }

    pub fn press(&mut self, button: Button) {
        self.mmu.press(button);
    }

    pub fn release(&mut self, button: Button) {
        self.mmu.release(button);
    }

    pub fn set_audio_sink(&mut self, sink: Box<dyn AudioSink>) {
        self.mmu.apu.set_sink(sink);
    }

    pub fn set_trace_sink(&mut self, sink: Box<dyn TraceSink>) {
        self.cpu.set_trace_sink(sink);
    }

    pub fn take_serial_output(&mut self) -> Vec<u8> {
        self.mmu.take_serial()
    }

    pub fn connect_link(&mut self, port: Box<dyn LinkPort>) {
        self.mmu.connect_link(port);
    }
}

impl Default for GameBoy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 32 KiB ROM-only image whose entry point runs `program`.
    fn cart(program: &[u8]) -> Cartridge {
        let mut rom = vec![0u8; 0x8000];
        rom[0x0100..0x0100 + program.len()].copy_from_slice(program);
        Cartridge::from_bytes(rom).expect("valid rom")
    }

    #[test]
    fn running_without_cartridge_is_an_error() {
        let mut gb = GameBoy::new();
        assert_eq!(gb.run_frame(), Err(EmuError::NoCartridge));
        assert_eq!(gb.run_cycles(4), Err(EmuError::NoCartridge));
    }

    #[test]
    fn illegal_opcode_surfaces_with_pc() {
        let mut gb = GameBoy::new();
        gb.load_cartridge(cart(&[0x00, 0xD3]));
        let err = gb.run_cycles(1_000).unwrap_err();
        assert_eq!(
            err,
            EmuError::IllegalOpcode {
                opcode: 0xD3,
                pc: 0x0101
            }
        );
        assert_eq!(gb.step(), StepOutcome::FatalOpcode(0xD3));
    }

    #[test]
    fn run_frame_counts_frames() {
        let mut gb = GameBoy::new();
        // JR -2
        gb.load_cartridge(cart(&[0x18, 0xFE]));
        gb.run_frame().unwrap();
        let first = gb.frame_count();
        gb.run_frame().unwrap();
        assert_eq!(gb.frame_count(), first + 1);
    }

    #[test]
    fn reset_keeps_cartridge_and_restores_registers() {
        let mut gb = GameBoy::new();
        gb.load_cartridge(cart(&[0x3E, 0x42, 0x18, 0xFE]));
        gb.run_cycles(100).unwrap();
        assert_eq!(gb.cpu.regs.a, 0x42);
        gb.reset();
        assert_eq!(gb.cpu.regs.pc, 0x0100);
        assert_eq!(gb.cpu.regs.a, 0x01);
        assert!(gb.mmu.cart.is_some());
    }

    #[test]
    fn serial_output_is_collected() {
        let mut gb = GameBoy::new();
        // LD A,'K'; LDH (01),A; LD A,81; LDH (02),A; JR -2
        gb.load_cartridge(cart(&[0x3E, b'K', 0xE0, 0x01, 0x3E, 0x81, 0xE0, 0x02, 0x18, 0xFE]));
        gb.run_cycles(8 * 512 + 200).unwrap();
        assert_eq!(gb.take_serial_output(), b"K");
    }
}
