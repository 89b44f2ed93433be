//! Cycle-accurate DMG Game Boy emulation core.
//!
//! This crate contains the platform-agnostic emulator logic (CPU/MMU/PPU/APU/etc).
//! Hosts drive it through the [`gameboy`] facade and receive frames, audio
//! samples, serial bytes and trace lines through the sink traits.

/// Audio Processing Unit: four channels, frame sequencer and mixer.
pub mod apu;

/// CPU-facing view of the address space.
pub mod bus;

/// ROM header parsing and bank-switch mappers.
pub mod cartridge;

/// SM83 CPU core.
pub mod cpu;

/// OAM DMA controller.
pub mod dma;

/// High-level facade that wires the CPU and MMU into a single machine.
pub mod gameboy;

/// Opcode decode tables.
pub mod instructions;

/// Interrupt sources and the IF/IE pair.
pub mod interrupts;

/// Joypad input register.
pub mod joypad;

/// Memory-mapped storage primitives.
pub mod memory;

/// Memory map and hardware plumbing.
pub mod mmu;

/// Pixel Processing Unit (PPU) emulation.
pub mod ppu;

/// CPU register file.
pub mod registers;

/// Serial unit and link cable plumbing.
pub mod serial;

/// Divider/timer unit.
pub mod timer;

/// Per-instruction CPU trace output.
pub mod trace;

pub use gameboy::{EmuError, GameBoy};
