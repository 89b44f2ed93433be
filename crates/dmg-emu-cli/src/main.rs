mod config;
mod output;

use std::error::Error;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;
use dmg_emu_core::cartridge::Cartridge;
use dmg_emu_core::gameboy::{EmuError, FRAME_CYCLES, GameBoy};
use dmg_emu_core::ppu::{SCREEN_HEIGHT, SCREEN_WIDTH};
use dmg_emu_core::trace::WriterSink;
use log::{info, warn};

use config::RunConfig;
use output::WavCapture;

const DEFAULT_FRAMES: u64 = 60;

#[derive(Parser)]
#[command(name = "dmg-emu", about = "Run a Game Boy ROM headless and export what it produced")]
struct Args {
    /// Path to ROM file
    rom: PathBuf,

    /// Number of frames to run
    #[arg(long, conflicts_with = "cycles")]
    frames: Option<u64>,

    /// Number of CPU T-cycles to run
    #[arg(long)]
    cycles: Option<u64>,

    /// TOML file with run defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the last completed frame as a PNG
    #[arg(long)]
    screenshot: Option<PathBuf>,

    /// Record audio to a WAV file
    #[arg(long)]
    wav: Option<PathBuf>,

    /// Write a per-instruction CPU trace
    #[arg(long)]
    trace: Option<PathBuf>,

    /// Echo serial output to stdout as it arrives
    #[arg(long)]
    serial: bool,

    /// Path to boot ROM file
    #[arg(long)]
    boot_rom: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy)]
enum Budget {
    Frames(u64),
    Cycles(u64),
}

fn contains_result(transcript: &[u8]) -> bool {
    transcript.windows(6).any(|w| w == b"Passed" || w == b"Failed")
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn build_machine(args: &Args, cfg: &RunConfig) -> Result<GameBoy, Box<dyn Error>> {
    let cart = Cartridge::from_file(&args.rom)?;
    let mut gb = match &args.boot_rom {
        Some(path) => {
            let mut gb = GameBoy::new_power_on();
            gb.load_boot_rom(fs::read(path)?);
            gb
        }
        None => GameBoy::new(),
    };
    gb.load_cartridge(cart);
    gb.mmu.apu.set_sample_rate(cfg.sample_rate);
    gb.mmu.ppu.set_palette(cfg.palette_argb());

    if let Some(path) = &args.trace {
        let file = BufWriter::new(File::create(path)?);
        gb.set_trace_sink(Box::new(WriterSink::new(file)));
    }
    Ok(gb)
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(args.verbose);

    let cfg = args
        .config
        .as_deref()
        .map(config::load_from_file)
        .unwrap_or_default();

    let mut gb = build_machine(&args, &cfg)?;

    let mut wav = match &args.wav {
        Some(path) => {
            let (capture, sink) = WavCapture::create(path, gb.mmu.apu.sample_rate())?;
            gb.set_audio_sink(sink);
            Some(capture)
        }
        None => None,
    };

    let budget = match (args.cycles, args.frames.or(cfg.frames)) {
        (Some(cycles), _) => Budget::Cycles(cycles),
        (None, Some(frames)) => Budget::Frames(frames),
        (None, None) => Budget::Frames(DEFAULT_FRAMES),
    };
    info!("running {budget:?}");

    let mut transcript = Vec::new();
    let mut frames_run = 0u64;
    let mut cycles_run = 0u64;
    let mut stdout = std::io::stdout();

    let outcome: Result<(), EmuError> = loop {
        let done = match budget {
            Budget::Frames(n) => frames_run >= n,
            Budget::Cycles(n) => cycles_run >= n,
        };
        if done {
            break Ok(());
        }

        let step = match budget {
            Budget::Frames(_) => gb.run_frame().map(|()| frames_run += 1),
            Budget::Cycles(n) => gb
                .run_cycles((n - cycles_run).min(FRAME_CYCLES))
                .map(|ran| cycles_run += ran),
        };

        if let Some(capture) = wav.as_mut() {
            capture.drain()?;
        }
        let bytes = gb.take_serial_output();
        if args.serial && !bytes.is_empty() {
            stdout.write_all(&bytes)?;
            stdout.flush()?;
        }
        transcript.extend_from_slice(&bytes);

        if let Err(e) = step {
            break Err(e);
        }
        if cfg.stop_on_serial_result && contains_result(&transcript) {
            info!("serial result marker seen, stopping");
            break Ok(());
        }
    };

    info!(
        "ran {} frames, {} cycles",
        gb.frame_count(),
        gb.cpu.cycles()
    );

    if let Some(path) = &args.screenshot {
        output::write_screenshot(
            path,
            SCREEN_WIDTH as u32,
            SCREEN_HEIGHT as u32,
            gb.framebuffer(),
        )?;
        info!("screenshot written to {}", path.display());
    }

    if let Some(capture) = wav.take() {
        gb.mmu.apu.clear_sink();
        let frames = capture.finish()?;
        info!("wrote {frames} stereo frames to WAV");
    }

    // Dropping the sink flushes its buffered writer.
    drop(gb.cpu.take_trace_sink());

    if !args.serial && !transcript.is_empty() {
        println!("{}", String::from_utf8_lossy(&transcript));
    }

    if let Err(e) = outcome {
        warn!("{}", gb.cpu.debug_state());
        return Err(e.into());
    }
    Ok(())
}
