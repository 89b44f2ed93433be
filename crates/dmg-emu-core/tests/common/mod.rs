use once_cell::sync::OnceCell;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use dmg_emu_core::bus::Bus;
use dmg_emu_core::interrupts::Interrupt;

static INIT: OnceCell<()> = OnceCell::new();

fn ensure_test_roms() {
    INIT.get_or_init(|| {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("test_roms");
        fs::create_dir_all(&dir).expect("failed to create test_roms directory");
        ensure_c_sp_test_rom_bundle(&dir);
    });
}

fn ensure_c_sp_test_rom_bundle(dir: &Path) {
    // ROM binaries are not checked in; fetch the public bundle once.
    if dir.join("blargg").exists() {
        return;
    }

    let url = "https://github.com/c-sp/game-boy-test-roms/releases/download/v7.0/game-boy-test-roms-v7.0.zip";
    let resp = reqwest::blocking::get(url).expect("failed to download test roms");
    let status = resp.status();
    if !status.is_success() {
        panic!("failed to download test roms: {status}");
    }
    let bytes = resp.bytes().expect("failed to read rom bytes");
    let reader = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(reader).expect("failed to open zip archive");
    archive.extract(dir).expect("failed to extract test roms");
}

#[allow(dead_code)]
pub fn download_file(url: &str, dest: &Path) {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).expect("failed to create destination directory");
    }

    let resp = reqwest::blocking::get(url).expect("failed to download file");
    let status = resp.status();
    if !status.is_success() {
        panic!("failed to download {url}: {status}");
    }

    let bytes = resp.bytes().expect("failed to read response body");
    let tmp = dest.with_extension("tmp");
    fs::write(&tmp, &bytes).expect("failed to write temporary file");
    fs::rename(&tmp, dest).unwrap_or_else(|_| {
        // On Windows rename can fail if the destination already exists.
        let _ = fs::remove_file(dest);
        fs::rename(&tmp, dest).expect("failed to move downloaded file into place")
    });
}

#[allow(dead_code)]
pub fn roms_dir() -> PathBuf {
    ensure_test_roms();
    Path::new(env!("CARGO_MANIFEST_DIR")).join("test_roms")
}

#[allow(dead_code)]
pub fn rom_path<P: AsRef<Path>>(relative: P) -> PathBuf {
    roms_dir().join(relative)
}

#[allow(dead_code)]
pub fn serial_contains_result(serial: &[u8], checked_up_to: &mut usize) -> bool {
    const PASSED: &[u8] = b"Passed";
    const FAILED: &[u8] = b"Failed";

    let max_marker_len = PASSED.len().max(FAILED.len());
    let lookbehind = max_marker_len.saturating_sub(1);
    let start = checked_up_to.saturating_sub(lookbehind).min(serial.len());
    let window = &serial[start..];

    let found = window.windows(PASSED.len()).any(|chunk| chunk == PASSED)
        || window.windows(FAILED.len()).any(|chunk| chunk == FAILED);

    *checked_up_to = serial.len();
    found
}

/// Decode a reference screenshot into RGB triples.
#[allow(dead_code)]
pub fn load_png_rgb<P: AsRef<Path>>(path: P) -> (u32, u32, Vec<[u8; 3]>) {
    let file = File::open(path).expect("failed to open png");
    let mut decoder = png::Decoder::new(BufReader::new(file));
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder.read_info().expect("failed to read png info");
    let buffer_size = reader
        .output_buffer_size()
        .expect("failed to get png output buffer size");
    let mut buf = vec![0; buffer_size];
    let info = reader
        .next_frame(&mut buf)
        .expect("failed to decode png frame");
    let data = &buf[..info.buffer_size()];
    let pixels = match info.color_type {
        png::ColorType::Rgb => data.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect(),
        png::ColorType::Rgba => data.chunks_exact(4).map(|c| [c[0], c[1], c[2]]).collect(),
        png::ColorType::Grayscale => data.iter().map(|&g| [g, g, g]).collect(),
        png::ColorType::GrayscaleAlpha => data.chunks_exact(2).map(|c| [c[0], c[0], c[0]]).collect(),
        png::ColorType::Indexed => panic!("indexed png was not expanded"),
    };
    (info.width, info.height, pixels)
}

/// 32 KiB ROM-only image with `program` at the entry point 0x0100.
#[allow(dead_code)]
pub fn build_rom(program: &[u8]) -> Vec<u8> {
    let mut rom = vec![0u8; 0x8000];
    rom[0x0100..0x0100 + program.len()].copy_from_slice(program);
    rom
}

/// 64 KiB of plain RAM with IF/IE held outside the address space.
#[allow(dead_code)]
pub struct FlatBus {
    pub mem: Vec<u8>,
    pub ticks: u64,
    pub if_reg: u8,
    pub ie_reg: u8,
}

#[allow(dead_code)]
impl FlatBus {
    pub fn new() -> Self {
        Self {
            mem: vec![0; 0x10000],
            ticks: 0,
            if_reg: 0,
            ie_reg: 0,
        }
    }

    pub fn with_program(at: u16, program: &[u8]) -> Self {
        let mut bus = Self::new();
        bus.load(at, program);
        bus
    }

    pub fn load(&mut self, at: u16, bytes: &[u8]) {
        let start = at as usize;
        self.mem[start..start + bytes.len()].copy_from_slice(bytes);
    }
}

impl Bus for FlatBus {
    fn read(&mut self, addr: u16) -> u8 {
        self.mem[addr as usize]
    }

    fn write(&mut self, addr: u16, val: u8) {
        self.mem[addr as usize] = val;
    }

    fn peek(&self, addr: u16) -> u8 {
        self.mem[addr as usize]
    }

    fn tick(&mut self, m_cycles: u8) {
        self.ticks += m_cycles as u64;
    }

    fn interrupt_flags(&self) -> u8 {
        self.if_reg
    }

    fn interrupt_enable(&self) -> u8 {
        self.ie_reg
    }

    fn acknowledge(&mut self, irq: Interrupt) {
        self.if_reg &= !irq.bit();
    }
}
