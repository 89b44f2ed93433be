use std::path::Path;

use dmg_emu_core::apu::DEFAULT_SAMPLE_RATE;
use dmg_emu_core::ppu::DEFAULT_PALETTE;
use log::warn;
use serde::{Deserialize, Serialize};

/// Defaults for a headless run, read from a TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub sample_rate: u32,
    /// Four `#RRGGBB` shades, lightest first.
    pub palette: [String; 4],
    pub frames: Option<u64>,
    /// Stop once the serial transcript contains `Passed` or `Failed`.
    pub stop_on_serial_result: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            palette: DEFAULT_PALETTE.map(|argb| format!("#{:06X}", argb & 0x00FF_FFFF)),
            frames: None,
            stop_on_serial_result: false,
        }
    }
}

impl RunConfig {
    /// Palette as ARGB words. Unparsable entries keep the default shade.
    pub fn palette_argb(&self) -> [u32; 4] {
        let mut out = DEFAULT_PALETTE;
        for (slot, text) in out.iter_mut().zip(&self.palette) {
            match parse_color(text) {
                Some(argb) => *slot = argb,
                None => warn!("ignoring palette entry {text:?}: expected #RRGGBB"),
            }
        }
        out
    }
}

fn parse_color(text: &str) -> Option<u32> {
    let hex = text.strip_prefix('#')?;
    if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(hex, 16).ok().map(|rgb| 0xFF00_0000 | rgb)
}

pub fn load_from_file(path: &Path) -> RunConfig {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => return RunConfig::default(),
    };

    match toml::from_str::<RunConfig>(&text) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(
                "Failed to parse config {}: {e}; using defaults",
                path.display()
            );
            RunConfig::default()
        }
    }
}
