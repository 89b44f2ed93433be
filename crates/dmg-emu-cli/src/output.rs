use std::error::Error;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use std::sync::mpsc::{self, Receiver};

use dmg_emu_core::apu::AudioSink;

fn create_parent_dirs(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path
        .parent()
        .and_then(|p| (!p.as_os_str().is_empty()).then_some(p))
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Write an ARGB framebuffer as an 8-bit RGB PNG.
pub fn write_screenshot(
    path: &Path,
    width: u32,
    height: u32,
    frame: &[u32],
) -> Result<(), Box<dyn Error>> {
    create_parent_dirs(path)?;
    let mut rgb = Vec::with_capacity(frame.len() * 3);
    for &px in frame {
        rgb.extend_from_slice(&[(px >> 16) as u8, (px >> 8) as u8, px as u8]);
    }
    let w = BufWriter::new(File::create(path)?);
    let mut encoder = png::Encoder::new(w, width, height);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&rgb)?;
    writer.finish()?;
    Ok(())
}

/// Streams APU samples into a 16-bit stereo WAV file.
///
/// The APU side only sends over a channel; the host drains it between
/// frames so file I/O never happens inside the emulation loop.
pub struct WavCapture {
    writer: hound::WavWriter<BufWriter<File>>,
    rx: Receiver<(i16, i16)>,
    written: u64,
}

impl WavCapture {
    pub fn create(
        path: &Path,
        sample_rate: u32,
    ) -> Result<(Self, Box<dyn AudioSink>), Box<dyn Error>> {
        create_parent_dirs(path)?;
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)?;
        let (tx, rx) = mpsc::channel();
        let sink: Box<dyn AudioSink> = Box::new(move |left: i16, right: i16| {
            // The receiver outlives emulation; a send error only means shutdown.
            let _ = tx.send((left, right));
        });
        Ok((
            Self {
                writer,
                rx,
                written: 0,
            },
            sink,
        ))
    }

    pub fn drain(&mut self) -> Result<(), hound::Error> {
        while let Ok((left, right)) = self.rx.try_recv() {
            self.writer.write_sample(left)?;
            self.writer.write_sample(right)?;
            self.written += 1;
        }
        Ok(())
    }

    /// Flush pending samples and patch the WAV header; returns frames written.
    pub fn finish(mut self) -> Result<u64, hound::Error> {
        self.drain()?;
        self.writer.finalize()?;
        Ok(self.written)
    }
}
