//! PNG export of presented frames.

use std::fs;
use std::path::{Path, PathBuf};

use arcam_camera::{FrameSink, SinkError};
use arcam_core::{FrameImage, PixelFormat};
use image::{GrayImage, RgbImage, RgbaImage};

/// Writes `frame{N:06}_ch{C}.png` for every `every`-th presented frame.
#[derive(Clone, Debug)]
pub struct PngSink {
    dir: PathBuf,
    every: u64,
    written: u64,
    last_written: Vec<PathBuf>,
}

impl PngSink {
    /// Creates `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>, every: u64) -> Result<Self, SinkError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            every: every.max(1),
            written: 0,
            last_written: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of files written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Files of the most recently written frame, one per channel.
    pub fn last_written(&self) -> &[PathBuf] {
        &self.last_written
    }
}

fn save(path: &Path, channel: usize, image: &FrameImage) -> Result<(), SinkError> {
    let (w, h) = (image.width() as u32, image.height() as u32);
    let data = image.data.clone();
    let saved = match image.format.pixel_format {
        PixelFormat::Gray8 => GrayImage::from_raw(w, h, data).map(|img| img.save(path)),
        PixelFormat::Rgb24 => RgbImage::from_raw(w, h, data).map(|img| img.save(path)),
        PixelFormat::Rgba32 => RgbaImage::from_raw(w, h, data).map(|img| img.save(path)),
    };
    match saved {
        None => Err(SinkError::Encode {
            channel,
            reason: format!("buffer does not hold a {w}x{h} image"),
        }),
        Some(Err(err)) => Err(SinkError::Encode {
            channel,
            reason: err.to_string(),
        }),
        Some(Ok(())) => Ok(()),
    }
}

impl FrameSink for PngSink {
    fn present(&mut self, frame: u64, images: &[FrameImage]) -> Result<(), SinkError> {
        if frame % self.every != 0 {
            return Ok(());
        }
        self.last_written.clear();
        for (channel, image) in images.iter().enumerate() {
            let path = self.dir.join(format!("frame{frame:06}_ch{channel}.png"));
            save(&path, channel, image)?;
            log::debug!("wrote {}", path.display());
            self.last_written.push(path);
            self.written += 1;
        }
        Ok(())
    }
}
