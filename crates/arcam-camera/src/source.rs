//! Frame producers driven by the camera controller.

use std::collections::VecDeque;

use arcam_core::{FrameFormat, FrameImage, Orientation};
use serde::{Deserialize, Serialize};

use crate::SourceError;

/// Shape of the frames a source produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescription {
    pub channel_count: usize,
    pub format: FrameFormat,
    /// Layout of the produced images; the rig flips them into the target
    /// orientation on publish.
    #[serde(default)]
    pub orientation: Orientation,
}

/// A camera device (or anything pretending to be one).
pub trait FrameSource: Send {
    /// Describe the frames this source will produce. Called on configure.
    fn describe(&mut self) -> Result<SourceDescription, SourceError>;

    fn start(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Write the next frame into `frames`, one pre-sized image per channel.
    /// Returns `false` if no new frame is available this cycle; `frames` must
    /// then be left untouched.
    fn capture(&mut self, frames: &mut [FrameImage]) -> Result<bool, SourceError>;
}

fn check_channels(expected: usize, frames: &[FrameImage]) -> Result<(), SourceError> {
    if frames.len() != expected {
        return Err(SourceError::ChannelCount {
            expected,
            got: frames.len(),
        });
    }
    Ok(())
}

#[derive(Clone, Debug)]
enum Step {
    Frame(Vec<FrameImage>),
    Fill(u8),
    Empty,
    Fail(String),
}

/// Replays a fixed script of frames, empty cycles and failures.
#[derive(Clone, Debug)]
pub struct ScriptedSource {
    description: SourceDescription,
    script: VecDeque<Step>,
    started: bool,
}

impl ScriptedSource {
    pub fn new(channel_count: usize, format: FrameFormat) -> Self {
        Self {
            description: SourceDescription {
                channel_count,
                format,
                orientation: Orientation::TOP_LEFT,
            },
            script: VecDeque::new(),
            started: false,
        }
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.description.orientation = orientation;
        self
    }

    /// Queue an explicit frame, one image per channel.
    pub fn then_frame(mut self, images: Vec<FrameImage>) -> Self {
        self.script.push_back(Step::Frame(images));
        self
    }

    /// Queue a frame whose every byte on every channel is `value`.
    pub fn then_fill(mut self, value: u8) -> Self {
        self.script.push_back(Step::Fill(value));
        self
    }

    /// Queue a cycle without a new frame.
    pub fn then_empty(mut self) -> Self {
        self.script.push_back(Step::Empty);
        self
    }

    /// Queue a capture failure.
    pub fn then_fail(mut self, reason: impl Into<String>) -> Self {
        self.script.push_back(Step::Fail(reason.into()));
        self
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl FrameSource for ScriptedSource {
    fn describe(&mut self) -> Result<SourceDescription, SourceError> {
        Ok(self.description)
    }

    fn start(&mut self) -> Result<(), SourceError> {
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SourceError> {
        self.started = false;
        Ok(())
    }

    fn capture(&mut self, frames: &mut [FrameImage]) -> Result<bool, SourceError> {
        if !self.started {
            return Err(SourceError::NotStarted);
        }
        check_channels(self.description.channel_count, frames)?;
        match self.script.pop_front() {
            None | Some(Step::Empty) => Ok(false),
            Some(Step::Fail(reason)) => Err(SourceError::Disconnected(reason)),
            Some(Step::Fill(value)) => {
                for image in frames.iter_mut() {
                    image.data.fill(value);
                }
                Ok(true)
            }
            Some(Step::Frame(images)) => {
                check_channels(frames.len(), &images)?;
                for (channel, (dst, src)) in frames.iter_mut().zip(&images).enumerate() {
                    if !dst.copy_pixels_from(src) {
                        return Err(SourceError::FormatMismatch {
                            channel,
                            expected: dst.format,
                            got: src.format,
                        });
                    }
                }
                Ok(true)
            }
        }
    }
}

/// Deterministic moving diagonal gradient, one frame every `interval` cycles.
#[derive(Clone, Debug)]
pub struct PatternSource {
    description: SourceDescription,
    interval: u64,
    cycle: u64,
    frame: u64,
    started: bool,
}

impl PatternSource {
    pub fn new(channel_count: usize, format: FrameFormat) -> Self {
        Self {
            description: SourceDescription {
                channel_count,
                format,
                orientation: Orientation::TOP_LEFT,
            },
            interval: 1,
            cycle: 0,
            frame: 0,
            started: false,
        }
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.description.orientation = orientation;
        self
    }

    /// Produce a frame only on every `interval`-th capture (at least 1).
    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval.max(1);
        self
    }

    pub fn frames_produced(&self) -> u64 {
        self.frame
    }

    /// Value of byte `c` of pixel `(x, y)` on `channel` in frame `frame`.
    pub fn value_at(frame: u64, channel: usize, x: usize, y: usize, c: usize) -> u8 {
        let v = x as u64 + 2 * y as u64 + 3 * frame + 64 * channel as u64 + 85 * c as u64;
        (v & 0xff) as u8
    }
}

impl FrameSource for PatternSource {
    fn describe(&mut self) -> Result<SourceDescription, SourceError> {
        Ok(self.description)
    }

    fn start(&mut self) -> Result<(), SourceError> {
        self.started = true;
        self.cycle = 0;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SourceError> {
        self.started = false;
        Ok(())
    }

    fn capture(&mut self, frames: &mut [FrameImage]) -> Result<bool, SourceError> {
        if !self.started {
            return Err(SourceError::NotStarted);
        }
        check_channels(self.description.channel_count, frames)?;
        let due = self.cycle % self.interval == 0;
        self.cycle += 1;
        if !due {
            return Ok(false);
        }

        let frame = self.frame;
        for (channel, image) in frames.iter_mut().enumerate() {
            let format = image.format;
            let bpp = format.pixel_format.bytes_per_pixel();
            for (y, row) in image.data.chunks_exact_mut(format.row_bytes()).enumerate() {
                for (x, px) in row.chunks_exact_mut(bpp).enumerate() {
                    for (c, byte) in px.iter_mut().enumerate() {
                        *byte = Self::value_at(frame, channel, x, y, c);
                    }
                }
            }
        }
        self.frame += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arcam_core::PixelFormat;

    fn gray(w: usize, h: usize) -> FrameFormat {
        FrameFormat::new(w, h, PixelFormat::Gray8)
    }

    #[test]
    fn scripted_source_replays_in_order() {
        let format = gray(2, 2);
        let mut src = ScriptedSource::new(1, format)
            .then_fill(3)
            .then_empty()
            .then_frame(vec![FrameImage::filled(format, 9)])
            .then_fail("unplugged");
        let mut frames = vec![FrameImage::new(format)];

        assert!(matches!(
            src.capture(&mut frames),
            Err(SourceError::NotStarted)
        ));
        src.start().unwrap();
        assert!(src.capture(&mut frames).unwrap());
        assert_eq!(frames[0].data, vec![3; 4]);
        assert!(!src.capture(&mut frames).unwrap());
        assert_eq!(frames[0].data, vec![3; 4]);
        assert!(src.capture(&mut frames).unwrap());
        assert_eq!(frames[0].data, vec![9; 4]);
        assert!(matches!(
            src.capture(&mut frames),
            Err(SourceError::Disconnected(_))
        ));
        // Exhausted scripts produce nothing.
        assert!(!src.capture(&mut frames).unwrap());
    }

    #[test]
    fn scripted_frame_with_wrong_format_is_rejected() {
        let mut src =
            ScriptedSource::new(1, gray(2, 2)).then_frame(vec![FrameImage::new(gray(3, 3))]);
        src.start().unwrap();
        let mut frames = vec![FrameImage::new(gray(2, 2))];
        assert!(matches!(
            src.capture(&mut frames),
            Err(SourceError::FormatMismatch { channel: 0, .. })
        ));
    }

    #[test]
    fn pattern_source_honours_interval() {
        let format = FrameFormat::new(4, 2, PixelFormat::Rgb24);
        let mut src = PatternSource::new(2, format).with_interval(2);
        src.start().unwrap();
        let mut frames = vec![FrameImage::new(format); 2];

        assert!(src.capture(&mut frames).unwrap());
        assert!(!src.capture(&mut frames).unwrap());
        assert!(src.capture(&mut frames).unwrap());
        assert_eq!(src.frames_produced(), 2);

        // Second frame (index 1), channel 1.
        let (x, y, c) = (3, 1, 2);
        let i = (y * 4 + x) * 3 + c;
        assert_eq!(frames[1].data[i], PatternSource::value_at(1, 1, x, y, c));
    }

    #[test]
    fn channel_count_mismatch_is_an_error() {
        let mut src = PatternSource::new(2, gray(2, 2));
        src.start().unwrap();
        let mut frames = vec![FrameImage::new(gray(2, 2))];
        assert!(matches!(
            src.capture(&mut frames),
            Err(SourceError::ChannelCount {
                expected: 2,
                got: 1
            })
        ));
    }
}
