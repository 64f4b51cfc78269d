//! JSON configuration of a [`Pipeline`](crate::Pipeline).

use std::fs;
use std::path::{Path, PathBuf};

use arcam_camera::{ParameterSource, UndistortionConfig};
use arcam_core::{FrameFormat, Orientation, PixelFormat};
use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// Synthetic camera settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub name: String,
    pub channels: usize,
    pub width: usize,
    pub height: usize,
    pub pixel_format: PixelFormat,
    /// Layout the source delivers.
    pub orientation: Orientation,
    /// Layout consumers see after publish.
    pub target: Orientation,
    /// A new frame every `interval` cycles.
    pub interval: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            name: "camera".to_string(),
            channels: 1,
            width: 640,
            height: 480,
            pixel_format: PixelFormat::Rgb24,
            orientation: Orientation::TOP_LEFT,
            target: Orientation::TOP_LEFT,
            interval: 1,
        }
    }
}

impl CameraConfig {
    pub fn format(&self) -> FrameFormat {
        FrameFormat::new(self.width, self.height, self.pixel_format)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UndistortionSection {
    #[serde(default = "default_undistortion_name")]
    pub name: String,
    pub parameters: ParameterSource,
    #[serde(default)]
    pub settings: UndistortionConfig,
}

fn default_undistortion_name() -> String {
    "undistortion".to_string()
}

/// Where presented frames go.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    /// Keep the latest frame in memory.
    #[default]
    Memory,
    /// Write every `every`-th presented frame as PNG files into `dir`.
    #[cfg(feature = "image")]
    Png {
        dir: PathBuf,
        #[serde(default = "default_every")]
        every: u64,
    },
}

#[cfg(feature = "image")]
fn default_every() -> u64 {
    1
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub camera: CameraConfig,
    pub undistortion: Option<UndistortionSection>,
    pub sink: SinkConfig,
    /// Host cycles run by `arcam run` unless overridden.
    pub cycles: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            undistortion: None,
            sink: SinkConfig::Memory,
            cycles: 30,
        }
    }
}

impl PipelineConfig {
    /// Default config with undistortion reading parameters from `params`.
    pub fn with_parameters_file(params: impl Into<PathBuf>) -> Self {
        Self {
            undistortion: Some(UndistortionSection {
                name: default_undistortion_name(),
                parameters: ParameterSource::File(params.into()),
                settings: UndistortionConfig::default(),
            }),
            ..Self::default()
        }
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), PipelineError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
