//! Camera calibration and undistortion pipeline.
//!
//! This crate provides:
//! - re-exports of the `arcam-*` crates
//! - [`Pipeline`]: a camera → undistortion → display chain assembled from a
//!   JSON [`PipelineConfig`]
//! - (feature `image`) [`PngSink`] for writing presented frames to disk
//! - (feature `cli`) the `arcam` binary
//!
//! ## Quickstart
//!
//! ```
//! use arcam::{Pipeline, PipelineConfig};
//!
//! # fn main() -> Result<(), arcam::PipelineError> {
//! let mut config = PipelineConfig::default();
//! config.camera.width = 32;
//! config.camera.height = 24;
//!
//! let mut pipeline = Pipeline::new(&config)?;
//! pipeline.start()?;
//! let summary = pipeline.run(5)?;
//! assert_eq!(summary.presented, 5);
//! pipeline.shutdown()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `arcam::lifecycle`: controller state machine and dependency propagation.
//! - `arcam::core`: frames, camera parameters, calibration flags, numeric traits.
//! - `arcam::camera`: rig, sources, camera/undistortion/display controllers,
//!   calibrator.

pub use arcam_camera as camera;
pub use arcam_core as core;
pub use arcam_lifecycle as lifecycle;

pub use arcam_camera::{Camera, Display, Undistortion};
pub use arcam_core::CameraParameters;
pub use arcam_lifecycle::{ControllerError, Lifecycle, Phase};

mod config;
mod error;
mod pipeline;
#[cfg(feature = "image")]
mod png;

pub use config::{CameraConfig, PipelineConfig, SinkConfig, UndistortionSection};
pub use error::PipelineError;
pub use pipeline::{Pipeline, RunSummary};
#[cfg(feature = "image")]
pub use png::PngSink;
