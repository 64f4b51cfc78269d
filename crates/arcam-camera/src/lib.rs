//! Camera-side controllers of the arcam pipeline.
//!
//! A [`Camera`] owns a [`FrameSource`] and a double-buffered [`CameraRig`].
//! Each host cycle ([`Camera::update`]) captures into the rig's `next` frame,
//! runs the registered [`FrameTransform`]s and commits. [`Undistortion`]
//! registers a remap transform (optionally on a [`TransformWorker`] thread),
//! [`Display`] hands committed frames to a [`FrameSink`], and [`Calibrator`]
//! turns board observations into camera parameters.
//!
//! ## Quickstart
//!
//! ```
//! use arcam_camera::{Camera, Display, MemorySink, ScriptedSource};
//! use arcam_core::{FrameFormat, Orientation, PixelFormat};
//! use arcam_lifecycle::Lifecycle;
//!
//! let format = FrameFormat::new(4, 4, PixelFormat::Gray8);
//! let source = ScriptedSource::new(1, format).then_fill(7);
//! let camera = Camera::new("camera", Box::new(source), Orientation::TOP_LEFT);
//! let sink = MemorySink::new();
//! let display = Display::new("display", &camera, Box::new(sink.clone())).unwrap();
//! display.set_auto_start(true);
//!
//! display.configure().unwrap();
//! camera.configure().unwrap();
//! camera.start().unwrap();
//! assert!(display.is_started());
//!
//! camera.update().unwrap();
//! assert!(display.refresh().unwrap());
//! assert_eq!(sink.latest()[0].data, vec![7; 16]);
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

mod calibration;
mod camera;
mod display;
mod error;
mod rig;
mod source;
mod undistort;
mod worker;

pub use calibration::{Calibrator, CalibratorConfig, MIN_POINTS_PER_VIEW};
pub use camera::{Camera, CameraBehavior, CycleOutcome};
pub use display::{Display, DisplayBehavior, FrameSink, MemorySink, MEMORY_SINK_HISTORY};
pub use error::{SinkError, SourceError, TransformError};
pub use rig::{CameraRig, FrameTransform, SharedRig, TransformFault, TransformId};
pub use source::{FrameSource, PatternSource, ScriptedSource, SourceDescription};
pub use undistort::{
    Arity, MapBuilder, ParameterSource, Undistortion, UndistortionBehavior, UndistortionConfig,
    UndistortionVariant, STRATEGIES,
};
pub use worker::{TransformWorker, WorkerMonitor, WorkerState, WorkerStats};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
