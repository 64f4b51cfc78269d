//! Core types for the arcam camera pipeline.
//!
//! Frames are plain interleaved 8-bit buffers ([`FrameImage`]); camera
//! calibration lives in [`CameraParameters`] and is persisted as JSON. All
//! numerical work (undistortion maps, rectification, remapping, calibration)
//! is reached through the [`NumericBackend`] and [`CalibrationSolver`] traits.
//! [`ReferenceBackend`] implements the former in plain Rust.

mod flags;
mod image;
mod logger;
mod numeric;
mod params;
mod reference;

pub use flags::{
    omnidir_bits, pinhole_bits, CalibrationFlags, OmnidirCalibrationFlags,
    PinholeCalibrationFlags,
};
pub use image::{
    sample_bilinear, sample_bilinear_u8, sample_nearest, Flip, FrameFormat, FrameImage,
    FrameImageView, ImageSize, Orientation, PixelFormat,
};
pub use numeric::{
    BoardObservation, CalibrationRequest, CalibrationSolver, CameraIntrinsics, Interpolation,
    MapRequest, MonoCalibration, NumericBackend, NumericError, RectificationKind,
    StereoCalibration, StereoCalibrationRequest, StereoRectification, UndistortMaps,
};
pub use params::{CameraParameters, LensModel, ParametersError, StereoExtrinsics};
pub use reference::ReferenceBackend;

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
