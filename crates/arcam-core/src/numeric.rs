//! Interfaces to the numerical collaborators.
//!
//! Map generation, stereo rectification and remapping go through
//! [`NumericBackend`]; intrinsic and stereo calibration go through
//! [`CalibrationSolver`]. [`ReferenceBackend`](crate::ReferenceBackend) is a
//! pure-Rust `NumericBackend`; calibration solvers are supplied by the host.

use nalgebra::{Matrix3, Matrix3x4, Matrix4, Point2, Point3};
use serde::{Deserialize, Serialize};

use crate::{
    CalibrationFlags, FrameImage, FrameImageView, ImageSize, LensModel, StereoExtrinsics,
};

#[derive(thiserror::Error, Debug)]
pub enum NumericError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
    #[error("solver did not converge: {0}")]
    NotConverged(String),
}

impl NumericError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        NumericError::InvalidInput(msg.into())
    }
}

/// Per-pixel source coordinates: `dst(x, y) = src(map_x(x, y), map_y(x, y))`.
#[derive(Clone, Debug, PartialEq)]
pub struct UndistortMaps {
    pub width: usize,
    pub height: usize,
    pub map_x: Vec<f32>,
    pub map_y: Vec<f32>,
}

impl UndistortMaps {
    /// Maps that copy every pixel to itself.
    pub fn identity(size: ImageSize) -> Self {
        let mut map_x = Vec::with_capacity(size.area());
        let mut map_y = Vec::with_capacity(size.area());
        for y in 0..size.height {
            for x in 0..size.width {
                map_x.push(x as f32);
                map_y.push(y as f32);
            }
        }
        Self {
            width: size.width,
            height: size.height,
            map_x,
            map_y,
        }
    }

    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.width, self.height)
    }

    pub fn is_consistent(&self) -> bool {
        let n = self.width * self.height;
        self.map_x.len() == n && self.map_y.len() == n
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> (f32, f32) {
        let i = y * self.width + x;
        (self.map_x[i], self.map_y[i])
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    Nearest,
    #[default]
    Bilinear,
}

/// Output projection of omnidirectional rectification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RectificationKind {
    #[default]
    Perspective,
    Cylindrical,
    Longlati,
    Stereographic,
}

/// Inputs for generating undistortion (and optionally rectification) maps.
#[derive(Clone, Copy, Debug)]
pub struct MapRequest<'a> {
    pub camera_matrix: Matrix3<f64>,
    pub distortion: &'a [f64],
    /// Rectifying rotation applied to the output rays; identity for mono.
    pub rectification: Matrix3<f64>,
    /// Intrinsics of the output image.
    pub new_camera_matrix: Matrix3<f64>,
    pub size: ImageSize,
}

impl<'a> MapRequest<'a> {
    /// Plain undistortion: no rotation, same intrinsics for the output.
    pub fn undistort(camera_matrix: Matrix3<f64>, distortion: &'a [f64], size: ImageSize) -> Self {
        Self {
            camera_matrix,
            distortion,
            rectification: Matrix3::identity(),
            new_camera_matrix: camera_matrix,
            size,
        }
    }
}

/// Intrinsics of one camera as consumed by stereo rectification.
#[derive(Clone, Copy, Debug)]
pub struct CameraIntrinsics<'a> {
    pub camera_matrix: Matrix3<f64>,
    pub distortion: &'a [f64],
}

/// Rectifying rotations and projections of a stereo pair.
#[derive(Clone, Debug, PartialEq)]
pub struct StereoRectification {
    pub r1: Matrix3<f64>,
    pub r2: Matrix3<f64>,
    pub p1: Matrix3x4<f64>,
    pub p2: Matrix3x4<f64>,
    /// Disparity-to-depth reprojection matrix.
    pub q: Matrix4<f64>,
}

impl StereoRectification {
    /// Left 3×3 block of `p1`.
    pub fn new_camera_matrix_1(&self) -> Matrix3<f64> {
        self.p1.fixed_view::<3, 3>(0, 0).into_owned()
    }

    /// Left 3×3 block of `p2`.
    pub fn new_camera_matrix_2(&self) -> Matrix3<f64> {
        self.p2.fixed_view::<3, 3>(0, 0).into_owned()
    }
}

/// Map generation, rectification and remapping.
pub trait NumericBackend: Send + Sync {
    fn init_undistort_rectify_map(
        &self,
        request: &MapRequest<'_>,
    ) -> Result<UndistortMaps, NumericError>;

    fn omnidir_init_undistort_rectify_map(
        &self,
        request: &MapRequest<'_>,
        xi: f64,
        kind: RectificationKind,
    ) -> Result<UndistortMaps, NumericError>;

    fn stereo_rectify(
        &self,
        first: &CameraIntrinsics<'_>,
        second: &CameraIntrinsics<'_>,
        size: ImageSize,
        extrinsics: &StereoExtrinsics,
    ) -> Result<StereoRectification, NumericError>;

    /// Resample `src` through `maps` into `dst`. Samples outside `src` are zero.
    fn remap(
        &self,
        src: &FrameImageView<'_>,
        maps: &UndistortMaps,
        interpolation: Interpolation,
        dst: &mut FrameImage,
    ) -> Result<(), NumericError>;
}

/// One view of a calibration board: board-frame 3D points and their pixels.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardObservation {
    pub object_points: Vec<Point3<f64>>,
    pub image_points: Vec<Point2<f64>>,
}

impl BoardObservation {
    pub fn new(object_points: Vec<Point3<f64>>, image_points: Vec<Point2<f64>>) -> Self {
        Self {
            object_points,
            image_points,
        }
    }

    pub fn len(&self) -> usize {
        self.image_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_points.is_empty()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CalibrationRequest<'a> {
    pub lens: LensModel,
    pub image_size: ImageSize,
    pub views: &'a [BoardObservation],
    pub flags: CalibrationFlags,
}

/// Result of single-camera calibration.
#[derive(Clone, Debug, PartialEq)]
pub struct MonoCalibration {
    pub camera_matrix: Matrix3<f64>,
    pub distortion: Vec<f64>,
    /// Mirror parameter, omnidir only.
    pub xi: Option<f64>,
    /// RMS reprojection error in pixels.
    pub rms: f64,
}

#[derive(Clone, Copy, Debug)]
pub struct StereoCalibrationRequest<'a> {
    pub lens: LensModel,
    pub image_size: ImageSize,
    /// Views seen by both cameras, index-aligned.
    pub first_views: &'a [BoardObservation],
    pub second_views: &'a [BoardObservation],
    pub first: &'a MonoCalibration,
    pub second: &'a MonoCalibration,
    pub flags: CalibrationFlags,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StereoCalibration {
    pub extrinsics: StereoExtrinsics,
    pub rms: f64,
}

/// Intrinsic and stereo calibration.
pub trait CalibrationSolver: Send + Sync {
    fn calibrate_camera(
        &self,
        request: &CalibrationRequest<'_>,
    ) -> Result<MonoCalibration, NumericError>;

    fn calibrate_stereo(
        &self,
        request: &StereoCalibrationRequest<'_>,
    ) -> Result<StereoCalibration, NumericError>;
}
