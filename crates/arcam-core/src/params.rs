//! Persisted camera calibration: intrinsics, distortion, stereo extrinsics.

use std::{fs, path::Path};

use nalgebra::{Matrix3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

use crate::ImageSize;

#[derive(thiserror::Error, Debug)]
pub enum ParametersError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("camera count must be positive")]
    NoCameras,
    #[error("`{field}` has {got} entries, expected one per camera ({expected})")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("camera {camera}: {reason}")]
    InvalidCamera { camera: usize, reason: String },
}

/// Projection model the parameters were calibrated for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LensModel {
    /// Pinhole projection with Brown–Conrady distortion (4, 5, 8, 12 or 14 coefficients).
    #[default]
    Pinhole,
    /// Unified (Mei) omnidirectional projection with `xi` and 4 distortion coefficients.
    Omnidir,
}

impl LensModel {
    /// Whether the model accepts `n` distortion coefficients.
    pub fn accepts_coefficients(self, n: usize) -> bool {
        match self {
            LensModel::Pinhole => matches!(n, 0 | 4 | 5 | 8 | 12 | 14),
            LensModel::Omnidir => n == 4,
        }
    }
}

/// Relative pose of the second camera of a stereo rig w.r.t. the first.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StereoExtrinsics {
    /// Rotation vector (axis × angle, radians) taking camera-0 coordinates to camera-1.
    pub rotation: [f64; 3],
    /// Translation taking camera-0 coordinates to camera-1, in board units.
    pub translation: [f64; 3],
}

impl StereoExtrinsics {
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        let [x, y, z] = self.rotation;
        Rotation3::from_scaled_axis(Vector3::new(x, y, z)).into_inner()
    }

    pub fn translation_vector(&self) -> Vector3<f64> {
        let [x, y, z] = self.translation;
        Vector3::new(x, y, z)
    }

    /// Distance between the two optical centers.
    pub fn baseline(&self) -> f64 {
        self.translation_vector().norm()
    }
}

/// Calibration result for every camera of a rig.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraParameters {
    pub camera_count: usize,
    #[serde(default)]
    pub lens: LensModel,
    pub image_sizes: Vec<ImageSize>,
    /// Row-major 3×3 intrinsic matrices.
    pub camera_matrices: Vec<[[f64; 3]; 3]>,
    pub distortion: Vec<Vec<f64>>,
    /// Mirror parameter of the unified model, one per camera (omnidir only).
    #[serde(default)]
    pub omnidir_xi: Vec<f64>,
    #[serde(default)]
    pub stereo: Option<StereoExtrinsics>,
    /// Raw calibration-flags integer used to produce these parameters.
    #[serde(default)]
    pub calibration_flags: u32,
    /// RMS reprojection error per camera, in pixels.
    #[serde(default)]
    pub reprojection_errors: Vec<f64>,
}

impl CameraParameters {
    /// Parameters for `camera_count` identical, distortion-free pinhole cameras.
    pub fn ideal_pinhole(camera_count: usize, size: ImageSize, focal: f64) -> Self {
        let cx = (size.width as f64 - 1.0) * 0.5;
        let cy = (size.height as f64 - 1.0) * 0.5;
        let k = [[focal, 0.0, cx], [0.0, focal, cy], [0.0, 0.0, 1.0]];
        Self {
            camera_count,
            lens: LensModel::Pinhole,
            image_sizes: vec![size; camera_count],
            camera_matrices: vec![k; camera_count],
            distortion: vec![vec![0.0; 5]; camera_count],
            omnidir_xi: Vec::new(),
            stereo: None,
            calibration_flags: 0,
            reprojection_errors: Vec::new(),
        }
    }

    /// Intrinsic matrix of camera `i`.
    pub fn camera_matrix(&self, i: usize) -> Option<Matrix3<f64>> {
        self.camera_matrices.get(i).map(|k| {
            Matrix3::from_row_slice(&[
                k[0][0], k[0][1], k[0][2], k[1][0], k[1][1], k[1][2], k[2][0], k[2][1], k[2][2],
            ])
        })
    }

    /// Check structural invariants: per-camera arrays match `camera_count`,
    /// intrinsic matrices are invertible, image sizes are non-empty.
    pub fn validate(&self) -> Result<(), ParametersError> {
        let n = self.camera_count;
        if n == 0 {
            return Err(ParametersError::NoCameras);
        }
        let check = |field: &'static str, got: usize| {
            if got == n {
                Ok(())
            } else {
                Err(ParametersError::LengthMismatch {
                    field,
                    expected: n,
                    got,
                })
            }
        };
        check("image_sizes", self.image_sizes.len())?;
        check("camera_matrices", self.camera_matrices.len())?;
        check("distortion", self.distortion.len())?;
        if self.lens == LensModel::Omnidir {
            check("omnidir_xi", self.omnidir_xi.len())?;
        }
        if !self.reprojection_errors.is_empty() {
            check("reprojection_errors", self.reprojection_errors.len())?;
        }

        for camera in 0..n {
            let size = self.image_sizes[camera];
            if size.area() == 0 {
                return Err(ParametersError::InvalidCamera {
                    camera,
                    reason: format!("empty image size {}x{}", size.width, size.height),
                });
            }
            let invertible = self
                .camera_matrix(camera)
                .and_then(|k| k.try_inverse())
                .is_some();
            if !invertible {
                return Err(ParametersError::InvalidCamera {
                    camera,
                    reason: "camera matrix is singular".to_string(),
                });
            }
            let coeffs = self.distortion[camera].len();
            if !self.lens.accepts_coefficients(coeffs) {
                let expected = match self.lens {
                    LensModel::Pinhole => "0, 4, 5, 8, 12 or 14",
                    LensModel::Omnidir => "4",
                };
                return Err(ParametersError::InvalidCamera {
                    camera,
                    reason: format!(
                        "{:?} model takes {expected} distortion coefficients, got {coeffs}",
                        self.lens
                    ),
                });
            }
        }
        Ok(())
    }

    /// Parse parameters from JSON on disk without validating them.
    pub fn read_json(path: impl AsRef<Path>) -> Result<Self, ParametersError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Load parameters from JSON on disk and validate them.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ParametersError> {
        let params = Self::read_json(path)?;
        params.validate()?;
        Ok(params)
    }

    /// Write these parameters to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ParametersError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
