//! Typed calibration-flag holders.
//!
//! Both holders convert to and from the raw integer stored in
//! [`CameraParameters::calibration_flags`](crate::CameraParameters), using the
//! bit values of OpenCV's `calib3d` and `ccalib/omnidir` modules so that
//! parameter files stay interchangeable with OpenCV tooling.

use serde::{Deserialize, Serialize};

pub mod pinhole_bits {
    pub const USE_INTRINSIC_GUESS: u32 = 1;
    pub const FIX_ASPECT_RATIO: u32 = 1 << 1;
    pub const FIX_PRINCIPAL_POINT: u32 = 1 << 2;
    pub const ZERO_TANGENT_DIST: u32 = 1 << 3;
    pub const FIX_FOCAL_LENGTH: u32 = 1 << 4;
    pub const FIX_K1: u32 = 1 << 5;
    pub const FIX_K2: u32 = 1 << 6;
    pub const FIX_K3: u32 = 1 << 7;
    pub const FIX_INTRINSIC: u32 = 1 << 8;
    pub const SAME_FOCAL_LENGTH: u32 = 1 << 9;
    pub const ZERO_DISPARITY: u32 = 1 << 10;
    pub const FIX_K4: u32 = 1 << 11;
    pub const FIX_K5: u32 = 1 << 12;
    pub const FIX_K6: u32 = 1 << 13;
    pub const RATIONAL_MODEL: u32 = 1 << 14;
    pub const THIN_PRISM_MODEL: u32 = 1 << 15;
    pub const FIX_S1_S2_S3_S4: u32 = 1 << 16;
    pub const TILTED_MODEL: u32 = 1 << 18;
    pub const FIX_TAUX_TAUY: u32 = 1 << 19;
}

pub mod omnidir_bits {
    pub const USE_GUESS: u32 = 1;
    pub const FIX_SKEW: u32 = 1 << 1;
    pub const FIX_K1: u32 = 1 << 2;
    pub const FIX_K2: u32 = 1 << 3;
    pub const FIX_P1: u32 = 1 << 4;
    pub const FIX_P2: u32 = 1 << 5;
    pub const FIX_XI: u32 = 1 << 6;
    pub const FIX_GAMMA: u32 = 1 << 7;
    pub const FIX_CENTER: u32 = 1 << 8;
}

/// Flags for pinhole (Brown–Conrady) mono and stereo calibration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct PinholeCalibrationFlags {
    pub use_intrinsic_guess: bool,
    pub fix_aspect_ratio: bool,
    pub fix_principal_point: bool,
    pub zero_tangent_dist: bool,
    pub fix_focal_length: bool,
    /// `fix_k[i]` fixes radial coefficient `k(i+1)`.
    pub fix_k: [bool; 6],
    pub rational_model: bool,
    pub thin_prism_model: bool,
    pub fix_s1_s2_s3_s4: bool,
    pub tilted_model: bool,
    pub fix_taux_tauy: bool,
    // Stereo-only.
    pub fix_intrinsic: bool,
    pub same_focal_length: bool,
    pub zero_disparity: bool,
}

const PINHOLE_K_BITS: [u32; 6] = [
    pinhole_bits::FIX_K1,
    pinhole_bits::FIX_K2,
    pinhole_bits::FIX_K3,
    pinhole_bits::FIX_K4,
    pinhole_bits::FIX_K5,
    pinhole_bits::FIX_K6,
];

impl PinholeCalibrationFlags {
    pub fn to_bits(&self) -> u32 {
        use pinhole_bits::*;
        let mut bits = 0;
        let mut set = |on: bool, bit: u32| {
            if on {
                bits |= bit;
            }
        };
        set(self.use_intrinsic_guess, USE_INTRINSIC_GUESS);
        set(self.fix_aspect_ratio, FIX_ASPECT_RATIO);
        set(self.fix_principal_point, FIX_PRINCIPAL_POINT);
        set(self.zero_tangent_dist, ZERO_TANGENT_DIST);
        set(self.fix_focal_length, FIX_FOCAL_LENGTH);
        for (on, bit) in self.fix_k.iter().zip(PINHOLE_K_BITS) {
            set(*on, bit);
        }
        set(self.rational_model, RATIONAL_MODEL);
        set(self.thin_prism_model, THIN_PRISM_MODEL);
        set(self.fix_s1_s2_s3_s4, FIX_S1_S2_S3_S4);
        set(self.tilted_model, TILTED_MODEL);
        set(self.fix_taux_tauy, FIX_TAUX_TAUY);
        set(self.fix_intrinsic, FIX_INTRINSIC);
        set(self.same_focal_length, SAME_FOCAL_LENGTH);
        set(self.zero_disparity, ZERO_DISPARITY);
        bits
    }

    /// Decode a raw flags integer. Unknown bits are ignored.
    pub fn from_bits(bits: u32) -> Self {
        use pinhole_bits::*;
        let has = |bit: u32| bits & bit != 0;
        Self {
            use_intrinsic_guess: has(USE_INTRINSIC_GUESS),
            fix_aspect_ratio: has(FIX_ASPECT_RATIO),
            fix_principal_point: has(FIX_PRINCIPAL_POINT),
            zero_tangent_dist: has(ZERO_TANGENT_DIST),
            fix_focal_length: has(FIX_FOCAL_LENGTH),
            fix_k: PINHOLE_K_BITS.map(has),
            rational_model: has(RATIONAL_MODEL),
            thin_prism_model: has(THIN_PRISM_MODEL),
            fix_s1_s2_s3_s4: has(FIX_S1_S2_S3_S4),
            tilted_model: has(TILTED_MODEL),
            fix_taux_tauy: has(FIX_TAUX_TAUY),
            fix_intrinsic: has(FIX_INTRINSIC),
            same_focal_length: has(SAME_FOCAL_LENGTH),
            zero_disparity: has(ZERO_DISPARITY),
        }
    }

    /// Number of distortion coefficients the enabled models estimate.
    pub fn distortion_len(&self) -> usize {
        if self.tilted_model {
            14
        } else if self.thin_prism_model {
            12
        } else if self.rational_model {
            8
        } else {
            5
        }
    }
}

/// Flags for unified (Mei) omnidirectional calibration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct OmnidirCalibrationFlags {
    pub use_guess: bool,
    pub fix_skew: bool,
    pub fix_k1: bool,
    pub fix_k2: bool,
    pub fix_p1: bool,
    pub fix_p2: bool,
    pub fix_xi: bool,
    pub fix_gamma: bool,
    pub fix_center: bool,
}

impl OmnidirCalibrationFlags {
    fn table(&self) -> [(bool, u32); 9] {
        use omnidir_bits::*;
        [
            (self.use_guess, USE_GUESS),
            (self.fix_skew, FIX_SKEW),
            (self.fix_k1, FIX_K1),
            (self.fix_k2, FIX_K2),
            (self.fix_p1, FIX_P1),
            (self.fix_p2, FIX_P2),
            (self.fix_xi, FIX_XI),
            (self.fix_gamma, FIX_GAMMA),
            (self.fix_center, FIX_CENTER),
        ]
    }

    pub fn to_bits(&self) -> u32 {
        self.table()
            .iter()
            .filter(|(on, _)| *on)
            .fold(0, |acc, (_, bit)| acc | bit)
    }

    /// Decode a raw flags integer. Unknown bits are ignored.
    pub fn from_bits(bits: u32) -> Self {
        use omnidir_bits::*;
        let has = |bit: u32| bits & bit != 0;
        Self {
            use_guess: has(USE_GUESS),
            fix_skew: has(FIX_SKEW),
            fix_k1: has(FIX_K1),
            fix_k2: has(FIX_K2),
            fix_p1: has(FIX_P1),
            fix_p2: has(FIX_P2),
            fix_xi: has(FIX_XI),
            fix_gamma: has(FIX_GAMMA),
            fix_center: has(FIX_CENTER),
        }
    }
}

/// Either flag holder, matching the lens model being calibrated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "lens", rename_all = "snake_case")]
pub enum CalibrationFlags {
    Pinhole(PinholeCalibrationFlags),
    Omnidir(OmnidirCalibrationFlags),
}

impl CalibrationFlags {
    pub fn to_bits(&self) -> u32 {
        match self {
            CalibrationFlags::Pinhole(f) => f.to_bits(),
            CalibrationFlags::Omnidir(f) => f.to_bits(),
        }
    }

    pub fn lens(&self) -> crate::LensModel {
        match self {
            CalibrationFlags::Pinhole(_) => crate::LensModel::Pinhole,
            CalibrationFlags::Omnidir(_) => crate::LensModel::Omnidir,
        }
    }
}

impl Default for CalibrationFlags {
    fn default() -> Self {
        CalibrationFlags::Pinhole(PinholeCalibrationFlags::default())
    }
}
