//! Pure-Rust [`NumericBackend`].
//!
//! Pinhole maps use the Brown–Conrady model with OpenCV's coefficient order
//! `k1 k2 p1 p2 [k3 [k4 k5 k6 [s1 s2 s3 s4]]]`. Omnidirectional maps use the
//! unified (Mei) model `k1 k2 p1 p2` plus `xi`. Stereo rectification follows
//! Bouguet: each camera is rotated half-way, then both are aligned with the
//! baseline.

use nalgebra::{Matrix3, Matrix3x4, Matrix4, Rotation3, Vector2, Vector3};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::image::{sample_bilinear_u8, sample_nearest};
use crate::numeric::{
    CameraIntrinsics, Interpolation, MapRequest, NumericBackend, NumericError,
    RectificationKind, StereoRectification, UndistortMaps,
};
use crate::{FrameFormat, FrameImage, FrameImageView, ImageSize, StereoExtrinsics};

/// Source coordinate written for output pixels with no valid source ray.
const INVALID_COORD: f32 = -1.0;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct BrownConrady {
    k: [f64; 6],
    p: [f64; 2],
    s: [f64; 4],
}

impl BrownConrady {
    fn from_coeffs(coeffs: &[f64]) -> Result<Self, NumericError> {
        let mut c = [0.0; 14];
        match coeffs.len() {
            0 | 4 | 5 | 8 | 12 => c[..coeffs.len()].copy_from_slice(coeffs),
            14 => {
                if coeffs[12] != 0.0 || coeffs[13] != 0.0 {
                    return Err(NumericError::Unsupported("tilted sensor model"));
                }
                c.copy_from_slice(coeffs);
            }
            n => {
                return Err(NumericError::invalid(format!(
                    "expected 0, 4, 5, 8, 12 or 14 distortion coefficients, got {n}"
                )))
            }
        }
        Ok(Self {
            k: [c[0], c[1], c[4], c[5], c[6], c[7]],
            p: [c[2], c[3]],
            s: [c[8], c[9], c[10], c[11]],
        })
    }

    fn distort(&self, n: Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let [k1, k2, k3, k4, k5, k6] = self.k;
        let [p1, p2] = self.p;
        let [s1, s2, s3, s4] = self.s;

        let radial = (1.0 + k1 * r2 + k2 * r4 + k3 * r6) / (1.0 + k4 * r2 + k5 * r4 + k6 * r6);
        let xy = x * y;
        let dx = 2.0 * p1 * xy + p2 * (r2 + 2.0 * x * x) + s1 * r2 + s2 * r4;
        let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * xy + s3 * r2 + s4 * r4;
        Vector2::new(x * radial + dx, y * radial + dy)
    }
}

fn project(k: &Matrix3<f64>, n: Vector2<f64>) -> (f32, f32) {
    let u = k[(0, 0)] * n.x + k[(0, 1)] * n.y + k[(0, 2)];
    let v = k[(1, 1)] * n.y + k[(1, 2)];
    (u as f32, v as f32)
}

fn inverse(m: &Matrix3<f64>, what: &str) -> Result<Matrix3<f64>, NumericError> {
    m.try_inverse()
        .ok_or_else(|| NumericError::invalid(format!("{what} is singular")))
}

fn check_size(size: ImageSize) -> Result<(), NumericError> {
    if size.area() == 0 {
        return Err(NumericError::invalid(format!(
            "empty map size {}x{}",
            size.width, size.height
        )));
    }
    Ok(())
}

/// Output ray of the omnidirectional projection for normalized output
/// coordinates `(x, y)`; `None` where the projection is undefined.
fn omnidir_ray(kind: RectificationKind, x: f64, y: f64) -> Option<Vector3<f64>> {
    match kind {
        RectificationKind::Perspective => Some(Vector3::new(x, y, 1.0)),
        RectificationKind::Cylindrical => Some(Vector3::new(x.sin(), y, x.cos())),
        RectificationKind::Longlati => Some(Vector3::new(
            -x.cos(),
            -x.sin() * y.cos(),
            x.sin() * y.sin(),
        )),
        RectificationKind::Stereographic => {
            let rr = x * x + y * y;
            let a = rr + 1.0;
            let b = 2.0 * rr;
            let c = rr - 1.0;
            let disc = b * b - 4.0 * a * c;
            if disc < 0.0 {
                return None;
            }
            let z = (-b + disc.sqrt()) / (2.0 * a);
            Some(Vector3::new(x + z * x, y + z * y, z))
        }
    }
}

/// Numeric backend implemented in plain Rust on top of `nalgebra`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReferenceBackend;

impl ReferenceBackend {
    pub fn new() -> Self {
        Self
    }
}

impl NumericBackend for ReferenceBackend {
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all))]
    fn init_undistort_rectify_map(
        &self,
        request: &MapRequest<'_>,
    ) -> Result<UndistortMaps, NumericError> {
        check_size(request.size)?;
        let model = BrownConrady::from_coeffs(request.distortion)?;
        let ikr = inverse(
            &(request.new_camera_matrix * request.rectification),
            "new camera matrix × rectification",
        )?;
        let k = request.camera_matrix;

        let ImageSize { width, height } = request.size;
        let mut maps = UndistortMaps {
            width,
            height,
            map_x: Vec::with_capacity(width * height),
            map_y: Vec::with_capacity(width * height),
        };
        for v in 0..height {
            for u in 0..width {
                let ray = ikr * Vector3::new(u as f64, v as f64, 1.0);
                let (sx, sy) = if ray.z.abs() > f64::EPSILON {
                    project(&k, model.distort(Vector2::new(ray.x / ray.z, ray.y / ray.z)))
                } else {
                    (INVALID_COORD, INVALID_COORD)
                };
                maps.map_x.push(sx);
                maps.map_y.push(sy);
            }
        }
        Ok(maps)
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(xi = %xi, kind = ?kind))
    )]
    fn omnidir_init_undistort_rectify_map(
        &self,
        request: &MapRequest<'_>,
        xi: f64,
        kind: RectificationKind,
    ) -> Result<UndistortMaps, NumericError> {
        check_size(request.size)?;
        if request.distortion.len() != 4 {
            return Err(NumericError::invalid(format!(
                "omnidirectional model expects 4 distortion coefficients, got {}",
                request.distortion.len()
            )));
        }
        if !xi.is_finite() || xi < 0.0 {
            return Err(NumericError::invalid(format!("invalid xi {xi}")));
        }
        let model = BrownConrady::from_coeffs(request.distortion)?;
        let inv_new_k = inverse(&request.new_camera_matrix, "new camera matrix")?;
        let rt = request.rectification.transpose();
        let k = request.camera_matrix;

        let ImageSize { width, height } = request.size;
        let mut maps = UndistortMaps {
            width,
            height,
            map_x: Vec::with_capacity(width * height),
            map_y: Vec::with_capacity(width * height),
        };
        for v in 0..height {
            for u in 0..width {
                let pp = inv_new_k * Vector3::new(u as f64, v as f64, 1.0);
                let coord = omnidir_ray(kind, pp.x / pp.z, pp.y / pp.z)
                    .map(|ray| rt * ray)
                    .and_then(|ray| {
                        let s = ray.try_normalize(f64::EPSILON)?;
                        let denom = s.z + xi;
                        (denom > f64::EPSILON).then(|| {
                            project(&k, model.distort(Vector2::new(s.x / denom, s.y / denom)))
                        })
                    })
                    .unwrap_or((INVALID_COORD, INVALID_COORD));
                maps.map_x.push(coord.0);
                maps.map_y.push(coord.1);
            }
        }
        Ok(maps)
    }

    fn stereo_rectify(
        &self,
        first: &CameraIntrinsics<'_>,
        second: &CameraIntrinsics<'_>,
        size: ImageSize,
        extrinsics: &StereoExtrinsics,
    ) -> Result<StereoRectification, NumericError> {
        check_size(size)?;
        let t = extrinsics.translation_vector();
        let t_norm = t.norm();
        if t_norm <= f64::EPSILON {
            return Err(NumericError::invalid("stereo baseline is zero"));
        }

        let om = Vector3::from(extrinsics.rotation);
        let r_half = Rotation3::from_scaled_axis(-0.5 * om).into_inner();
        let t_half = r_half * t;

        // Align the baseline with x (or y for vertical rigs).
        let axis = if t_half.x.abs() >= t_half.y.abs() { 0 } else { 1 };
        let mut uu = Vector3::zeros();
        uu[axis] = if t_half[axis] > 0.0 { 1.0 } else { -1.0 };
        let ww = t_half.cross(&uu);
        let nw = ww.norm();
        let w_r = if nw > f64::EPSILON {
            let angle = (t_half[axis].abs() / t_half.norm()).clamp(-1.0, 1.0).acos();
            Rotation3::from_scaled_axis(ww * (angle / nw)).into_inner()
        } else {
            Matrix3::identity()
        };

        let r1 = w_r * r_half.transpose();
        let r2 = w_r * r_half;
        let t_new = r2 * t;

        let f = first.camera_matrix[(1, 1)].min(second.camera_matrix[(1, 1)]);
        if f <= 0.0 {
            return Err(NumericError::invalid("non-positive focal length"));
        }
        let cx = (size.width as f64 - 1.0) * 0.5;
        let cy = (size.height as f64 - 1.0) * 0.5;

        let mut p1 = Matrix3x4::zeros();
        p1[(0, 0)] = f;
        p1[(1, 1)] = f;
        p1[(0, 2)] = cx;
        p1[(1, 2)] = cy;
        p1[(2, 2)] = 1.0;
        let mut p2 = p1;
        p2[(axis, 3)] = t_new[axis] * f;

        let mut q = Matrix4::zeros();
        q[(0, 0)] = 1.0;
        q[(1, 1)] = 1.0;
        q[(0, 3)] = -cx;
        q[(1, 3)] = -cy;
        q[(2, 3)] = f;
        q[(3, 2)] = -1.0 / t_new[axis];

        log::debug!(
            "stereo rectification: baseline {:.4}, focal {:.2}, axis {}",
            t_norm,
            f,
            if axis == 0 { "x" } else { "y" }
        );
        Ok(StereoRectification { r1, r2, p1, p2, q })
    }

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip_all))]
    fn remap(
        &self,
        src: &FrameImageView<'_>,
        maps: &UndistortMaps,
        interpolation: Interpolation,
        dst: &mut FrameImage,
    ) -> Result<(), NumericError> {
        if !maps.is_consistent() {
            return Err(NumericError::invalid("map length does not match map size"));
        }
        if src.format.byte_len() != Some(src.data.len()) {
            return Err(NumericError::invalid("source buffer does not match its format"));
        }
        let format = FrameFormat::new(maps.width, maps.height, src.format.pixel_format);
        if dst.format != format || !dst.is_consistent() {
            *dst = FrameImage::new(format);
        }

        let bpp = format.pixel_format.bytes_per_pixel();
        let row = format.row_bytes();
        for y in 0..maps.height {
            let line = &mut dst.data[y * row..(y + 1) * row];
            for x in 0..maps.width {
                let (sx, sy) = maps.get(x, y);
                let px = &mut line[x * bpp..(x + 1) * bpp];
                for (c, out) in px.iter_mut().enumerate() {
                    *out = match interpolation {
                        Interpolation::Nearest => sample_nearest(src, sx, sy, c),
                        Interpolation::Bilinear => sample_bilinear_u8(src, sx, sy, c),
                    };
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PixelFormat, StereoExtrinsics};
    use approx::assert_relative_eq;

    fn k(f: f64, size: ImageSize) -> Matrix3<f64> {
        Matrix3::new(
            f,
            0.0,
            (size.width as f64 - 1.0) * 0.5,
            0.0,
            f,
            (size.height as f64 - 1.0) * 0.5,
            0.0,
            0.0,
            1.0,
        )
    }

    #[test]
    fn zero_distortion_gives_identity_maps() {
        let size = ImageSize::new(16, 12);
        let dist = [0.0; 5];
        let maps = ReferenceBackend
            .init_undistort_rectify_map(&MapRequest::undistort(k(20.0, size), &dist, size))
            .unwrap();
        let identity = UndistortMaps::identity(size);
        for (a, b) in maps.map_x.iter().zip(&identity.map_x) {
            assert_relative_eq!(*a, *b, epsilon = 1e-4);
        }
        for (a, b) in maps.map_y.iter().zip(&identity.map_y) {
            assert_relative_eq!(*a, *b, epsilon = 1e-4);
        }
    }

    #[test]
    fn barrel_distortion_pulls_corners_inward() {
        let size = ImageSize::new(64, 48);
        let dist = [-0.3, 0.0, 0.0, 0.0, 0.0];
        let maps = ReferenceBackend
            .init_undistort_rectify_map(&MapRequest::undistort(k(40.0, size), &dist, size))
            .unwrap();
        let (sx, sy) = maps.get(0, 0);
        assert!(sx > 0.0 && sy > 0.0, "corner maps to ({sx}, {sy})");
        // The principal point is a fixed point of any radial model.
        let (cx, cy) = maps.get(32, 24);
        assert_relative_eq!(cx, 32.0, epsilon = 0.6);
        assert_relative_eq!(cy, 24.0, epsilon = 0.6);
    }

    #[test]
    fn unsupported_coefficient_count_is_rejected() {
        let size = ImageSize::new(8, 8);
        let dist = [0.0; 6];
        let err = ReferenceBackend
            .init_undistort_rectify_map(&MapRequest::undistort(k(10.0, size), &dist, size))
            .unwrap_err();
        assert!(matches!(err, NumericError::InvalidInput(_)));
    }

    #[test]
    fn omnidir_with_zero_xi_matches_pinhole() {
        let size = ImageSize::new(32, 24);
        let dist = [-0.1, 0.02, 0.001, -0.001];
        let req = MapRequest::undistort(k(30.0, size), &dist, size);
        let pinhole = ReferenceBackend.init_undistort_rectify_map(&req).unwrap();
        let omni = ReferenceBackend
            .omnidir_init_undistort_rectify_map(&req, 0.0, RectificationKind::Perspective)
            .unwrap();
        for (a, b) in pinhole.map_x.iter().zip(&omni.map_x) {
            assert_relative_eq!(*a, *b, epsilon = 1e-3);
        }
        for (a, b) in pinhole.map_y.iter().zip(&omni.map_y) {
            assert_relative_eq!(*a, *b, epsilon = 1e-3);
        }
    }

    #[test]
    fn every_rectification_kind_maps_the_optical_axis_to_the_principal_point() {
        let size = ImageSize::new(33, 33);
        let dist = [0.0; 4];
        let cam = k(25.0, size);
        for kind in [
            RectificationKind::Perspective,
            RectificationKind::Cylindrical,
            RectificationKind::Stereographic,
        ] {
            let maps = ReferenceBackend
                .omnidir_init_undistort_rectify_map(
                    &MapRequest::undistort(cam, &dist, size),
                    0.8,
                    kind,
                )
                .unwrap();
            let (x, y) = maps.get(16, 16);
            assert_relative_eq!(x, 16.0, epsilon = 1e-3);
            assert_relative_eq!(y, 16.0, epsilon = 1e-3);
        }

        // Longitude-latitude puts the optical axis at (pi/2, pi/2).
        let pi = std::f64::consts::PI;
        let new_k = Matrix3::new(32.0 / pi, 0.0, 0.0, 0.0, 32.0 / pi, 0.0, 0.0, 0.0, 1.0);
        let req = MapRequest {
            new_camera_matrix: new_k,
            ..MapRequest::undistort(cam, &dist, size)
        };
        let maps = ReferenceBackend
            .omnidir_init_undistort_rectify_map(&req, 0.8, RectificationKind::Longlati)
            .unwrap();
        let (x, y) = maps.get(16, 16);
        assert_relative_eq!(x, 16.0, epsilon = 1e-3);
        assert_relative_eq!(y, 16.0, epsilon = 1e-3);
    }

    #[test]
    fn bouguet_rectification_leaves_pure_translation() {
        let size = ImageSize::new(64, 48);
        let cam = k(50.0, size);
        let dist = [0.0; 5];
        let intr = CameraIntrinsics {
            camera_matrix: cam,
            distortion: &dist,
        };
        let extrinsics = StereoExtrinsics {
            rotation: [0.01, -0.03, 0.02],
            translation: [-0.12, 0.004, 0.002],
        };
        let rect = ReferenceBackend
            .stereo_rectify(&intr, &intr, size, &extrinsics)
            .unwrap();

        let r = extrinsics.rotation_matrix();
        let residual = rect.r2 * r * rect.r1.transpose();
        assert_relative_eq!(residual, Matrix3::identity(), epsilon = 1e-9);

        let t_new = rect.r2 * extrinsics.translation_vector();
        assert_relative_eq!(t_new.y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(t_new.z, 0.0, epsilon = 1e-9);
        assert_relative_eq!(rect.p2[(0, 3)], t_new.x * 50.0, epsilon = 1e-9);
    }

    #[test]
    fn zero_baseline_is_rejected() {
        let size = ImageSize::new(8, 8);
        let dist = [0.0; 5];
        let intr = CameraIntrinsics {
            camera_matrix: k(10.0, size),
            distortion: &dist,
        };
        let extrinsics = StereoExtrinsics {
            rotation: [0.0; 3],
            translation: [0.0; 3],
        };
        assert!(ReferenceBackend
            .stereo_rectify(&intr, &intr, size, &extrinsics)
            .is_err());
    }

    #[test]
    fn remap_shifts_with_zero_border() {
        let format = FrameFormat::new(3, 1, PixelFormat::Gray8);
        let src = FrameImage {
            format,
            data: vec![10, 20, 30],
        };
        let mut maps = UndistortMaps::identity(format.size());
        for x in maps.map_x.iter_mut() {
            *x += 1.0;
        }
        let mut dst = FrameImage::new(format);
        ReferenceBackend
            .remap(&src.view(), &maps, Interpolation::Nearest, &mut dst)
            .unwrap();
        assert_eq!(dst.data, vec![20, 30, 0]);

        ReferenceBackend
            .remap(
                &src.view(),
                &UndistortMaps::identity(format.size()),
                Interpolation::Bilinear,
                &mut dst,
            )
            .unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn remap_resizes_mismatched_destination() {
        let src = FrameImage::filled(FrameFormat::new(4, 4, PixelFormat::Rgb24), 9);
        let maps = UndistortMaps::identity(ImageSize::new(2, 2));
        let mut dst = FrameImage::new(FrameFormat::new(1, 1, PixelFormat::Gray8));
        ReferenceBackend
            .remap(&src.view(), &maps, Interpolation::Bilinear, &mut dst)
            .unwrap();
        assert_eq!(dst.format, FrameFormat::new(2, 2, PixelFormat::Rgb24));
        assert!(dst.data.iter().all(|&b| b == 9));
    }
}
