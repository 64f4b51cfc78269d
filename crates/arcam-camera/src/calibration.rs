//! Accumulates board observations and turns them into [`CameraParameters`].

use std::sync::Arc;

use arcam_core::{
    BoardObservation, CalibrationFlags, CalibrationRequest, CalibrationSolver, CameraParameters,
    ImageSize, MonoCalibration, StereoCalibrationRequest,
};
use arcam_lifecycle::ControllerError;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Fewest points a single view may contribute.
pub const MIN_POINTS_PER_VIEW: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibratorConfig {
    pub flags: CalibrationFlags,
    /// Also solve for the pose of camera 1 relative to camera 0.
    pub stereo: bool,
    pub min_views: usize,
}

impl Default for CalibratorConfig {
    fn default() -> Self {
        Self {
            flags: CalibrationFlags::default(),
            stereo: false,
            min_views: 3,
        }
    }
}

/// Collects one [`BoardObservation`] per channel per view and calibrates the
/// rig through a [`CalibrationSolver`].
pub struct Calibrator {
    channel_count: usize,
    image_size: ImageSize,
    solver: Arc<dyn CalibrationSolver>,
    config: CalibratorConfig,
    /// `views[channel][view]`.
    views: Vec<Vec<BoardObservation>>,
}

impl Calibrator {
    pub fn new(
        channel_count: usize,
        image_size: ImageSize,
        solver: Arc<dyn CalibrationSolver>,
        config: CalibratorConfig,
    ) -> Result<Self, ControllerError> {
        if channel_count == 0 {
            return Err(ControllerError::invalid_argument(
                "calibrator needs at least one channel",
            ));
        }
        if image_size.area() == 0 {
            return Err(ControllerError::invalid_argument(format!(
                "calibration image size {}x{} is empty",
                image_size.width, image_size.height
            )));
        }
        if config.stereo && channel_count != 2 {
            return Err(ControllerError::missing_dependency(format!(
                "stereo calibration needs exactly 2 channels, rig has {channel_count}"
            )));
        }
        Ok(Self {
            channel_count,
            image_size,
            solver,
            config,
            views: vec![Vec::new(); channel_count],
        })
    }

    pub fn config(&self) -> &CalibratorConfig {
        &self.config
    }

    /// Add one view: an observation for every channel, in channel order.
    pub fn add_view(&mut self, observations: Vec<BoardObservation>) -> Result<(), ControllerError> {
        if observations.len() != self.channel_count {
            return Err(ControllerError::invalid_argument(format!(
                "view has {} observation(s), rig has {} channel(s)",
                observations.len(),
                self.channel_count
            )));
        }
        for (channel, obs) in observations.iter().enumerate() {
            if obs.object_points.len() != obs.image_points.len() {
                return Err(ControllerError::invalid_argument(format!(
                    "channel {channel}: {} object points but {} image points",
                    obs.object_points.len(),
                    obs.image_points.len()
                )));
            }
            if obs.len() < MIN_POINTS_PER_VIEW {
                return Err(ControllerError::invalid_argument(format!(
                    "channel {channel}: view has {} point(s), need at least {MIN_POINTS_PER_VIEW}",
                    obs.len()
                )));
            }
        }
        for (per_channel, obs) in self.views.iter_mut().zip(observations) {
            per_channel.push(obs);
        }
        Ok(())
    }

    pub fn view_count(&self) -> usize {
        self.views[0].len()
    }

    pub fn clear(&mut self) {
        for per_channel in &mut self.views {
            per_channel.clear();
        }
    }

    /// Calibrate every channel, then the stereo pair if configured.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self), fields(views = self.view_count()))
    )]
    pub fn calibrate(&self) -> Result<CameraParameters, ControllerError> {
        let views = self.view_count();
        if views < self.config.min_views {
            return Err(ControllerError::invalid_argument(format!(
                "calibration needs at least {} views, have {views}",
                self.config.min_views
            )));
        }

        let lens = self.config.flags.lens();
        let mono = self
            .views
            .iter()
            .enumerate()
            .map(|(channel, views)| {
                let request = CalibrationRequest {
                    lens,
                    image_size: self.image_size,
                    views,
                    flags: self.config.flags,
                };
                let result = self.solver.calibrate_camera(&request).map_err(|e| {
                    ControllerError::external(format!("calibrating camera {channel}"), e)
                })?;
                log::info!("camera {channel}: rms {:.4} px", result.rms);
                Ok(result)
            })
            .collect::<Result<Vec<MonoCalibration>, ControllerError>>()?;

        let stereo = if self.config.stereo {
            let request = StereoCalibrationRequest {
                lens,
                image_size: self.image_size,
                first_views: &self.views[0],
                second_views: &self.views[1],
                first: &mono[0],
                second: &mono[1],
                flags: self.config.flags,
            };
            let result = self
                .solver
                .calibrate_stereo(&request)
                .map_err(|e| ControllerError::external("calibrating stereo pair", e))?;
            log::info!(
                "stereo: rms {:.4} px, baseline {:.4}",
                result.rms,
                result.extrinsics.baseline()
            );
            Some(result.extrinsics)
        } else {
            None
        };

        let params = CameraParameters {
            camera_count: self.channel_count,
            lens,
            image_sizes: vec![self.image_size; self.channel_count],
            camera_matrices: mono
                .iter()
                .map(|m| {
                    let k = &m.camera_matrix;
                    [
                        [k[(0, 0)], k[(0, 1)], k[(0, 2)]],
                        [k[(1, 0)], k[(1, 1)], k[(1, 2)]],
                        [k[(2, 0)], k[(2, 1)], k[(2, 2)]],
                    ]
                })
                .collect(),
            distortion: mono.iter().map(|m| m.distortion.clone()).collect(),
            omnidir_xi: mono.iter().filter_map(|m| m.xi).collect(),
            stereo,
            calibration_flags: self.config.flags.to_bits(),
            reprojection_errors: mono.iter().map(|m| m.rms).collect(),
        };
        params
            .validate()
            .map_err(|e| ControllerError::external("solver returned unusable parameters", e))?;
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use arcam_core::{
        LensModel, NumericError, OmnidirCalibrationFlags, PinholeCalibrationFlags,
        StereoCalibration, StereoExtrinsics,
    };
    use nalgebra::{Matrix3, Point2, Point3};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockSolver {
        mono_views: Mutex<Vec<usize>>,
        fail: bool,
    }

    impl CalibrationSolver for MockSolver {
        fn calibrate_camera(
            &self,
            request: &CalibrationRequest<'_>,
        ) -> Result<MonoCalibration, NumericError> {
            if self.fail {
                return Err(NumericError::NotConverged("diverged".into()));
            }
            self.mono_views.lock().unwrap().push(request.views.len());
            let omnidir = request.lens == LensModel::Omnidir;
            Ok(MonoCalibration {
                camera_matrix: Matrix3::new(100.0, 0.0, 32.0, 0.0, 100.0, 24.0, 0.0, 0.0, 1.0),
                distortion: vec![0.0; if omnidir { 4 } else { 5 }],
                xi: omnidir.then_some(1.1),
                rms: 0.25,
            })
        }

        fn calibrate_stereo(
            &self,
            request: &StereoCalibrationRequest<'_>,
        ) -> Result<StereoCalibration, NumericError> {
            assert_eq!(request.first_views.len(), request.second_views.len());
            Ok(StereoCalibration {
                extrinsics: StereoExtrinsics {
                    rotation: [0.0, 0.0, 0.0],
                    translation: [-0.1, 0.0, 0.0],
                },
                rms: 0.4,
            })
        }
    }

    fn observation(shift: f64) -> BoardObservation {
        let object = (0..6)
            .map(|i| Point3::new((i % 3) as f64 * 0.03, (i / 3) as f64 * 0.03, 0.0))
            .collect();
        let image = (0..6)
            .map(|i| {
                Point2::new(
                    10.0 + shift + (i % 3) as f64 * 5.0,
                    10.0 + (i / 3) as f64 * 5.0,
                )
            })
            .collect();
        BoardObservation::new(object, image)
    }

    fn size() -> ImageSize {
        ImageSize::new(64, 48)
    }

    #[test]
    fn mono_calibration_builds_parameters() {
        let solver = Arc::new(MockSolver::default());
        let flags = PinholeCalibrationFlags {
            zero_tangent_dist: true,
            ..Default::default()
        };
        let config = CalibratorConfig {
            flags: CalibrationFlags::Pinhole(flags),
            ..Default::default()
        };
        let mut calibrator = Calibrator::new(1, size(), solver.clone(), config).unwrap();
        for i in 0..3 {
            calibrator.add_view(vec![observation(i as f64)]).unwrap();
        }
        let params = calibrator.calibrate().unwrap();
        assert_eq!(params.camera_count, 1);
        assert_eq!(params.camera_matrices[0][0][2], 32.0);
        assert_eq!(params.reprojection_errors, vec![0.25]);
        assert_eq!(params.calibration_flags, flags.to_bits());
        assert!(params.stereo.is_none());
        assert_eq!(*solver.mono_views.lock().unwrap(), vec![3]);
    }

    #[test]
    fn stereo_calibration_adds_extrinsics() {
        let config = CalibratorConfig {
            flags: CalibrationFlags::Omnidir(OmnidirCalibrationFlags::default()),
            stereo: true,
            min_views: 1,
        };
        let mut calibrator =
            Calibrator::new(2, size(), Arc::new(MockSolver::default()), config).unwrap();
        calibrator
            .add_view(vec![observation(0.0), observation(2.0)])
            .unwrap();
        let params = calibrator.calibrate().unwrap();
        assert_eq!(params.lens, LensModel::Omnidir);
        assert_eq!(params.omnidir_xi, vec![1.1, 1.1]);
        let stereo = params.stereo.unwrap();
        assert_relative_eq!(stereo.baseline(), 0.1, epsilon = 1e-12);
        assert_eq!(params.reprojection_errors, vec![0.25, 0.25]);
    }

    #[test]
    fn stereo_needs_two_channels() {
        let config = CalibratorConfig {
            stereo: true,
            ..Default::default()
        };
        let err = Calibrator::new(1, size(), Arc::new(MockSolver::default()), config)
            .err()
            .unwrap();
        assert!(matches!(err, ControllerError::MissingDependency(_)));
    }

    #[test]
    fn malformed_views_are_rejected() {
        let mut calibrator = Calibrator::new(
            2,
            size(),
            Arc::new(MockSolver::default()),
            CalibratorConfig::default(),
        )
        .unwrap();
        let err = calibrator.add_view(vec![observation(0.0)]).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidArgument(_)));

        let mut short = observation(0.0);
        short.image_points.pop();
        let err = calibrator
            .add_view(vec![observation(0.0), short])
            .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidArgument(_)));
        assert_eq!(calibrator.view_count(), 0);
    }

    #[test]
    fn too_few_views_or_solver_failure() {
        let mut calibrator = Calibrator::new(
            1,
            size(),
            Arc::new(MockSolver {
                fail: true,
                ..Default::default()
            }),
            CalibratorConfig::default(),
        )
        .unwrap();
        calibrator.add_view(vec![observation(0.0)]).unwrap();
        assert!(matches!(
            calibrator.calibrate(),
            Err(ControllerError::InvalidArgument(_))
        ));
        calibrator.add_view(vec![observation(1.0)]).unwrap();
        calibrator.add_view(vec![observation(2.0)]).unwrap();
        assert!(matches!(
            calibrator.calibrate(),
            Err(ControllerError::External { .. })
        ));
        calibrator.clear();
        assert_eq!(calibrator.view_count(), 0);
    }
}
