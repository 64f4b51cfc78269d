//! Undistortion controller.
//!
//! Lens model × arity selects a map builder from [`STRATEGIES`]. Maps are
//! built once the camera is started (its rig is then sized), and a remap
//! transform is registered on the rig while the controller is started,
//! either inline or on a [`TransformWorker`] thread.

use std::f64::consts::PI;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use arcam_core::{
    CameraIntrinsics, CameraParameters, FrameImage, ImageSize, Interpolation, LensModel,
    MapRequest, NumericBackend, NumericError, ParametersError, RectificationKind,
    StereoRectification, UndistortMaps,
};
use arcam_lifecycle::{Behavior, Controller, ControllerError, Lifecycle};
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

use crate::rig::TransformId;
use crate::{
    lock, Camera, FrameTransform, SharedRig, TransformError, TransformWorker, WorkerMonitor,
    WorkerStats,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arity {
    #[default]
    Mono,
    Stereo,
}

impl Arity {
    pub fn camera_count(self) -> usize {
        match self {
            Arity::Mono => 1,
            Arity::Stereo => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UndistortionVariant {
    pub lens: LensModel,
    pub arity: Arity,
}

pub type MapBuilder = fn(
    &dyn NumericBackend,
    &CameraParameters,
    &UndistortionConfig,
) -> Result<Vec<UndistortMaps>, NumericError>;

/// Map builder for each supported lens × arity combination.
pub const STRATEGIES: [(UndistortionVariant, MapBuilder); 4] = [
    (
        UndistortionVariant::new(LensModel::Pinhole, Arity::Mono),
        pinhole_mono,
    ),
    (
        UndistortionVariant::new(LensModel::Pinhole, Arity::Stereo),
        pinhole_stereo,
    ),
    (
        UndistortionVariant::new(LensModel::Omnidir, Arity::Mono),
        omnidir_mono,
    ),
    (
        UndistortionVariant::new(LensModel::Omnidir, Arity::Stereo),
        omnidir_stereo,
    ),
];

impl UndistortionVariant {
    pub const fn new(lens: LensModel, arity: Arity) -> Self {
        Self { lens, arity }
    }

    /// Build one map pair per camera with the strategy for this variant.
    pub fn build_maps(
        &self,
        backend: &dyn NumericBackend,
        params: &CameraParameters,
        config: &UndistortionConfig,
    ) -> Result<Vec<UndistortMaps>, NumericError> {
        let builder = STRATEGIES
            .iter()
            .find(|(variant, _)| variant == self)
            .map(|(_, builder)| *builder)
            .ok_or(NumericError::Unsupported("undistortion variant"))?;
        builder(backend, params, config)
    }
}

fn camera_matrix(params: &CameraParameters, i: usize) -> Result<Matrix3<f64>, NumericError> {
    params
        .camera_matrix(i)
        .ok_or_else(|| NumericError::invalid(format!("no camera matrix for camera {i}")))
}

fn stereo_rectification(
    backend: &dyn NumericBackend,
    params: &CameraParameters,
) -> Result<StereoRectification, NumericError> {
    let extrinsics = params
        .stereo
        .as_ref()
        .ok_or_else(|| NumericError::invalid("stereo extrinsics are missing"))?;
    let first = CameraIntrinsics {
        camera_matrix: camera_matrix(params, 0)?,
        distortion: &params.distortion[0],
    };
    let second = CameraIntrinsics {
        camera_matrix: camera_matrix(params, 1)?,
        distortion: &params.distortion[1],
    };
    backend.stereo_rectify(&first, &second, params.image_sizes[0], extrinsics)
}

/// Output intrinsics for omnidirectional rectification.
fn omnidir_new_camera_matrix(kind: RectificationKind, size: ImageSize) -> Matrix3<f64> {
    let (w, h) = (size.width as f64, size.height as f64);
    match kind {
        RectificationKind::Perspective | RectificationKind::Stereographic => {
            Matrix3::new(w / 4.0, 0.0, w / 2.0, 0.0, h / 4.0, h / 2.0, 0.0, 0.0, 1.0)
        }
        RectificationKind::Cylindrical => {
            Matrix3::new(w / PI, 0.0, w / 2.0, 0.0, h / 4.0, h / 2.0, 0.0, 0.0, 1.0)
        }
        RectificationKind::Longlati => {
            Matrix3::new(w / PI, 0.0, 0.0, 0.0, h / PI, 0.0, 0.0, 0.0, 1.0)
        }
    }
}

fn pinhole_mono(
    backend: &dyn NumericBackend,
    params: &CameraParameters,
    _config: &UndistortionConfig,
) -> Result<Vec<UndistortMaps>, NumericError> {
    let k = camera_matrix(params, 0)?;
    let maps = backend.init_undistort_rectify_map(&MapRequest::undistort(
        k,
        &params.distortion[0],
        params.image_sizes[0],
    ))?;
    Ok(vec![maps])
}

fn pinhole_stereo(
    backend: &dyn NumericBackend,
    params: &CameraParameters,
    _config: &UndistortionConfig,
) -> Result<Vec<UndistortMaps>, NumericError> {
    let rect = stereo_rectification(backend, params)?;
    let rotations = [rect.r1, rect.r2];
    let projections = [rect.new_camera_matrix_1(), rect.new_camera_matrix_2()];
    (0..2)
        .map(|i| {
            backend.init_undistort_rectify_map(&MapRequest {
                camera_matrix: camera_matrix(params, i)?,
                distortion: &params.distortion[i],
                rectification: rotations[i],
                new_camera_matrix: projections[i],
                size: params.image_sizes[i],
            })
        })
        .collect()
}

fn omnidir_mono(
    backend: &dyn NumericBackend,
    params: &CameraParameters,
    config: &UndistortionConfig,
) -> Result<Vec<UndistortMaps>, NumericError> {
    let size = params.image_sizes[0];
    let request = MapRequest {
        camera_matrix: camera_matrix(params, 0)?,
        distortion: &params.distortion[0],
        rectification: Matrix3::identity(),
        new_camera_matrix: omnidir_new_camera_matrix(config.rectification, size),
        size,
    };
    let maps = backend.omnidir_init_undistort_rectify_map(
        &request,
        params.omnidir_xi[0],
        config.rectification,
    )?;
    Ok(vec![maps])
}

fn omnidir_stereo(
    backend: &dyn NumericBackend,
    params: &CameraParameters,
    config: &UndistortionConfig,
) -> Result<Vec<UndistortMaps>, NumericError> {
    let rect = stereo_rectification(backend, params)?;
    let rotations = [rect.r1, rect.r2];
    (0..2)
        .map(|i| {
            let size = params.image_sizes[i];
            let request = MapRequest {
                camera_matrix: camera_matrix(params, i)?,
                distortion: &params.distortion[i],
                rectification: rotations[i],
                new_camera_matrix: omnidir_new_camera_matrix(config.rectification, size),
                size,
            };
            backend.omnidir_init_undistort_rectify_map(
                &request,
                params.omnidir_xi[i],
                config.rectification,
            )
        })
        .collect()
}

/// Where the undistortion controller gets its calibration from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterSource {
    Inline(CameraParameters),
    /// JSON file, read on every `configure()`.
    File(PathBuf),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndistortionConfig {
    pub arity: Arity,
    /// Run the remap on a worker thread instead of inline on publish.
    pub threaded: bool,
    pub interpolation: Interpolation,
    /// Output projection, omnidirectional lenses only.
    pub rectification: RectificationKind,
}

impl Default for UndistortionConfig {
    fn default() -> Self {
        Self {
            arity: Arity::Mono,
            threaded: true,
            interpolation: Interpolation::Bilinear,
            rectification: RectificationKind::Perspective,
        }
    }
}

/// Remaps every channel through its precomputed maps.
struct RemapTransform {
    backend: Arc<dyn NumericBackend>,
    maps: Arc<Vec<UndistortMaps>>,
    interpolation: Interpolation,
    scratch: Vec<FrameImage>,
}

impl FrameTransform for RemapTransform {
    fn name(&self) -> &str {
        "undistortion remap"
    }

    fn apply(&mut self, frames: &mut [FrameImage]) -> Result<(), TransformError> {
        if frames.len() != self.maps.len() {
            return Err(TransformError::ChannelCount {
                expected: self.maps.len(),
                got: frames.len(),
            });
        }
        while self.scratch.len() < frames.len() {
            self.scratch.push(frames[self.scratch.len()].clone());
        }
        for ((frame, maps), out) in frames
            .iter_mut()
            .zip(self.maps.iter())
            .zip(self.scratch.iter_mut())
        {
            self.backend
                .remap(&frame.view(), maps, self.interpolation, out)?;
            std::mem::swap(frame, out);
        }
        Ok(())
    }
}

/// Hands frames to a worker thread running a [`RemapTransform`].
struct ThreadedTransform {
    worker: TransformWorker,
}

impl FrameTransform for ThreadedTransform {
    fn name(&self) -> &str {
        self.worker.name()
    }

    fn apply(&mut self, frames: &mut [FrameImage]) -> Result<(), TransformError> {
        self.worker.exchange(frames)
    }
}

pub struct UndistortionBehavior {
    name: String,
    owner: Weak<dyn Lifecycle>,
    rig: SharedRig,
    backend: Arc<dyn NumericBackend>,
    source: ParameterSource,
    config: UndistortionConfig,
    params: Option<CameraParameters>,
    variant: Option<UndistortionVariant>,
    maps: Option<Arc<Vec<UndistortMaps>>>,
    transform: Option<TransformId>,
    monitor: Option<WorkerMonitor>,
}

fn parameters_error(path: &std::path::Path, err: ParametersError) -> ControllerError {
    match err {
        ParametersError::Io(_) | ParametersError::Json(_) => ControllerError::external(
            format!("reading camera parameters from {}", path.display()),
            err,
        ),
        other => ControllerError::invalid_argument(other.to_string()),
    }
}

/// Check `params` against the requested arity and return the variant.
fn select_variant(
    params: &CameraParameters,
    config: &UndistortionConfig,
) -> Result<UndistortionVariant, ControllerError> {
    let variant = UndistortionVariant::new(params.lens, config.arity);
    if params.lens == LensModel::Omnidir && params.omnidir_xi.is_empty() {
        return Err(ControllerError::missing_dependency(
            "omnidirectional undistortion needs `omnidir_xi`",
        ));
    }
    if config.arity == Arity::Stereo && params.stereo.is_none() {
        return Err(ControllerError::missing_dependency(
            "stereo undistortion needs stereo extrinsics",
        ));
    }
    if params.camera_count != config.arity.camera_count() {
        return Err(ControllerError::missing_dependency(format!(
            "{:?} undistortion needs {} camera(s), parameters describe {}",
            config.arity,
            config.arity.camera_count(),
            params.camera_count
        )));
    }
    params
        .validate()
        .map_err(|e| ControllerError::invalid_argument(e.to_string()))?;
    Ok(variant)
}

impl Behavior for UndistortionBehavior {
    fn configure(&mut self) -> Result<(), ControllerError> {
        let params = match &self.source {
            ParameterSource::Inline(params) => params.clone(),
            ParameterSource::File(path) => {
                CameraParameters::read_json(path).map_err(|e| parameters_error(path, e))?
            }
        };
        let variant = select_variant(&params, &self.config)?;
        log::debug!(
            "undistortion `{}`: {:?} {:?}, threaded={}",
            self.name,
            variant.lens,
            variant.arity,
            self.config.threaded
        );
        self.params = Some(params);
        self.variant = Some(variant);
        self.maps = None;
        Ok(())
    }

    fn on_ready(&mut self) -> Result<(), ControllerError> {
        let (Some(params), Some(variant)) = (&self.params, self.variant) else {
            return Err(ControllerError::missing_dependency(
                "undistortion parameters are not loaded",
            ));
        };
        {
            let rig = lock(&self.rig);
            let format = rig
                .format()
                .ok_or_else(|| ControllerError::missing_dependency("camera rig is not configured"))?;
            if rig.channel_count() != params.camera_count {
                return Err(ControllerError::invalid_argument(format!(
                    "camera delivers {} channel(s), parameters describe {} camera(s)",
                    rig.channel_count(),
                    params.camera_count
                )));
            }
            if let Some((i, size)) = params
                .image_sizes
                .iter()
                .enumerate()
                .find(|(_, size)| **size != format.size())
            {
                return Err(ControllerError::invalid_argument(format!(
                    "camera {i}: calibrated for {}x{}, camera delivers {}x{}",
                    size.width, size.height, format.width, format.height
                )));
            }
        }

        let maps = variant
            .build_maps(self.backend.as_ref(), params, &self.config)
            .map_err(|e| ControllerError::external("building undistortion maps", e))?;
        self.maps = Some(Arc::new(maps));
        Ok(())
    }

    fn start(&mut self) -> Result<(), ControllerError> {
        let maps = self
            .maps
            .clone()
            .ok_or_else(|| ControllerError::missing_dependency("undistortion maps are not built"))?;
        let remap = RemapTransform {
            backend: self.backend.clone(),
            maps,
            interpolation: self.config.interpolation,
            scratch: Vec::new(),
        };
        let transform: Box<dyn FrameTransform> = if self.config.threaded {
            let mut worker = TransformWorker::new(self.name.clone(), Box::new(remap));
            worker
                .start()
                .map_err(|e| ControllerError::external("starting undistortion worker", e))?;
            self.monitor = Some(worker.monitor());
            Box::new(ThreadedTransform { worker })
        } else {
            self.monitor = None;
            Box::new(remap)
        };
        self.transform = Some(lock(&self.rig).add_transform(self.owner.clone(), transform));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ControllerError> {
        if let Some(id) = self.transform.take() {
            let removed = lock(&self.rig).remove_transform(id);
            // Joins the worker thread, outside the rig lock.
            drop(removed);
        }
        Ok(())
    }
}

/// Undistortion controller. Dereferences to the underlying [`Controller`].
#[derive(Clone)]
pub struct Undistortion {
    controller: Arc<Controller<UndistortionBehavior>>,
}

impl Undistortion {
    /// Undistortion of `camera`'s frames; depends on `camera`.
    pub fn new(
        name: impl Into<String>,
        camera: &Camera,
        backend: Arc<dyn NumericBackend>,
        source: ParameterSource,
        config: UndistortionConfig,
    ) -> Result<Self, ControllerError> {
        let name = name.into();
        let rig = camera.rig();
        let behavior_name = name.clone();
        let controller = Controller::new_cyclic(name, move |owner| UndistortionBehavior {
            name: behavior_name,
            owner,
            rig,
            backend,
            source,
            config,
            params: None,
            variant: None,
            maps: None,
            transform: None,
            monitor: None,
        });
        controller.add_dependency(camera.handle())?;
        Ok(Self { controller })
    }

    pub fn controller(&self) -> &Arc<Controller<UndistortionBehavior>> {
        &self.controller
    }

    pub fn handle(&self) -> Arc<dyn Lifecycle> {
        self.controller.clone()
    }

    pub fn variant(&self) -> Option<UndistortionVariant> {
        self.controller.with_behavior(|b| b.variant)
    }

    pub fn parameters(&self) -> Option<CameraParameters> {
        self.controller.with_behavior(|b| b.params.clone())
    }

    pub fn maps(&self) -> Option<Arc<Vec<UndistortMaps>>> {
        self.controller.with_behavior(|b| b.maps.clone())
    }

    /// Counters of the current (or last) worker; `None` when running inline.
    pub fn worker_stats(&self) -> Option<WorkerStats> {
        self.controller
            .with_behavior(|b| b.monitor.as_ref().map(WorkerMonitor::stats))
    }

    /// Wait until the worker has output for the next cycle. Returns `false`
    /// on timeout or when running inline.
    pub fn wait_for_output(&self, timeout: Duration) -> bool {
        let monitor = self.controller.with_behavior(|b| b.monitor.clone());
        monitor.is_some_and(|m| m.wait_for_result(timeout))
    }
}

impl Deref for Undistortion {
    type Target = Controller<UndistortionBehavior>;

    fn deref(&self) -> &Self::Target {
        &self.controller
    }
}
