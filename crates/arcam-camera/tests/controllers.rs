use std::sync::Arc;
use std::time::Duration;

use arcam_camera::{
    Camera, CycleOutcome, Display, MemorySink, ParameterSource, ScriptedSource, Undistortion,
    UndistortionConfig,
};
use arcam_core::{
    CameraIntrinsics, CameraParameters, FrameFormat, FrameImage, FrameImageView, ImageSize,
    Interpolation, MapRequest, NumericBackend, NumericError, Orientation, PixelFormat,
    RectificationKind, ReferenceBackend, StereoExtrinsics, StereoRectification, UndistortMaps,
};
use arcam_lifecycle::{ControllerError, Lifecycle, Phase};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn format() -> FrameFormat {
    FrameFormat::new(16, 12, PixelFormat::Gray8)
}

fn mono_params() -> CameraParameters {
    CameraParameters::ideal_pinhole(1, ImageSize::new(16, 12), 20.0)
}

struct Chain {
    camera: Camera,
    undistortion: Undistortion,
    display: Display,
    sink: MemorySink,
}

fn chain(source: ScriptedSource, backend: Arc<dyn NumericBackend>, threaded: bool) -> Chain {
    init_logging();
    let camera = Camera::new("camera", Box::new(source), Orientation::TOP_LEFT);
    camera.set_auto_start(true);
    let undistortion = Undistortion::new(
        "undistortion",
        &camera,
        backend,
        ParameterSource::Inline(mono_params()),
        UndistortionConfig {
            threaded,
            ..Default::default()
        },
    )
    .unwrap();
    undistortion.set_auto_start(true);
    let sink = MemorySink::new();
    let display = Display::new("display", &camera, Box::new(sink.clone())).unwrap();
    display.add_dependency(undistortion.handle()).unwrap();
    display.set_auto_start(true);
    Chain {
        camera,
        undistortion,
        display,
        sink,
    }
}

/// Backend whose remap always fails.
struct BrokenRemap;

impl NumericBackend for BrokenRemap {
    fn init_undistort_rectify_map(
        &self,
        request: &MapRequest<'_>,
    ) -> Result<UndistortMaps, NumericError> {
        Ok(UndistortMaps::identity(request.size))
    }

    fn omnidir_init_undistort_rectify_map(
        &self,
        request: &MapRequest<'_>,
        _xi: f64,
        _kind: RectificationKind,
    ) -> Result<UndistortMaps, NumericError> {
        Ok(UndistortMaps::identity(request.size))
    }

    fn stereo_rectify(
        &self,
        _first: &CameraIntrinsics<'_>,
        _second: &CameraIntrinsics<'_>,
        _size: ImageSize,
        _extrinsics: &StereoExtrinsics,
    ) -> Result<StereoRectification, NumericError> {
        Err(NumericError::Unsupported("stereo"))
    }

    fn remap(
        &self,
        _src: &FrameImageView<'_>,
        _maps: &UndistortMaps,
        _interpolation: Interpolation,
        _dst: &mut FrameImage,
    ) -> Result<(), NumericError> {
        Err(NumericError::invalid("remap exploded"))
    }
}

#[test]
fn starting_the_camera_cascades_through_the_chain() {
    let c = chain(
        ScriptedSource::new(1, format()).then_fill(1),
        Arc::new(ReferenceBackend::new()),
        false,
    );
    c.display.configure().unwrap();
    c.undistortion.configure().unwrap();
    assert_eq!(c.display.phase(), Phase::Configured);
    assert_eq!(c.undistortion.phase(), Phase::Configured);

    // Auto-start on the camera: configure alone starts the whole chain.
    c.camera.configure().unwrap();
    assert!(c.camera.is_started());
    assert!(c.undistortion.is_started());
    assert!(c.display.is_started());
    assert!(c.undistortion.maps().is_some());

    assert_eq!(
        c.camera.update().unwrap(),
        CycleOutcome::Committed { frame: 1 }
    );
    assert!(c.display.refresh().unwrap());
    assert_eq!(c.sink.presented(), vec![1]);
}

#[test]
fn stopping_the_camera_stops_dependents_before_returning() {
    let c = chain(
        ScriptedSource::new(1, format()),
        Arc::new(ReferenceBackend::new()),
        true,
    );
    c.display.configure().unwrap();
    c.undistortion.configure().unwrap();
    c.camera.configure().unwrap();
    assert!(c.display.is_started());

    c.camera.stop().unwrap();
    assert!(!c.undistortion.is_started());
    assert!(!c.display.is_started());
    assert_eq!(c.display.phase(), Phase::Configured);

    // Restarting the camera brings the chain back.
    c.camera.start().unwrap();
    assert!(c.undistortion.is_started());
    assert!(c.display.is_started());
}

#[test]
fn inline_transform_failure_stops_its_owner() {
    let c = chain(
        ScriptedSource::new(1, format()).then_fill(3).then_fill(4),
        Arc::new(BrokenRemap),
        false,
    );
    c.display.configure().unwrap();
    c.undistortion.configure().unwrap();
    c.camera.configure().unwrap();

    let err = c.camera.update().unwrap_err();
    match err {
        ControllerError::TransformFailure { controller, .. } => {
            assert_eq!(controller, "undistortion")
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!c.undistortion.is_started());
    assert!(!c.display.is_started());
    assert!(c.camera.is_started());

    // The camera keeps running without the transform.
    assert_eq!(
        c.camera.update().unwrap(),
        CycleOutcome::Committed { frame: 2 }
    );
    let rig = c.camera.rig();
    assert!(rig.lock().unwrap().current()[0].data.iter().all(|&b| b == 4));
}

#[test]
fn worker_failure_surfaces_on_the_next_cycle() {
    let c = chain(
        ScriptedSource::new(1, format()).then_fill(3).then_fill(4),
        Arc::new(BrokenRemap),
        true,
    );
    c.display.configure().unwrap();
    c.undistortion.configure().unwrap();
    c.camera.configure().unwrap();

    c.camera.update().unwrap();
    assert!(c.undistortion.wait_for_output(Duration::from_secs(5)));
    let err = c.camera.update().unwrap_err();
    assert!(matches!(err, ControllerError::TransformFailure { .. }));
    assert!(!c.undistortion.is_started());
    assert!(!c.display.is_started());
}

#[test]
fn display_shows_last_captured_frame_when_capture_is_intermittent() {
    init_logging();
    let mut source = ScriptedSource::new(2, format());
    for value in 1..=5u8 {
        source = source.then_fill(value * 10).then_empty();
    }
    let camera = Camera::new("camera", Box::new(source), Orientation::TOP_LEFT);
    let sink = MemorySink::new();
    let display = Display::new("display", &camera, Box::new(sink.clone())).unwrap();
    display.set_auto_start(true);
    display.configure().unwrap();
    camera.configure().unwrap();
    camera.start().unwrap();

    let mut last = 0;
    for cycle in 0..10 {
        let outcome = camera.update().unwrap();
        if cycle % 2 == 0 {
            last = (cycle / 2 + 1) as u8 * 10;
            assert!(matches!(outcome, CycleOutcome::Committed { .. }));
        } else {
            assert_eq!(outcome, CycleOutcome::NoFrame);
        }
        display.refresh().unwrap();
        for image in sink.latest() {
            assert!(image.data.iter().all(|&b| b == last), "cycle {cycle}");
        }
    }
    assert_eq!(sink.presented(), vec![1, 2, 3, 4, 5]);
}

#[test]
fn camera_count_mismatch_blocks_readiness() {
    init_logging();
    let camera = Camera::new(
        "camera",
        Box::new(ScriptedSource::new(2, format())),
        Orientation::TOP_LEFT,
    );
    let undistortion = Undistortion::new(
        "undistortion",
        &camera,
        Arc::new(ReferenceBackend::new()),
        ParameterSource::Inline(mono_params()),
        UndistortionConfig::default(),
    )
    .unwrap();
    undistortion.set_auto_start(true);
    undistortion.configure().unwrap();
    camera.configure().unwrap();
    camera.start().unwrap();

    assert_eq!(undistortion.phase(), Phase::Configured);
    assert!(undistortion
        .last_error()
        .is_some_and(|e| e.contains("2 channel")));
}

#[test]
fn wrong_distortion_coefficient_count_fails_configure() {
    init_logging();
    let camera = Camera::new(
        "camera",
        Box::new(ScriptedSource::new(1, format())),
        Orientation::TOP_LEFT,
    );
    let mut params = mono_params();
    params.distortion = vec![vec![0.0; 3]];
    let undistortion = Undistortion::new(
        "undistortion",
        &camera,
        Arc::new(ReferenceBackend::new()),
        ParameterSource::Inline(params),
        UndistortionConfig {
            threaded: false,
            ..Default::default()
        },
    )
    .unwrap();
    undistortion.set_auto_start(true);

    match undistortion.configure() {
        Err(ControllerError::InvalidArgument(reason)) => {
            assert!(reason.contains("got 3"), "{reason}")
        }
        other => panic!("unexpected result {other:?}"),
    }
    camera.configure().unwrap();
    camera.start().unwrap();
    assert_eq!(undistortion.phase(), Phase::Stopped);
}
