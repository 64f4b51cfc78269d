use std::path::Path;

use arcam::camera::{Arity, ParameterSource, PatternSource, UndistortionConfig};
use arcam::core::{CameraParameters, ImageSize, Orientation, PixelFormat};
use arcam::{
    ControllerError, Lifecycle, Pipeline, PipelineConfig, PipelineError, SinkConfig,
    UndistortionSection,
};

fn small_config() -> PipelineConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut config = PipelineConfig::default();
    config.camera.width = 32;
    config.camera.height = 24;
    config
}

fn with_params(config: &mut PipelineConfig, path: &Path, settings: UndistortionConfig) {
    config.undistortion = Some(UndistortionSection {
        name: "undistortion".to_string(),
        parameters: ParameterSource::File(path.to_path_buf()),
        settings,
    });
}

#[test]
fn intermittent_source_commits_every_other_cycle() {
    let mut config = small_config();
    config.camera.interval = 2;
    let mut pipeline = Pipeline::new(&config).unwrap();
    pipeline.start().unwrap();
    let summary = pipeline.run(10).unwrap();
    assert_eq!(summary.committed, 5);
    assert_eq!(summary.presented, 5);
    assert_eq!(summary.dropped, 0);
}

#[test]
fn source_orientation_is_normalized_before_display() {
    let mut config = small_config();
    config.camera.width = 4;
    config.camera.height = 2;
    config.camera.pixel_format = PixelFormat::Gray8;
    config.camera.orientation = Orientation::BOTTOM_LEFT;
    let mut pipeline = Pipeline::new(&config).unwrap();
    pipeline.start().unwrap();
    pipeline.run(1).unwrap();

    let latest = pipeline.memory_sink().unwrap().latest();
    let top_row: Vec<u8> = (0..4)
        .map(|x| PatternSource::value_at(0, 0, x, 1, 0))
        .collect();
    assert_eq!(&latest[0].data[..4], top_row.as_slice());
}

#[test]
fn inline_undistortion_runs_every_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let params_path = dir.path().join("params.json");
    CameraParameters::ideal_pinhole(1, ImageSize::new(32, 24), 40.0)
        .write_json(&params_path)
        .unwrap();

    let mut config = small_config();
    with_params(
        &mut config,
        &params_path,
        UndistortionConfig {
            threaded: false,
            ..Default::default()
        },
    );
    let mut pipeline = Pipeline::new(&config).unwrap();
    pipeline.start().unwrap();
    assert!(pipeline.undistortion().unwrap().is_started());
    assert!(pipeline.display().is_started());

    let summary = pipeline.run(4).unwrap();
    assert_eq!(summary.presented, 4);
    pipeline.shutdown().unwrap();
    assert!(!pipeline.display().is_started());
}

#[test]
fn threaded_stereo_undistortion_keeps_presenting() {
    let dir = tempfile::tempdir().unwrap();
    let params_path = dir.path().join("stereo.json");
    let mut params = CameraParameters::ideal_pinhole(2, ImageSize::new(32, 24), 40.0);
    params.stereo = Some(arcam::core::StereoExtrinsics {
        rotation: [0.0, 0.0, 0.0],
        translation: [-0.1, 0.0, 0.0],
    });
    params.write_json(&params_path).unwrap();

    let mut config = small_config();
    config.camera.channels = 2;
    with_params(
        &mut config,
        &params_path,
        UndistortionConfig {
            arity: Arity::Stereo,
            ..Default::default()
        },
    );
    let mut pipeline = Pipeline::new(&config).unwrap();
    pipeline.start().unwrap();
    let summary = pipeline.run(8).unwrap();
    assert_eq!(summary.committed, 8);
    assert_eq!(summary.presented, 8);
    let stats = pipeline.undistortion().unwrap().worker_stats().unwrap();
    assert_eq!(stats.submitted, 8);
}

#[test]
fn size_mismatch_leaves_undistortion_unstarted() {
    let dir = tempfile::tempdir().unwrap();
    let params_path = dir.path().join("params.json");
    CameraParameters::ideal_pinhole(1, ImageSize::new(64, 48), 40.0)
        .write_json(&params_path)
        .unwrap();

    let mut config = small_config();
    with_params(&mut config, &params_path, UndistortionConfig::default());
    let pipeline = Pipeline::new(&config).unwrap();
    match pipeline.start() {
        Err(PipelineError::NotStarted { controller, reason }) => {
            assert_eq!(controller, "undistortion");
            assert!(reason.contains("calibrated for 64x48"), "{reason}");
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert!(pipeline.camera().is_started());
    assert!(!pipeline.display().is_started());
}

#[test]
fn missing_parameter_file_fails_configure() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = small_config();
    with_params(
        &mut config,
        &dir.path().join("missing.json"),
        UndistortionConfig::default(),
    );
    let pipeline = Pipeline::new(&config).unwrap();
    assert!(matches!(
        pipeline.start(),
        Err(PipelineError::Controller(ControllerError::External { .. }))
    ));
}

#[test]
fn zero_channel_config_is_rejected() {
    let mut config = small_config();
    config.camera.channels = 0;
    assert!(matches!(
        Pipeline::new(&config),
        Err(PipelineError::InvalidConfig(_))
    ));
}

#[cfg(feature = "image")]
#[test]
fn png_sink_writes_presented_frames() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("frames");
    let mut config = small_config();
    config.sink = SinkConfig::Png {
        dir: out.clone(),
        every: 2,
    };
    let mut pipeline = Pipeline::new(&config).unwrap();
    pipeline.start().unwrap();
    pipeline.run(4).unwrap();
    assert!(out.join("frame000002_ch0.png").exists());
    assert!(out.join("frame000004_ch0.png").exists());
    assert!(!out.join("frame000001_ch0.png").exists());
}
