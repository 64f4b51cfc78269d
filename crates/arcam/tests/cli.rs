use assert_cmd::Command;
use predicates::prelude::*;

use arcam::core::{CameraParameters, LensModel};
use arcam::{PipelineConfig, RunSummary};

fn arcam() -> Command {
    Command::cargo_bin("arcam").unwrap()
}

#[test]
fn init_params_writes_stereo_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("params.json");
    arcam()
        .args(["init-params", "--cameras", "2", "--width", "32", "--height", "24"])
        .arg("--out")
        .arg(&out)
        .assert()
        .success();

    let params = CameraParameters::load_json(&out).unwrap();
    assert_eq!(params.camera_count, 2);
    assert_eq!(params.lens, LensModel::Pinhole);
    assert!(params.stereo.is_some());
}

#[test]
fn init_then_run_prints_a_summary() {
    let dir = tempfile::tempdir().unwrap();
    let params = dir.path().join("params.json");
    let config = dir.path().join("pipeline.json");

    arcam()
        .args(["init-params", "--lens", "omnidir", "--width", "32", "--height", "24"])
        .arg("--out")
        .arg(&params)
        .assert()
        .success();
    arcam()
        .arg("init-config")
        .arg("--out")
        .arg(&config)
        .arg("--params")
        .arg(&params)
        .assert()
        .success();

    // Shrink the camera to match the parameters.
    let mut pipeline = PipelineConfig::load_json(&config).unwrap();
    pipeline.camera.width = 32;
    pipeline.camera.height = 24;
    pipeline.write_json(&config).unwrap();

    let output = arcam()
        .arg("run")
        .arg("--config")
        .arg(&config)
        .args(["--cycles", "6"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let summary: RunSummary = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary.cycles, 6);
    assert_eq!(summary.committed, 6);
    assert_eq!(summary.presented, 6);
}

#[test]
fn run_with_missing_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    arcam()
        .arg("run")
        .arg("--config")
        .arg(dir.path().join("nope.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}
