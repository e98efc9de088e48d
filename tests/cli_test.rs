//! CLI integration tests

use anodet::config::{DetectorParams, CONFIG_FILENAME};
use std::path::Path;
use std::process::{Command, Output};

fn anodet(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_anodet"))
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("ANODET_WORK_FOLDER")
        .env_remove("ANODET_SEED")
        .output()
        .expect("failed to run anodet")
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

const SCORES_CSV: &str = "score,label\n\
0.10,0\n0.15,0\n0.20,0\n0.25,0\n0.30,0\n\
0.70,1\n0.75,1\n0.80,1\n0.90,1\n0.28,1\n";

#[test]
fn test_help_lists_commands() {
    let out = anodet(&["--help"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    for cmd in ["init", "calibrate", "checkpoint"] {
        assert!(stdout.contains(cmd), "missing {cmd} in help");
    }
}

#[test]
fn test_init_writes_example_config() {
    let dir = tempfile::tempdir().unwrap();
    let out = anodet(&["init", "--path", path_str(dir.path())]);
    assert!(out.status.success());
    let config = dir.path().join(CONFIG_FILENAME);
    let params = DetectorParams::load(&config).unwrap();
    assert_eq!(params.calibration.sigma_k, Some(2.0));

    // Existing config is kept without --force
    std::fs::write(&config, "project = \"mine\"\n").unwrap();
    assert!(anodet(&["init", "--path", path_str(dir.path())]).status.success());
    assert!(std::fs::read_to_string(&config).unwrap().contains("mine"));
    assert!(anodet(&["init", "--force", "--path", path_str(dir.path())])
        .status
        .success());
    assert!(!std::fs::read_to_string(&config).unwrap().contains("mine"));
}

#[test]
fn test_calibrate_prints_report_and_writes_config() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("scores.csv");
    std::fs::write(&input, SCORES_CSV).unwrap();
    assert!(anodet(&["init", "--path", path_str(dir.path())]).status.success());

    let out = anodet(&[
        "calibrate",
        "--path",
        path_str(dir.path()),
        "--input",
        path_str(&input),
        "--policy",
        "tpr",
        "--write",
    ]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("# Threshold k-sigma [2]"));
    assert!(stdout.contains("# Threshold max FPR [0.1]"));
    assert!(stdout.contains("# Threshold min TPR [1]"));
    assert!(stdout.contains("distance_norm_factor:"));

    let params = DetectorParams::load(&dir.path().join(CONFIG_FILENAME)).unwrap();
    let factor = params.distance_norm_factor.unwrap();
    assert!((factor - 0.443).abs() < 1e-9);
    // min TPR 1.0 is first reached at the 0.28 anomaly
    let threshold = params.distance_threshold.unwrap();
    assert!((threshold - 0.28 / 0.443).abs() < 1e-9);
}

#[test]
fn test_calibrate_json_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("scores.json");
    std::fs::write(
        &input,
        r#"[{"score": 0.1, "label": 0}, {"score": 0.2, "label": false},
            {"score": 0.8, "label": 1}, {"score": 0.9, "label": true}]"#,
    )
    .unwrap();
    let out = anodet(&[
        "calibrate",
        "--path",
        path_str(dir.path()),
        "--input",
        path_str(&input),
        "--format",
        "json",
    ]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let value: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(value["auc"], 1.0);
    assert_eq!(value["normalized_thresholds"].as_array().unwrap().len(), 3);
}

#[test]
fn test_calibrate_single_class_fails() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("scores.csv");
    std::fs::write(&input, "0.1,0\n0.2,0\n").unwrap();
    let out = anodet(&[
        "calibrate",
        "--path",
        path_str(dir.path()),
        "--input",
        path_str(&input),
    ]);
    assert!(!out.status.success());
}

#[test]
fn test_checkpoint_command() {
    let dir = tempfile::tempdir().unwrap();
    let out = anodet(&["checkpoint", "--dir", path_str(dir.path()), "--target", "cat"]);
    assert!(!out.status.success());

    std::fs::write(dir.path().join("weights-cat-3-0.12.ckpt"), "{}").unwrap();
    let out = anodet(&["checkpoint", "--dir", path_str(dir.path()), "--target", "cat"]);
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("weights-cat-3-0.12.ckpt"));
}

#[test]
fn test_calibrate_write_keeps_env_overrides_out_of_config() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("scores.csv");
    std::fs::write(&input, SCORES_CSV).unwrap();
    let config = dir.path().join(CONFIG_FILENAME);
    std::fs::write(&config, "project = \"mine\"\n\n[calibration]\nsigma_k = 2.0\nmax_fpr = 0.1\nmin_tpr = 1.0\n").unwrap();

    let out = Command::new(env!("CARGO_BIN_EXE_anodet"))
        .args(["calibrate", "--path", path_str(dir.path()), "--input", path_str(&input), "--write"])
        .env_remove("RUST_LOG")
        .env("ANODET_WORK_FOLDER", "/tmp/elsewhere")
        .output()
        .expect("failed to run anodet");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let content = std::fs::read_to_string(&config).unwrap();
    assert!(!content.contains("work_folder"));
    assert!(content.contains("mine"));
    assert!(content.contains("distance_threshold"));
}

#[test]
fn test_calibrate_rejects_unknown_policy() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("scores.csv");
    std::fs::write(&input, SCORES_CSV).unwrap();
    let out = anodet(&[
        "calibrate",
        "--path",
        path_str(dir.path()),
        "--input",
        path_str(&input),
        "--policy",
        "median",
    ]);
    assert!(!out.status.success());
}
