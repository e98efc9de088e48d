//! End-to-end detector lifecycle on a synthetic transform source
//!
//! Samples are 8-d vectors; transform `t` cyclically shifts a sample by
//! `2t`. Normal samples carry an asymmetric peak, so each shift is
//! recognizable. Anomalies are constant vectors, which look identical
//! under every shift, so the classifier can do no better than chance.

use anodet::calibrate::ThresholdPolicy;
use anodet::config::{CalibrationParams, DetectorParams, FitParams};
use anodet::dadgt::{Dadgt, TransformSource};
use anodet::detector::checkpoint::{checkpoint_prefix, latest_checkpoint, FsLister};
use anodet::detector::{AnoDetector, LifecycleStage};
use anodet::model::ModelBackend;
use anodet::{AnoDetError, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::path::Path;
use std::time::{Duration, SystemTime};

const DIM: usize = 8;
const N_TFM: usize = 4;

struct ShiftSource;

impl TransformSource for ShiftSource {
    type Sample = Vec<f32>;

    fn n_transforms(&self) -> usize {
        N_TFM
    }

    fn feature_len(&self) -> usize {
        DIM
    }

    fn features(&self, sample: &Vec<f32>, tfm: usize) -> Result<Vec<f32>> {
        if sample.len() != DIM {
            return Err(AnoDetError::InvalidInput("wrong sample size".into()));
        }
        let mut shifted = sample.clone();
        shifted.rotate_right(2 * tfm);
        Ok(shifted)
    }
}

fn normal_samples(n: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let mut v: Vec<f32> = (0..DIM).map(|_| rng.random_range(0.0..0.1)).collect();
            v[0] += 1.0;
            v[1] += 0.5;
            v
        })
        .collect()
}

fn anomalous_samples(n: usize) -> Vec<Vec<f32>> {
    (0..n).map(|i| vec![0.2 + 0.1 * i as f32; DIM]).collect()
}

fn params(work_folder: &Path) -> DetectorParams {
    DetectorParams {
        work_folder: work_folder.to_path_buf(),
        project: "synthetic".into(),
        seed: 3,
        n_class: N_TFM,
        hidden_size: 16,
        calibration: CalibrationParams::recommended(),
        fit: FitParams {
            epochs: 30,
            batch_size: 16,
            lr: 0.01,
            validation_split: 0.25,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn test_full_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let mut det = Dadgt::new(ShiftSource, params(dir.path())).unwrap();
    let train = normal_samples(24, 1);

    // Out of order
    assert!(matches!(
        det.create_model(None),
        Err(AnoDetError::Lifecycle { .. })
    ));

    assert_eq!(det.prepare_experiment(None, Some("shift".into())).unwrap(), 0);
    det.create_model(None).unwrap();
    assert!(matches!(
        det.train_model(&train),
        Err(AnoDetError::Lifecycle { .. })
    ));
    det.setup_train(&train).unwrap();
    let result = det.train_model(&train).unwrap();
    assert_eq!(det.state().stage(), LifecycleStage::Trained);

    assert_eq!(result.history.len(), 30);
    assert!(result
        .history
        .iter()
        .all(|epoch| result.best_loss <= epoch.val_loss));
    let latest = latest_checkpoint(&FsLister, &det.state().weights, &checkpoint_prefix("shift"))
        .unwrap();
    assert!(latest.starts_with(dir.path().join("synthetic").join("weights")));

    det.setup_runtime(&train).unwrap();

    let normals = normal_samples(10, 99);
    let anomalies = anomalous_samples(5);
    let samples: Vec<Vec<f32>> = normals.iter().chain(&anomalies).cloned().collect();
    let y_trues: Vec<bool> = (0..samples.len()).map(|i| i >= normals.len()).collect();

    let scores = det.predict(&samples, None, true).unwrap();
    assert_eq!(scores.scores.len(), 15);
    let raw = scores.raw.as_ref().unwrap();
    assert!(raw.iter().all(|row| row.len() == N_TFM));
    for s in &scores.scores[10..] {
        assert!((s - 0.75).abs() < 1e-4, "anomaly score {s}");
    }
    let normal_mean = scores.scores[..10].iter().sum::<f64>() / 10.0;
    assert!(normal_mean < 0.65, "normal mean {normal_mean}");

    let eval = det.evaluate_test(&samples, &y_trues, None, false).unwrap();
    assert!(eval.auc > 0.9);
    assert!(eval.partial_auc.is_some());
    assert_eq!(eval.scores, scores.scores);

    det.apply_calibration(&eval.calibration, ThresholdPolicy::MinTpr);
    assert_eq!(det.params().distance_norm_factor, Some(eval.norm_factor));
    let normalized = det.normalize_score(&scores.scores).unwrap();
    assert!((normalized[0] * eval.norm_factor - scores.scores[0]).abs() < 1e-12);

    // Reload saved weights into a fresh runtime detector
    let saved = det.save_model(&dir.path().join("final.ckpt")).unwrap();
    let mut runtime = Dadgt::new(ShiftSource, params(dir.path())).unwrap();
    runtime.prepare_experiment(None, Some("shift".into())).unwrap();
    runtime.create_model(Some(&saved)).unwrap();
    runtime.setup_runtime(&[]).unwrap();
    let reloaded = runtime.predict(&samples, None, false).unwrap();
    assert_eq!(reloaded.scores, scores.scores);
    assert!(reloaded.raw.is_none());
}

#[test]
fn test_same_seed_same_training() {
    let run = |dir: &Path| {
        let mut det = Dadgt::new(ShiftSource, params(dir)).unwrap();
        let train = normal_samples(16, 5);
        det.prepare_experiment(Some(2), None).unwrap();
        det.create_model(None).unwrap();
        det.setup_train(&train).unwrap();
        det.train_model(&train).unwrap().best_weights
    };
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    assert_eq!(run(a.path()), run(b.path()));
}

#[test]
fn test_training_restores_its_own_best_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let mut det = Dadgt::new(ShiftSource, params(dir.path())).unwrap();
    det.prepare_experiment(None, Some("shift".into())).unwrap();

    // A file from another run that looks newer than anything written now
    let stale = det.state().weights.join("weights-shift-99-0.00.ckpt");
    std::fs::write(&stale, "{ nope").unwrap();
    std::fs::File::options()
        .write(true)
        .open(&stale)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(3600))
        .unwrap();

    let train = normal_samples(16, 7);
    det.create_model(None).unwrap();
    det.setup_train(&train).unwrap();
    let result = det.train_model(&train).unwrap();
    assert_eq!(det.model().unwrap().state_dict(), result.best_weights);
}

#[test]
fn test_failed_runtime_setup_blocks_predict_until_retried() {
    let dir = tempfile::tempdir().unwrap();
    let mut det = Dadgt::new(ShiftSource, params(dir.path())).unwrap();
    det.prepare_experiment(None, None).unwrap();
    det.create_model(None).unwrap();

    let bad = vec![vec![0.0; DIM - 1]];
    assert!(det.setup_runtime(&bad).is_err());
    assert_eq!(det.state().stage(), LifecycleStage::RuntimeSetup);
    let samples = normal_samples(2, 4);
    assert!(matches!(
        det.predict(&samples, None, false),
        Err(AnoDetError::Lifecycle {
            actual: "runtime-setup",
            ..
        })
    ));

    det.setup_runtime(&samples).unwrap();
    assert_eq!(det.state().stage(), LifecycleStage::Ready);
    assert_eq!(det.predict(&samples, None, false).unwrap().scores.len(), 2);
}

#[test]
fn test_zero_validation_split_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut p = params(dir.path());
    p.fit.validation_split = 0.0;
    let mut det = Dadgt::new(ShiftSource, p).unwrap();
    det.prepare_experiment(None, None).unwrap();
    det.create_model(None).unwrap();
    let err = det.setup_train(&normal_samples(8, 0)).unwrap_err();
    assert!(matches!(err, AnoDetError::InvalidInput(_)));
}

#[test]
fn test_bad_weights_are_model_load_errors() {
    let dir = tempfile::tempdir().unwrap();
    let mut det = Dadgt::new(ShiftSource, params(dir.path())).unwrap();
    det.prepare_experiment(None, None).unwrap();

    let garbage = dir.path().join("garbage.ckpt");
    std::fs::write(&garbage, "{ nope").unwrap();
    assert!(matches!(
        det.create_model(Some(&garbage)),
        Err(AnoDetError::ModelLoadError { .. })
    ));

    // Weights for a 3-class model do not fit a 4-class detector
    let mut other = params(dir.path());
    other.n_class = 3;
    let wrong_shape = dir.path().join("three.ckpt");
    let mut three = Dadgt::new(ThreeSource, other).unwrap();
    three.prepare_experiment(None, None).unwrap();
    three.create_model(None).unwrap();
    three.save_model(&wrong_shape).unwrap();
    assert!(matches!(
        det.create_model(Some(&wrong_shape)),
        Err(AnoDetError::ModelLoadError { .. })
    ));
}

#[test]
fn test_source_must_match_n_class() {
    let dir = tempfile::tempdir().unwrap();
    let mut p = params(dir.path());
    p.n_class = 40;
    assert!(matches!(
        Dadgt::new(ShiftSource, p),
        Err(AnoDetError::InvalidConfig(_))
    ));
}

struct ThreeSource;

impl TransformSource for ThreeSource {
    type Sample = Vec<f32>;

    fn n_transforms(&self) -> usize {
        3
    }

    fn feature_len(&self) -> usize {
        DIM
    }

    fn features(&self, sample: &Vec<f32>, _tfm: usize) -> Result<Vec<f32>> {
        Ok(sample.clone())
    }
}
