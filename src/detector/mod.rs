//! Anomaly detector lifecycle
//!
//! Training:
//! 1. `prepare_experiment` picks an experiment number and test target
//! 2. `create_model` builds the model, optionally loading weights
//! 3. `setup_train` prepares training data
//! 4. `train_model` runs the fit loop
//! 5. `save_model` writes the weights
//!
//! Calibration: `evaluate_test` on labelled samples, then
//! `apply_calibration` to store `distance_norm_factor` and
//! `distance_threshold` in the params.
//!
//! Runtime: `create_model(Some(weights))`, `setup_runtime`, `predict`,
//! then `normalize_score`.

pub mod checkpoint;

use crate::calibrate::{calibrate_and_report, Calibration, ThresholdPolicy};
use crate::config::DetectorParams;
use crate::error::{AnoDetError, Result};
use crate::train::TrainingResult;
use std::fmt;
use std::path::{Path, PathBuf};

/// Where a detector is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStage {
    Fresh,
    ExperimentPrepared,
    ModelCreated,
    TrainSetup,
    Trained,
    /// `setup_runtime` started but has not completed
    RuntimeSetup,
    Ready,
}

impl LifecycleStage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::ExperimentPrepared => "experiment-prepared",
            Self::ModelCreated => "model-created",
            Self::TrainSetup => "train-setup",
            Self::Trained => "trained",
            Self::RuntimeSetup => "runtime-setup",
            Self::Ready => "ready",
        }
    }
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Experiment bookkeeping shared by every detector
#[derive(Debug, Clone)]
pub struct DetectorState {
    pub experiment_no: Option<u32>,
    pub test_target: Option<String>,
    /// `params.work_folder / params.project`
    pub work_folder: PathBuf,
    /// `work_folder / weights`
    pub weights: PathBuf,
    stage: LifecycleStage,
}

impl DetectorState {
    /// Derive folders from params and create them.
    pub fn new(params: &DetectorParams) -> Result<Self> {
        let work_folder = params.work_folder.join(&params.project);
        let weights = work_folder.join("weights");
        let state = Self {
            experiment_no: None,
            test_target: None,
            work_folder,
            weights,
            stage: LifecycleStage::Fresh,
        };
        state.reset_work(false)?;
        Ok(state)
    }

    /// Recreate the work and weights folders, wiping them first if asked.
    pub fn reset_work(&self, delete_all: bool) -> Result<()> {
        if delete_all && self.work_folder.exists() {
            tracing::info!("Deleting work folder {}", self.work_folder.display());
            std::fs::remove_dir_all(&self.work_folder)?;
        }
        std::fs::create_dir_all(&self.work_folder)?;
        std::fs::create_dir_all(&self.weights)?;
        Ok(())
    }

    pub fn stage(&self) -> LifecycleStage {
        self.stage
    }

    pub fn set_stage(&mut self, stage: LifecycleStage) {
        tracing::debug!("Detector stage {} -> {}", self.stage, stage);
        self.stage = stage;
    }

    /// Fail with [`AnoDetError::Lifecycle`] unless the stage is one of `allowed`.
    pub fn require(&self, allowed: &[LifecycleStage], expected: &'static str) -> Result<()> {
        if allowed.contains(&self.stage) {
            Ok(())
        } else {
            Err(AnoDetError::Lifecycle {
                expected,
                actual: self.stage.name(),
            })
        }
    }

    /// Test target or a placeholder, for file naming
    pub fn target_name(&self) -> &str {
        self.test_target.as_deref().unwrap_or("all")
    }
}

/// Output of [`AnoDetector::predict`]
#[derive(Debug, Clone, PartialEq)]
pub struct Scores {
    /// One un-normalized score per sample; smaller is more normal
    pub scores: Vec<f64>,
    /// Per-sample raw score rows, when requested
    pub raw: Option<Vec<Vec<f64>>>,
}

/// Output of [`AnoDetector::evaluate_test`]
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub auc: f64,
    pub partial_auc: Option<f64>,
    /// `[k-sigma, max FPR, min TPR]`
    pub normalized_thresholds: [f64; 3],
    pub norm_factor: f64,
    pub scores: Vec<f64>,
    pub raw_scores: Option<Vec<Vec<f64>>>,
    pub calibration: Calibration,
}

/// An anomaly detector with a train / calibrate / run lifecycle
pub trait AnoDetector {
    type Sample;

    fn state(&self) -> &DetectorState;

    fn state_mut(&mut self) -> &mut DetectorState;

    fn params(&self) -> &DetectorParams;

    fn params_mut(&mut self) -> &mut DetectorParams;

    /// Build the model, loading `weights` when given.
    fn create_model(&mut self, weights: Option<&Path>) -> Result<()>;

    fn setup_train(&mut self, samples: &[Self::Sample]) -> Result<()>;

    fn train_model(&mut self, samples: &[Self::Sample]) -> Result<TrainingResult>;

    /// Prepare for scoring, e.g. caching reference samples.
    fn setup_runtime(&mut self, ref_samples: &[Self::Sample]) -> Result<()>;

    fn save_model(&self, path: &Path) -> Result<PathBuf>;

    /// Un-normalized scores; smaller means closer to normal.
    fn predict(
        &self,
        samples: &[Self::Sample],
        labels: Option<&[String]>,
        return_raw: bool,
    ) -> Result<Scores>;

    /// Start a fresh experiment. Without an explicit number the first
    /// experiment is 0 and each later one increments.
    fn prepare_experiment(
        &mut self,
        experiment_no: Option<u32>,
        test_target: Option<String>,
    ) -> Result<u32> {
        let state = self.state_mut();
        let no = match experiment_no {
            Some(no) => no,
            None => state.experiment_no.map_or(0, |n| n.saturating_add(1)),
        };
        state.experiment_no = Some(no);
        state.test_target = test_target;
        state.reset_work(false)?;
        state.set_stage(LifecycleStage::ExperimentPrepared);
        tracing::info!("Experiment {} prepared (target: {})", no, state.target_name());
        Ok(no)
    }

    /// Seed for the current experiment: `params.seed + experiment_no`
    fn experiment_seed(&self) -> u64 {
        let no = self.state().experiment_no.unwrap_or(0);
        self.params().seed.wrapping_add(u64::from(no))
    }

    /// Divide scores by the calibrated norm factor.
    fn normalize_score(&self, scores: &[f64]) -> Result<Vec<f64>> {
        let factor = self
            .params()
            .distance_norm_factor
            .ok_or(AnoDetError::MissingConfiguration("distance_norm_factor"))?;
        Ok(scores.iter().map(|s| s / factor).collect())
    }

    /// Score labelled test samples and calibrate thresholds from them.
    fn evaluate_test(
        &self,
        samples: &[Self::Sample],
        y_trues: &[bool],
        labels: Option<&[String]>,
        show_thresh: bool,
    ) -> Result<Evaluation> {
        let Scores { scores, raw } = self.predict(samples, labels, true)?;
        let calibration =
            calibrate_and_report(&scores, y_trues, &self.params().calibration, show_thresh)?;
        Ok(Evaluation {
            auc: calibration.auc,
            partial_auc: calibration.partial_auc,
            normalized_thresholds: calibration.normalized_thresholds,
            norm_factor: calibration.norm_factor,
            scores,
            raw_scores: raw,
            calibration,
        })
    }

    /// Store the norm factor and the threshold chosen by `policy` in params.
    fn apply_calibration(&mut self, calibration: &Calibration, policy: ThresholdPolicy) {
        self.params_mut().apply_calibration(calibration, policy);
        tracing::info!(
            "Applied {} threshold {:.6} (norm factor {:.6})",
            policy,
            calibration.normalized_threshold(policy),
            calibration.norm_factor
        );
    }
}
