//! Detector parameters
//!
//! Supports loading parameters from:
//! - `anodet.toml` in the project directory
//! - Environment variables (`ANODET_WORK_FOLDER`, `ANODET_SEED`)
//!
//! Every range check happens in [`DetectorParams::validate`], which the
//! loaders call before handing the struct out.

use crate::calibrate::{Calibration, ThresholdPolicy};
use crate::error::{AnoDetError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = "anodet.toml";

/// Threshold-policy parameters consumed by calibration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CalibrationParams {
    /// FPR budget for the max-FPR policy and the partial AUC, in (0, 1]
    pub max_fpr: Option<f64>,
    /// TPR target for the min-TPR policy, in (0, 1]
    pub min_tpr: Option<f64>,
    /// Sigma multiplier for the coverage policy, > 0
    pub sigma_k: Option<f64>,
}

impl CalibrationParams {
    /// Typical settings: 2 sigma, 10% FPR, full recall
    pub fn recommended() -> Self {
        Self {
            max_fpr: Some(0.1),
            min_tpr: Some(1.0),
            sigma_k: Some(2.0),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(v) = self.max_fpr {
            check_unit_interval("max_fpr", v)?;
        }
        if let Some(v) = self.min_tpr {
            check_unit_interval("min_tpr", v)?;
        }
        if let Some(k) = self.sigma_k {
            if !(k > 0.0 && k.is_finite()) {
                return Err(AnoDetError::InvalidConfig(format!(
                    "sigma_k must be positive, got {k}"
                )));
            }
        }
        Ok(())
    }
}

/// Fit-loop parameters
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FitParams {
    pub epochs: usize,
    pub batch_size: usize,
    /// Peak learning rate
    pub lr: f64,
    pub b1: f64,
    pub b2: f64,
    pub weight_decay: f64,
    /// Share of training samples held out for validation, in [0, 1)
    pub validation_split: f64,
    /// Flooding level `b`; 0 disables flooding
    pub flooding_b: f64,
    pub show_progress: bool,
}

impl Default for FitParams {
    fn default() -> Self {
        Self {
            epochs: 20,
            batch_size: 32,
            lr: 1e-3,
            b1: 0.95,
            b2: 0.999,
            weight_decay: 1e-2,
            validation_split: 0.2,
            flooding_b: 0.0,
            show_progress: false,
        }
    }
}

impl FitParams {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(AnoDetError::InvalidConfig("fit.epochs must be > 0".into()));
        }
        if self.batch_size == 0 {
            return Err(AnoDetError::InvalidConfig(
                "fit.batch_size must be > 0".into(),
            ));
        }
        if !(self.lr > 0.0 && self.lr.is_finite()) {
            return Err(AnoDetError::InvalidConfig(format!(
                "fit.lr must be positive, got {}",
                self.lr
            )));
        }
        for (name, beta) in [("fit.b1", self.b1), ("fit.b2", self.b2)] {
            if !(0.0..1.0).contains(&beta) {
                return Err(AnoDetError::InvalidConfig(format!(
                    "{name} must be in [0, 1), got {beta}"
                )));
            }
        }
        if self.weight_decay < 0.0 {
            return Err(AnoDetError::InvalidConfig(
                "fit.weight_decay must be >= 0".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(AnoDetError::InvalidConfig(format!(
                "fit.validation_split must be in [0, 1), got {}",
                self.validation_split
            )));
        }
        if !(self.flooding_b >= 0.0 && self.flooding_b.is_finite()) {
            return Err(AnoDetError::InvalidConfig(format!(
                "fit.flooding_b must be >= 0, got {}",
                self.flooding_b
            )));
        }
        Ok(())
    }
}

/// Full detector configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DetectorParams {
    /// Root for experiment output; `project` is appended
    #[serde(default = "default_work_folder")]
    pub work_folder: PathBuf,
    #[serde(default = "default_project")]
    pub project: String,
    /// Base seed; the experiment number is added per experiment
    #[serde(default)]
    pub seed: u64,
    /// Number of transform classes the model predicts
    #[serde(default = "default_n_class")]
    pub n_class: usize,
    /// Hidden width of the transform classifier
    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,
    /// Calibrated divisor for `normalize_score`
    #[serde(default)]
    pub distance_norm_factor: Option<f64>,
    /// Calibrated normalized decision threshold
    #[serde(default)]
    pub distance_threshold: Option<f64>,
    #[serde(default)]
    pub calibration: CalibrationParams,
    #[serde(default)]
    pub fit: FitParams,
}

fn default_work_folder() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("anodet")
}

fn default_project() -> String {
    "default".to_string()
}

fn default_n_class() -> usize {
    40
}

fn default_hidden_size() -> usize {
    32
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            work_folder: default_work_folder(),
            project: default_project(),
            seed: 0,
            n_class: default_n_class(),
            hidden_size: default_hidden_size(),
            calibration: CalibrationParams::default(),
            distance_norm_factor: None,
            distance_threshold: None,
            fit: FitParams::default(),
        }
    }
}

impl DetectorParams {
    /// Check every range constraint.
    pub fn validate(&self) -> Result<()> {
        if self.project.trim().is_empty() {
            return Err(AnoDetError::InvalidConfig("project must not be empty".into()));
        }
        if self.n_class == 0 {
            return Err(AnoDetError::InvalidConfig("n_class must be > 0".into()));
        }
        if self.hidden_size == 0 {
            return Err(AnoDetError::InvalidConfig("hidden_size must be > 0".into()));
        }
        if let Some(f) = self.distance_norm_factor {
            if !(f > 0.0 && f.is_finite()) {
                return Err(AnoDetError::InvalidConfig(format!(
                    "distance_norm_factor must be positive, got {f}"
                )));
            }
        }
        self.calibration.validate()?;
        self.fit.validate()
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let params: Self = toml::from_str(content)?;
        params.validate()?;
        Ok(params)
    }

    /// Load from a file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut params: Self = toml::from_str(&content)?;
        params.apply_env();
        params.validate()?;
        tracing::debug!("Loaded detector params from {}", path.display());
        Ok(params)
    }

    /// Load `anodet.toml` from a project directory, or defaults when absent.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILENAME);
        if path.exists() {
            return Self::load(&path);
        }
        let mut params = Self::default();
        params.apply_env();
        params.validate()?;
        Ok(params)
    }

    /// Environment variables override file values
    fn apply_env(&mut self) {
        if let Ok(folder) = std::env::var("ANODET_WORK_FOLDER") {
            self.work_folder = PathBuf::from(folder);
        }
        if let Some(seed) = std::env::var("ANODET_SEED")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            self.seed = seed;
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Write `distance_norm_factor` and `distance_threshold` into the file
    /// at `path`, keeping every other key as the file has it. Environment
    /// overrides and defaults filled in by [`load`](Self::load) are not
    /// written. A missing file gets the calibration section as well.
    pub fn store_calibration(&self, path: &Path) -> Result<()> {
        let mut doc: toml::Table = if path.exists() {
            toml::from_str(&std::fs::read_to_string(path)?)?
        } else {
            toml::Table::new()
        };
        for (key, value) in [
            ("distance_norm_factor", self.distance_norm_factor),
            ("distance_threshold", self.distance_threshold),
        ] {
            match value {
                Some(v) => {
                    doc.insert(key.to_string(), toml::Value::Float(v));
                }
                None => {
                    doc.remove(key);
                }
            }
        }
        if !doc.contains_key("calibration") {
            doc.insert(
                "calibration".to_string(),
                toml::Value::try_from(&self.calibration)?,
            );
        }
        std::fs::write(path, toml::to_string_pretty(&doc)?)?;
        tracing::debug!("Stored calibration in {}", path.display());
        Ok(())
    }

    /// Store a calibration result: the norm factor and the normalized
    /// threshold chosen by `policy`.
    pub fn apply_calibration(&mut self, calibration: &Calibration, policy: ThresholdPolicy) {
        self.distance_norm_factor = Some(calibration.norm_factor);
        self.distance_threshold = Some(calibration.normalized_threshold(policy));
    }

    /// Example configuration written by `anodet init`
    pub fn example_toml() -> &'static str {
        r#"# anodet configuration

project = "default"
# work_folder = "/path/to/experiments"
seed = 0
# Number of geometric transforms the classifier predicts (40, 20 or 4)
n_class = 40
hidden_size = 32

# Written by `anodet calibrate --write`
# distance_norm_factor = 1.0
# distance_threshold = 1.0

[calibration]
# Threshold policies: k-sigma coverage, FPR budget, TPR target
sigma_k = 2.0
max_fpr = 0.1
min_tpr = 1.0

[fit]
epochs = 20
batch_size = 32
lr = 0.001
validation_split = 0.2
# Loss flooding level, 0 disables
flooding_b = 0.0
show_progress = false
"#
    }
}

fn check_unit_interval(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(AnoDetError::InvalidConfig(format!(
            "{name} must be in (0, 1], got {value}"
        )))
    }
}
