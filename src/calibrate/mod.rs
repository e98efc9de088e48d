//! Score-to-threshold calibration
//!
//! Turns raw detector scores and ground-truth labels into a normalization
//! factor and three normalized decision thresholds, one per policy:
//! k-sigma coverage, FPR budget and TPR target.

mod calibrator;
mod stats;
pub mod thresholds;

pub use calibrator::{calibrate, calibrate_and_report, Calibration, CalibrationReport};
pub use stats::ScoreStats;
pub use thresholds::{
    threshold_by_max_fpr, threshold_by_min_tpr, threshold_by_sigma_coverage, ThresholdPolicy,
};
