//! Score calibration: ROC statistics to normalized decision thresholds

use super::stats::ScoreStats;
use super::thresholds::{
    threshold_by_max_fpr, threshold_by_min_tpr, threshold_by_sigma_coverage, ThresholdPolicy,
};
use crate::config::CalibrationParams;
use crate::error::{AnoDetError, Result};
use crate::roc::RocCurve;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of one calibration run. Replaced, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// `[sigma, max-FPR, min-TPR]`, divided by `norm_factor`
    #[serde(with = "threshold_triple")]
    pub normalized_thresholds: [f64; 3],
    /// Same thresholds before normalization
    #[serde(with = "threshold_triple")]
    pub raw_thresholds: [f64; 3],
    /// `max(mean_score, EPSILON)`
    pub norm_factor: f64,
    pub auc: f64,
    /// Standardized partial AUC up to `max_fpr`
    pub partial_auc: Option<f64>,
    pub stats: ScoreStats,
    pub sigma_k: f64,
    pub max_fpr: f64,
    pub min_tpr: f64,
    pub calibrated_at: DateTime<Utc>,
}

/// JSON has no infinity. Max FPR can yield `+inf`, so non-finite
/// thresholds are written as strings (`"inf"`, `"-inf"`, `"NaN"`).
mod threshold_triple {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(values: &[f64; 3], serializer: S) -> Result<S::Ok, S::Error> {
        (*values)
            .map(|v| {
                if v.is_finite() {
                    Repr::Number(v)
                } else {
                    Repr::Text(v.to_string())
                }
            })
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[f64; 3], D::Error> {
        let reprs = <[Repr; 3]>::deserialize(deserializer)?;
        let mut values = [0.0; 3];
        for (slot, repr) in values.iter_mut().zip(reprs) {
            *slot = match repr {
                Repr::Number(v) => v,
                Repr::Text(text) => text
                    .parse()
                    .map_err(|_| D::Error::custom(format!("invalid threshold '{text}'")))?,
            };
        }
        Ok(values)
    }
}

impl Calibration {
    pub fn normalized_threshold(&self, policy: ThresholdPolicy) -> f64 {
        self.normalized_thresholds[policy.index()]
    }

    pub fn raw_threshold(&self, policy: ThresholdPolicy) -> f64 {
        self.raw_thresholds[policy.index()]
    }

    /// Human-readable threshold report
    pub fn report(&self) -> CalibrationReport<'_> {
        CalibrationReport { calibration: self }
    }
}

/// Display adapter printing one line per policy plus the norm factor
pub struct CalibrationReport<'a> {
    calibration: &'a Calibration,
}

impl fmt::Display for CalibrationReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.calibration;
        for &policy in ThresholdPolicy::all() {
            let bound = match policy {
                ThresholdPolicy::Sigma => c.sigma_k,
                ThresholdPolicy::MaxFpr => c.max_fpr,
                ThresholdPolicy::MinTpr => c.min_tpr,
            };
            writeln!(
                f,
                "distance_threshold: {} # Threshold {} [{}]",
                c.normalized_threshold(policy),
                policy,
                bound
            )?;
        }
        write!(f, "distance_norm_factor: {}", c.norm_factor)
    }
}

/// Calibrate thresholds from raw scores and ground truth (`true` = anomaly).
///
/// Fails without a partial result if any policy parameter is missing or
/// any policy cannot produce a threshold.
pub fn calibrate(
    scores: &[f64],
    y_trues: &[bool],
    params: &CalibrationParams,
) -> Result<Calibration> {
    let sigma_k = params
        .sigma_k
        .ok_or(AnoDetError::MissingConfiguration("calibration.sigma_k"))?;
    let max_fpr = params
        .max_fpr
        .ok_or(AnoDetError::MissingConfiguration("calibration.max_fpr"))?;
    let min_tpr = params
        .min_tpr
        .ok_or(AnoDetError::MissingConfiguration("calibration.min_tpr"))?;
    params.validate()?;

    let roc = RocCurve::from_scores(y_trues, scores)?;
    let auc = roc.auc();
    let partial_auc = params
        .max_fpr
        .map(|bound| roc.partial_auc(bound))
        .transpose()?;

    let stats = ScoreStats::from_scores(scores)?;
    let norm_factor = stats.norm_factor();

    let raw_thresholds = [
        threshold_by_sigma_coverage(stats.mean, stats.std, sigma_k),
        threshold_by_max_fpr(roc.thresholds(), roc.fpr(), max_fpr)?,
        threshold_by_min_tpr(roc.thresholds(), roc.tpr(), min_tpr)?,
    ];
    let normalized_thresholds = raw_thresholds.map(|t| t / norm_factor);

    tracing::debug!(
        "Calibrated {} scores: auc={:.4}, mean={:.6}, std={:.6}",
        scores.len(),
        auc,
        stats.mean,
        stats.std
    );

    Ok(Calibration {
        normalized_thresholds,
        raw_thresholds,
        norm_factor,
        auc,
        partial_auc,
        stats,
        sigma_k,
        max_fpr,
        min_tpr,
        calibrated_at: Utc::now(),
    })
}

/// [`calibrate`], then log the report and optionally print it.
pub fn calibrate_and_report(
    scores: &[f64],
    y_trues: &[bool],
    params: &CalibrationParams,
    show: bool,
) -> Result<Calibration> {
    let calibration = calibrate(scores, y_trues, params)?;
    let report = calibration.report();
    tracing::info!("Calibration report:\n{}", report);
    if show {
        println!("{report}");
    }
    Ok(calibration)
}
