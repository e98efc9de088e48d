//! Threshold selection policies over an ROC curve
//!
//! Each policy picks one decision threshold from the curve's native
//! decreasing-threshold order; ties go to the leftmost qualifying point.

use crate::error::{AnoDetError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three calibrated thresholds, in their fixed output order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdPolicy {
    /// `mean + k * std` over raw scores
    Sigma,
    /// Strictest threshold whose relaxation reaches the FPR budget
    MaxFpr,
    /// First threshold reaching the TPR target
    MinTpr,
}

impl ThresholdPolicy {
    pub fn all() -> &'static [ThresholdPolicy] {
        &[
            ThresholdPolicy::Sigma,
            ThresholdPolicy::MaxFpr,
            ThresholdPolicy::MinTpr,
        ]
    }

    /// Slot of this policy in a calibrated threshold triple
    pub fn index(&self) -> usize {
        match self {
            ThresholdPolicy::Sigma => 0,
            ThresholdPolicy::MaxFpr => 1,
            ThresholdPolicy::MinTpr => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ThresholdPolicy::Sigma => "k-sigma",
            ThresholdPolicy::MaxFpr => "max FPR",
            ThresholdPolicy::MinTpr => "min TPR",
        }
    }
}

impl fmt::Display for ThresholdPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ThresholdPolicy {
    type Err = AnoDetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sigma" | "k-sigma" => Ok(Self::Sigma),
            "fpr" | "max-fpr" | "max_fpr" => Ok(Self::MaxFpr),
            "tpr" | "min-tpr" | "min_tpr" => Ok(Self::MinTpr),
            other => Err(AnoDetError::InvalidInput(format!(
                "unknown threshold policy '{other}' (expected sigma, fpr or tpr)"
            ))),
        }
    }
}

/// Coverage threshold: 2 sigma covers ~95%, 3 sigma ~99.7%.
pub fn threshold_by_sigma_coverage(mean_score: f64, std_score: f64, k: f64) -> f64 {
    mean_score + k * std_score
}

/// First threshold whose paired TPR reaches `min_tpr`.
///
/// # Errors
///
/// `RocInvariant` if the scan is exhausted and `tpr` does not end at
/// exactly 1.0 (the curve itself is malformed); `ThresholdNotFound` if
/// the curve is well formed but no point qualifies.
pub fn threshold_by_min_tpr(thresholds: &[f64], tpr: &[f64], min_tpr: f64) -> Result<f64> {
    // An empty curve falls through to the RocInvariant check below
    if !thresholds.is_empty() {
        check_lengths(thresholds, tpr, "tpr")?;
    } else if !tpr.is_empty() {
        return Err(AnoDetError::InvalidInput(format!(
            "thresholds length 0 != tpr length {}",
            tpr.len()
        )));
    }

    if let Some((&th, _)) = thresholds
        .iter()
        .zip(tpr)
        .find(|&(_, &rate)| min_tpr <= rate)
    {
        return Ok(th);
    }

    if tpr.last() != Some(&1.0) {
        return Err(AnoDetError::RocInvariant(format!(
            "TPR should end at 1.0, got {:?}",
            tpr.last()
        )));
    }
    Err(AnoDetError::ThresholdNotFound {
        policy: ThresholdPolicy::MinTpr.name(),
        bound: min_tpr,
    })
}

/// Strictest threshold whose *next, looser* neighbour reaches `max_fpr`.
///
/// `thresholds[i]` is checked against `fpr[i + 1]`. When every FPR stays
/// under the budget the loosest threshold is returned instead of failing.
///
/// # Errors
///
/// `InvalidInput` only for empty or mismatched slices.
pub fn threshold_by_max_fpr(thresholds: &[f64], fpr: &[f64], max_fpr: f64) -> Result<f64> {
    check_lengths(thresholds, fpr, "fpr")?;

    if let Some((&th, _)) = thresholds
        .iter()
        .zip(fpr.iter().skip(1))
        .find(|&(_, &next_rate)| max_fpr <= next_rate)
    {
        return Ok(th);
    }

    // All thresholds can stay under max_fpr
    let loosest = thresholds[thresholds.len() - 1];
    tracing::warn!(
        "FPR never reaches {}; falling back to loosest threshold {}",
        max_fpr,
        loosest
    );
    Ok(loosest)
}

fn check_lengths(thresholds: &[f64], rates: &[f64], name: &str) -> Result<()> {
    if thresholds.is_empty() {
        return Err(AnoDetError::InvalidInput("empty ROC curve".into()));
    }
    if thresholds.len() != rates.len() {
        return Err(AnoDetError::InvalidInput(format!(
            "thresholds length {} != {} length {}",
            thresholds.len(),
            name,
            rates.len()
        )));
    }
    Ok(())
}
