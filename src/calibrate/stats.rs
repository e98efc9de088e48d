//! Score distribution statistics

use crate::error::{AnoDetError, Result};
use serde::{Deserialize, Serialize};

/// Mean and population standard deviation of raw scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreStats {
    /// Number of scores
    pub count: usize,
    pub mean: f64,
    /// Population (not sample) standard deviation
    pub std: f64,
}

impl ScoreStats {
    /// Compute statistics over a non-empty, finite score sequence.
    pub fn from_scores(scores: &[f64]) -> Result<Self> {
        if scores.is_empty() {
            return Err(AnoDetError::InvalidInput(
                "cannot compute statistics of an empty score vector".into(),
            ));
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(AnoDetError::InvalidInput("scores must be finite".into()));
        }

        let n = scores.len() as f64;
        let mean = scores.iter().sum::<f64>() / n;
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;

        Ok(Self {
            count: scores.len(),
            mean,
            std: variance.sqrt(),
        })
    }

    /// Divisor used to normalize scores and thresholds; always positive.
    pub fn norm_factor(&self) -> f64 {
        self.mean.max(f64::EPSILON)
    }
}
