//! Receiver operating characteristic curve
//!
//! Built once from `(labels, scores)` where a positive label marks an
//! anomaly and a higher score means "more anomalous". Points are ordered
//! by strictly decreasing threshold, so both rates are non-decreasing and
//! run from `(0, 0)` to `(1, 1)`.

use crate::error::{AnoDetError, Result};

/// Immutable ROC curve: `(thresholds, fpr, tpr)` of equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct RocCurve {
    thresholds: Vec<f64>,
    fpr: Vec<f64>,
    tpr: Vec<f64>,
}

impl RocCurve {
    /// Compute the curve, dropping collinear intermediate points.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the inputs are empty, differ in length, contain a
    /// non-finite score, or hold only one class.
    pub fn from_scores(y_trues: &[bool], scores: &[f64]) -> Result<Self> {
        Self::build(y_trues, scores, true)
    }

    /// Compute the curve keeping one point per distinct score.
    pub fn from_scores_full(y_trues: &[bool], scores: &[f64]) -> Result<Self> {
        Self::build(y_trues, scores, false)
    }

    fn build(y_trues: &[bool], scores: &[f64], drop_intermediate: bool) -> Result<Self> {
        if scores.is_empty() {
            return Err(AnoDetError::InvalidInput("empty score vector".into()));
        }
        if scores.len() != y_trues.len() {
            return Err(AnoDetError::InvalidInput(format!(
                "scores length {} != labels length {}",
                scores.len(),
                y_trues.len()
            )));
        }
        if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
            return Err(AnoDetError::InvalidInput(format!(
                "non-finite score {bad}"
            )));
        }

        let total_pos = y_trues.iter().filter(|&&y| y).count();
        if total_pos == 0 {
            return Err(AnoDetError::InvalidInput("no positive samples".into()));
        }
        if total_pos == y_trues.len() {
            return Err(AnoDetError::InvalidInput("no negative samples".into()));
        }

        // Stable sort by descending score
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

        // Cumulative counts at the last index of each distinct score
        let mut tps: Vec<f64> = Vec::new();
        let mut fps: Vec<f64> = Vec::new();
        let mut thresholds: Vec<f64> = Vec::new();
        let (mut tp, mut fp) = (0usize, 0usize);
        for (pos, &idx) in order.iter().enumerate() {
            if y_trues[idx] {
                tp += 1;
            } else {
                fp += 1;
            }
            let last_of_run = order
                .get(pos + 1)
                .map_or(true, |&next| scores[next] != scores[idx]);
            if last_of_run {
                tps.push(tp as f64);
                fps.push(fp as f64);
                thresholds.push(scores[idx]);
            }
        }

        if drop_intermediate && fps.len() > 2 {
            let n = fps.len();
            let keep: Vec<usize> = (0..n)
                .filter(|&i| {
                    if i == 0 || i == n - 1 {
                        return true;
                    }
                    let second_diff_fp = fps[i + 1] - 2.0 * fps[i] + fps[i - 1];
                    let second_diff_tp = tps[i + 1] - 2.0 * tps[i] + tps[i - 1];
                    second_diff_fp != 0.0 || second_diff_tp != 0.0
                })
                .collect();
            tps = keep.iter().map(|&i| tps[i]).collect();
            fps = keep.iter().map(|&i| fps[i]).collect();
            thresholds = keep.iter().map(|&i| thresholds[i]).collect();
        }

        // Leading point where nothing is flagged
        let total_fp = fps[fps.len() - 1];
        let total_tp = tps[tps.len() - 1];
        let mut curve = Self {
            thresholds: Vec::with_capacity(thresholds.len() + 1),
            fpr: Vec::with_capacity(fps.len() + 1),
            tpr: Vec::with_capacity(tps.len() + 1),
        };
        curve.thresholds.push(f64::INFINITY);
        curve.fpr.push(0.0);
        curve.tpr.push(0.0);
        curve.thresholds.extend(thresholds);
        curve.fpr.extend(fps.iter().map(|f| f / total_fp));
        curve.tpr.extend(tps.iter().map(|t| t / total_tp));

        Ok(curve)
    }

    /// Assemble a curve from precomputed columns, checking every invariant.
    pub fn from_parts(thresholds: Vec<f64>, fpr: Vec<f64>, tpr: Vec<f64>) -> Result<Self> {
        if thresholds.len() < 2 || thresholds.len() != fpr.len() || fpr.len() != tpr.len() {
            return Err(AnoDetError::RocInvariant(format!(
                "need >= 2 points of equal length, got {}/{}/{}",
                thresholds.len(),
                fpr.len(),
                tpr.len()
            )));
        }
        if thresholds.windows(2).any(|w| w[0] <= w[1]) {
            return Err(AnoDetError::RocInvariant(
                "thresholds must be strictly decreasing".into(),
            ));
        }
        for (name, rates) in [("fpr", &fpr), ("tpr", &tpr)] {
            if rates.windows(2).any(|w| w[0] > w[1]) {
                return Err(AnoDetError::RocInvariant(format!(
                    "{name} must be non-decreasing"
                )));
            }
            if rates[0] != 0.0 || rates[rates.len() - 1] != 1.0 {
                return Err(AnoDetError::RocInvariant(format!(
                    "{name} must run from 0.0 to 1.0"
                )));
            }
        }
        Ok(Self {
            thresholds,
            fpr,
            tpr,
        })
    }

    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    pub fn fpr(&self) -> &[f64] {
        &self.fpr
    }

    pub fn tpr(&self) -> &[f64] {
        &self.tpr
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    /// Area under the curve (trapezoidal rule)
    pub fn auc(&self) -> f64 {
        trapezoidal_area(&self.fpr, &self.tpr)
    }

    /// Partial area up to `max_fpr`, McClish-standardized so that a random
    /// detector scores 0.5 and a perfect one 1.0.
    ///
    /// `max_fpr == 1.0` yields the plain AUC.
    pub fn partial_auc(&self, max_fpr: f64) -> Result<f64> {
        if !(max_fpr > 0.0 && max_fpr <= 1.0) {
            return Err(AnoDetError::InvalidInput(format!(
                "max_fpr must be in (0, 1], got {max_fpr}"
            )));
        }
        if max_fpr == 1.0 {
            return Ok(self.auc());
        }

        // First index with fpr > max_fpr; fpr ends at 1.0 so it exists
        let stop = self.fpr.partition_point(|&f| f <= max_fpr);
        if stop == 0 || stop >= self.fpr.len() {
            return Err(AnoDetError::RocInvariant(
                "fpr does not bracket max_fpr".into(),
            ));
        }
        let (x0, x1) = (self.fpr[stop - 1], self.fpr[stop]);
        let (y0, y1) = (self.tpr[stop - 1], self.tpr[stop]);
        let y_at_bound = y0 + (y1 - y0) * (max_fpr - x0) / (x1 - x0);

        let mut xs = self.fpr[..stop].to_vec();
        let mut ys = self.tpr[..stop].to_vec();
        xs.push(max_fpr);
        ys.push(y_at_bound);
        let partial = trapezoidal_area(&xs, &ys);

        let min_area = 0.5 * max_fpr * max_fpr;
        let max_area = max_fpr;
        Ok(0.5 * (1.0 + (partial - min_area) / (max_area - min_area)))
    }
}

fn trapezoidal_area(x: &[f64], y: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xw, yw)| (xw[1] - xw[0]) * (yw[1] + yw[0]) / 2.0)
        .sum()
}
