//! Model backend contract and weight snapshots
//!
//! A backend maps a batch of feature vectors to per-class logits and can
//! export/import its weights as a [`StateDict`]. Weight snapshots are plain
//! data so the fit loop can keep a best and a last copy side by side.

mod mlp;

pub use mlp::MlpClassifier;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named weight tensor, row-major
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self { shape, data }
    }

    /// Element count implied by the shape
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Snapshot of every weight tensor, keyed by parameter name
pub type StateDict = BTreeMap<String, Tensor>;

/// Anything that scores batches and round-trips its weights
pub trait ModelBackend {
    /// Per-sample class logits
    fn forward(&self, inputs: &[Vec<f32>]) -> Vec<Vec<f32>>;

    fn state_dict(&self) -> StateDict;

    /// Replace live weights; fails on missing keys or shape mismatch.
    fn load_state_dict(&mut self, weights: &StateDict) -> Result<()>;

    /// Softmax over [`ModelBackend::forward`]
    fn predict_proba(&self, inputs: &[Vec<f32>]) -> Vec<Vec<f32>> {
        self.forward(inputs).iter().map(|l| softmax(l)).collect()
    }
}

/// Numerically stable softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
