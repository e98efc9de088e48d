//! In-memory labelled datasets and deterministic batching

use super::Batch;
use crate::error::{AnoDetError, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Feature rows with their class targets
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    inputs: Vec<Vec<f32>>,
    targets: Vec<usize>,
}

impl Dataset {
    pub fn new(inputs: Vec<Vec<f32>>, targets: Vec<usize>) -> Result<Self> {
        if inputs.len() != targets.len() {
            return Err(AnoDetError::InvalidInput(format!(
                "inputs length {} != targets length {}",
                inputs.len(),
                targets.len()
            )));
        }
        Ok(Self { inputs, targets })
    }

    pub fn push(&mut self, input: Vec<f32>, target: usize) {
        self.inputs.push(input);
        self.targets.push(target);
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// Splits a dataset into batches, reshuffling per epoch from a fixed seed
#[derive(Debug, Clone)]
pub struct DataLoader {
    dataset: Dataset,
    batch_size: usize,
    shuffle: bool,
    seed: u64,
}

impl DataLoader {
    pub fn new(dataset: Dataset, batch_size: usize, shuffle: bool, seed: u64) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            shuffle,
            seed,
        }
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Number of samples (not batches)
    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// Batches for one epoch; the same epoch always yields the same order.
    pub fn batches(&self, epoch: usize) -> Vec<Batch> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }
        order
            .chunks(self.batch_size)
            .map(|chunk| Batch {
                inputs: chunk.iter().map(|&i| self.dataset.inputs[i].clone()).collect(),
                targets: chunk.iter().map(|&i| self.dataset.targets[i]).collect(),
            })
            .collect()
    }
}
