//! Supervised training loop
//!
//! Runs alternating train/val phases per epoch, applies optional loss
//! flooding during training, steps the learning-rate schedule once per
//! train phase and keeps snapshots of both the best (lowest validation
//! loss) and the final weights. The best weights are restored into the
//! learner before returning.

mod data;
mod optim;

pub use data::{DataLoader, Dataset};
pub use optim::{AdamW, ConstantLr, CyclicLr, LrScheduler, Optimizer, Sgd};

use crate::error::{AnoDetError, Result};
use crate::model::{ModelBackend, StateDict};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;

/// A mini-batch of feature rows and class targets
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub inputs: Vec<Vec<f32>>,
    pub targets: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Result of scoring one batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchOutput {
    /// Mean loss over the batch
    pub loss: f64,
    /// Number of argmax-correct predictions
    pub correct: usize,
}

/// One trainable tensor with its accumulated gradient
pub struct Param<'a> {
    pub value: &'a mut [f32],
    pub grad: &'a [f32],
    /// Subject to weight decay (weights yes, biases no)
    pub decay: bool,
}

impl<'a> Param<'a> {
    pub fn new(value: &'a mut [f32], grad: &'a [f32], decay: bool) -> Self {
        Self { value, grad, decay }
    }
}

/// A model that can be trained by [`fit`]
pub trait Learner: ModelBackend {
    /// Switch between training (caching activations) and evaluation mode
    fn set_training(&mut self, training: bool);

    /// Mean loss and correct count for a batch
    fn forward_loss(&mut self, batch: &Batch) -> BatchOutput;

    /// Accumulate gradients of the last training forward pass,
    /// multiplied by `grad_scale`.
    fn backward(&mut self, grad_scale: f64);

    fn zero_grad(&mut self);

    /// Trainable tensors in a stable order
    fn parameters(&mut self) -> Vec<Param<'_>>;
}

/// Loss flooding: keeps the training loss hovering around `b`
/// instead of driving it to zero.
pub fn flooding(loss: f64, b: f64) -> f64 {
    (loss - b).abs() + b
}

/// Gradient multiplier matching [`flooding`]: descend above the flood
/// level, ascend below it.
fn flooding_grad_scale(loss: f64, b: Option<f64>) -> f64 {
    match b {
        None => 1.0,
        Some(b) if loss > b => 1.0,
        Some(b) if loss < b => -1.0,
        Some(_) => 0.0,
    }
}

/// Train and validation loaders for one run
#[derive(Debug, Clone)]
pub struct DataLoaders {
    pub train: DataLoader,
    pub val: DataLoader,
}

/// Knobs for [`fit`]
#[derive(Debug, Clone)]
pub struct FitOptions {
    pub epochs: usize,
    /// Flood level; `None` disables flooding
    pub flooding_b: Option<f64>,
    pub show_progress: bool,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            epochs: 20,
            flooding_b: None,
            show_progress: false,
        }
    }
}

/// Per-epoch metrics
#[derive(Debug, Clone, PartialEq)]
pub struct EpochStats {
    pub epoch: usize,
    pub lr: f64,
    pub train_loss: f64,
    pub train_acc: f64,
    pub val_loss: f64,
    pub val_acc: f64,
}

/// Outcome of a training run
#[derive(Debug, Clone)]
pub struct TrainingResult {
    /// Validation accuracy at the best epoch
    pub best_acc: f64,
    /// Lowest validation loss seen
    pub best_loss: f64,
    /// Epoch that produced the best weights, if any improved
    pub best_epoch: Option<usize>,
    pub last_weights: StateDict,
    pub best_weights: StateDict,
    pub history: Vec<EpochStats>,
}

#[derive(Debug, Default)]
struct PhaseTotals {
    loss_sum: f64,
    correct: usize,
    samples: usize,
}

impl PhaseTotals {
    fn add(&mut self, batch_len: usize, output: BatchOutput) {
        self.loss_sum += output.loss * batch_len as f64;
        self.correct += output.correct;
        self.samples += batch_len;
    }

    fn loss(&self) -> f64 {
        self.loss_sum / self.samples.max(1) as f64
    }

    fn acc(&self) -> f64 {
        self.correct as f64 / self.samples.max(1) as f64
    }
}

fn create_bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓▒░  ")
}

/// Train `learner`, calling `on_improved` every time validation loss
/// strictly improves (used to persist checkpoints).
pub fn fit<L, O, S, F>(
    learner: &mut L,
    optimizer: &mut O,
    scheduler: &mut S,
    loaders: &DataLoaders,
    options: &FitOptions,
    mut on_improved: F,
) -> Result<TrainingResult>
where
    L: Learner + ?Sized,
    O: Optimizer + ?Sized,
    S: LrScheduler + ?Sized,
    F: FnMut(&EpochStats, &StateDict) -> Result<()>,
{
    if loaders.train.is_empty() {
        return Err(AnoDetError::InvalidInput("training set is empty".into()));
    }
    if loaders.val.is_empty() {
        return Err(AnoDetError::InvalidInput("validation set is empty".into()));
    }

    let start = Instant::now();
    let progress = if options.show_progress {
        let bar = ProgressBar::new(options.epochs as u64);
        bar.set_style(create_bar_style());
        Some(bar)
    } else {
        None
    };

    let mut best_loss = 1e10;
    let mut best_acc = 0.0;
    let mut best_epoch = None;
    let mut best_weights = learner.state_dict();
    let mut history = Vec::with_capacity(options.epochs);

    optimizer.set_lr(scheduler.lr());

    for epoch in 0..options.epochs {
        let lr = optimizer.lr();

        // Train phase
        learner.set_training(true);
        let mut train = PhaseTotals::default();
        for batch in loaders.train.batches(epoch) {
            learner.zero_grad();
            let mut output = learner.forward_loss(&batch);
            learner.backward(flooding_grad_scale(output.loss, options.flooding_b));
            optimizer.step(learner.parameters());
            if let Some(b) = options.flooding_b {
                output.loss = flooding(output.loss, b);
            }
            train.add(batch.len(), output);
        }
        scheduler.step();
        optimizer.set_lr(scheduler.lr());

        // Val phase
        learner.set_training(false);
        let mut val = PhaseTotals::default();
        for batch in loaders.val.batches(epoch) {
            let output = learner.forward_loss(&batch);
            val.add(batch.len(), output);
        }

        let stats = EpochStats {
            epoch,
            lr,
            train_loss: train.loss(),
            train_acc: train.acc(),
            val_loss: val.loss(),
            val_acc: val.acc(),
        };
        tracing::info!(
            "Epoch {}/{} lr:{:.7} train loss: {:.4} acc: {:.4} val loss: {:.4} acc: {:.4}",
            epoch + 1,
            options.epochs,
            lr,
            stats.train_loss,
            stats.train_acc,
            stats.val_loss,
            stats.val_acc
        );

        if stats.val_loss < best_loss {
            best_loss = stats.val_loss;
            best_acc = stats.val_acc;
            best_epoch = Some(epoch);
            best_weights = learner.state_dict();
            on_improved(&stats, &best_weights)?;
        }

        if let Some(bar) = &progress {
            bar.set_message(format!("val loss {:.4}", stats.val_loss));
            bar.inc(1);
        }
        history.push(stats);
    }

    if let Some(bar) = progress {
        bar.finish_and_clear();
    }

    let last_weights = learner.state_dict();
    learner.load_state_dict(&best_weights)?;

    let elapsed = start.elapsed();
    tracing::info!(
        "Training complete in {:.0}m {:.0}s, best val loss {:.4} acc {:.4}",
        (elapsed.as_secs() / 60) as f64,
        (elapsed.as_secs() % 60) as f64,
        best_loss,
        best_acc
    );

    Ok(TrainingResult {
        best_acc,
        best_loss,
        best_epoch,
        last_weights,
        best_weights,
        history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Tensor;

    /// Learner that replays fixed losses and tags its weights with the epoch.
    struct ScriptedLearner {
        train_losses: Vec<f64>,
        val_losses: Vec<f64>,
        epoch: Option<usize>,
        training: bool,
        grad_scales: Vec<f64>,
        weight: Vec<f32>,
        grad: Vec<f32>,
    }

    impl ScriptedLearner {
        fn new(train_losses: Vec<f64>, val_losses: Vec<f64>) -> Self {
            Self {
                train_losses,
                val_losses,
                epoch: None,
                training: false,
                grad_scales: Vec::new(),
                weight: vec![-1.0],
                grad: vec![0.0],
            }
        }
    }

    impl ModelBackend for ScriptedLearner {
        fn forward(&self, inputs: &[Vec<f32>]) -> Vec<Vec<f32>> {
            inputs.iter().map(|_| vec![0.0]).collect()
        }

        fn state_dict(&self) -> StateDict {
            let mut dict = StateDict::new();
            dict.insert("tag".into(), Tensor::new(vec![1], self.weight.clone()));
            dict
        }

        fn load_state_dict(&mut self, weights: &StateDict) -> Result<()> {
            let tag = weights
                .get("tag")
                .ok_or_else(|| AnoDetError::model_load("", "missing tag"))?;
            self.weight = tag.data.clone();
            Ok(())
        }
    }

    impl Learner for ScriptedLearner {
        fn set_training(&mut self, training: bool) {
            if training {
                let next = self.epoch.map_or(0, |e| e + 1);
                self.epoch = Some(next);
                self.weight = vec![next as f32];
            }
            self.training = training;
        }

        fn forward_loss(&mut self, batch: &Batch) -> BatchOutput {
            let epoch = self.epoch.unwrap_or(0);
            let loss = if self.training {
                self.train_losses[epoch]
            } else {
                self.val_losses[epoch]
            };
            BatchOutput {
                loss,
                correct: batch.len(),
            }
        }

        fn backward(&mut self, grad_scale: f64) {
            self.grad_scales.push(grad_scale);
        }

        fn zero_grad(&mut self) {
            self.grad[0] = 0.0;
        }

        fn parameters(&mut self) -> Vec<Param<'_>> {
            vec![Param::new(&mut self.weight, &self.grad, false)]
        }
    }

    fn loaders() -> DataLoaders {
        let ds = Dataset::new(vec![vec![0.0]; 4], vec![0; 4]).unwrap();
        DataLoaders {
            train: DataLoader::new(ds.clone(), 4, false, 0),
            val: DataLoader::new(ds, 4, false, 0),
        }
    }

    fn run(learner: &mut ScriptedLearner, options: &FitOptions) -> (TrainingResult, Vec<usize>) {
        let mut improved = Vec::new();
        let result = fit(
            learner,
            &mut Sgd::new(0.1, 0.0, 0.0),
            &mut ConstantLr::new(0.1),
            &loaders(),
            options,
            |stats, _| {
                improved.push(stats.epoch);
                Ok(())
            },
        )
        .unwrap();
        (result, improved)
    }

    #[test]
    fn test_best_epoch_restored() {
        let mut learner = ScriptedLearner::new(vec![1.0; 3], vec![0.5, 0.3, 0.4]);
        let options = FitOptions {
            epochs: 3,
            ..Default::default()
        };
        let (result, improved) = run(&mut learner, &options);

        assert_eq!(result.best_epoch, Some(1));
        assert!((result.best_loss - 0.3).abs() < 1e-12);
        assert_eq!(result.best_weights["tag"].data, vec![1.0]);
        assert_eq!(result.last_weights["tag"].data, vec![2.0]);
        assert_eq!(learner.weight, vec![1.0]);
        assert_eq!(improved, vec![0, 1]);
        assert_eq!(result.history.len(), 3);
    }

    #[test]
    fn test_equal_val_loss_is_not_an_improvement() {
        let mut learner = ScriptedLearner::new(vec![1.0; 3], vec![0.4, 0.4, 0.4]);
        let options = FitOptions {
            epochs: 3,
            ..Default::default()
        };
        let (result, improved) = run(&mut learner, &options);
        assert_eq!(result.best_epoch, Some(0));
        assert_eq!(improved, vec![0]);
    }

    #[test]
    fn test_flooding_reflects_loss_below_level() {
        assert!((flooding(0.05, 0.1) - 0.15).abs() < 1e-12);
        assert!((flooding(0.3, 0.1) - 0.3).abs() < 1e-12);

        let mut learner = ScriptedLearner::new(vec![0.05, 0.3], vec![0.5, 0.5]);
        let options = FitOptions {
            epochs: 2,
            flooding_b: Some(0.1),
            show_progress: false,
        };
        let (result, _) = run(&mut learner, &options);
        assert!((result.history[0].train_loss - 0.15).abs() < 1e-12);
        assert!((result.history[1].train_loss - 0.3).abs() < 1e-12);
        assert_eq!(learner.grad_scales, vec![-1.0, 1.0]);
    }

    #[test]
    fn test_flooding_disabled_leaves_loss() {
        let mut learner = ScriptedLearner::new(vec![0.05], vec![0.5]);
        let options = FitOptions {
            epochs: 1,
            ..Default::default()
        };
        let (result, _) = run(&mut learner, &options);
        assert!((result.history[0].train_loss - 0.05).abs() < 1e-12);
        assert_eq!(learner.grad_scales, vec![1.0]);
    }

    #[test]
    fn test_empty_validation_set_rejected() {
        let mut learner = ScriptedLearner::new(vec![1.0], vec![1.0]);
        let ds = Dataset::new(vec![vec![0.0]], vec![0]).unwrap();
        let loaders = DataLoaders {
            train: DataLoader::new(ds, 1, false, 0),
            val: DataLoader::new(Dataset::default(), 1, false, 0),
        };
        let err = fit(
            &mut learner,
            &mut Sgd::new(0.1, 0.0, 0.0),
            &mut ConstantLr::new(0.1),
            &loaders,
            &FitOptions::default(),
            |_, _| Ok(()),
        )
        .unwrap_err();
        assert!(matches!(err, AnoDetError::InvalidInput(_)));
    }
}
