//! Multi-class MLP implemented in pure Rust
//!
//! Architecture: Input → Linear(hidden) → ReLU → Linear(n_class) → Softmax.
//! Trained with cross-entropy through the [`Learner`] interface.

use super::{softmax, ModelBackend, StateDict, Tensor};
use crate::error::{AnoDetError, Result};
use crate::train::{Batch, BatchOutput, Learner, Param};
use rand::Rng;

const FC1_WEIGHT: &str = "fc1.weight";
const FC1_BIAS: &str = "fc1.bias";
const FC2_WEIGHT: &str = "fc2.weight";
const FC2_BIAS: &str = "fc2.bias";

/// Activations kept from the last training forward pass
#[derive(Debug, Clone, Default)]
struct ForwardCache {
    inputs: Vec<Vec<f32>>,
    hidden: Vec<Vec<f32>>,
    probs: Vec<Vec<f32>>,
    targets: Vec<usize>,
}

/// 2-layer MLP classifier
#[derive(Debug, Clone)]
pub struct MlpClassifier {
    /// First layer weights [hidden_size x input_size], row-major
    w1: Vec<f32>,
    /// First layer bias [hidden_size]
    b1: Vec<f32>,
    /// Second layer weights [n_class x hidden_size], row-major
    w2: Vec<f32>,
    /// Second layer bias [n_class]
    b2: Vec<f32>,
    input_size: usize,
    hidden_size: usize,
    n_class: usize,
    grads: Option<Grads>,
    cache: Option<ForwardCache>,
    training: bool,
}

#[derive(Debug, Clone)]
struct Grads {
    w1: Vec<f32>,
    b1: Vec<f32>,
    w2: Vec<f32>,
    b2: Vec<f32>,
}

impl MlpClassifier {
    /// Create a classifier with He-scaled uniform weights drawn from `rng`.
    pub fn new<R: Rng>(
        input_size: usize,
        hidden_size: usize,
        n_class: usize,
        rng: &mut R,
    ) -> Self {
        let scale1 = (2.0 / input_size.max(1) as f32).sqrt();
        let scale2 = (2.0 / hidden_size.max(1) as f32).sqrt();

        let w1 = (0..hidden_size * input_size)
            .map(|_| rng.random_range(-scale1..=scale1))
            .collect();
        let w2 = (0..n_class * hidden_size)
            .map(|_| rng.random_range(-scale2..=scale2))
            .collect();

        Self {
            w1,
            b1: vec![0.0; hidden_size],
            w2,
            b2: vec![0.0; n_class],
            input_size,
            hidden_size,
            n_class,
            grads: None,
            cache: None,
            training: false,
        }
    }

    /// Build a classifier whose dimensions are read from the weights.
    pub fn from_state_dict(weights: &StateDict) -> Result<Self> {
        let fc1 = weights
            .get(FC1_WEIGHT)
            .ok_or_else(|| AnoDetError::model_load("", format!("missing key {FC1_WEIGHT}")))?;
        let fc2 = weights
            .get(FC2_WEIGHT)
            .ok_or_else(|| AnoDetError::model_load("", format!("missing key {FC2_WEIGHT}")))?;
        let (hidden_size, input_size) = matrix_dims(FC1_WEIGHT, fc1)?;
        let (n_class, _) = matrix_dims(FC2_WEIGHT, fc2)?;

        let mut model = Self {
            w1: vec![0.0; hidden_size * input_size],
            b1: vec![0.0; hidden_size],
            w2: vec![0.0; n_class * hidden_size],
            b2: vec![0.0; n_class],
            input_size,
            hidden_size,
            n_class,
            grads: None,
            cache: None,
            training: false,
        };
        model.load_state_dict(weights)?;
        Ok(model)
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn n_class(&self) -> usize {
        self.n_class
    }

    fn hidden_layer(&self, x: &[f32]) -> Vec<f32> {
        (0..self.hidden_size)
            .map(|i| {
                let row = &self.w1[i * self.input_size..(i + 1) * self.input_size];
                let sum: f32 = row.iter().zip(x).map(|(w, v)| w * v).sum();
                (sum + self.b1[i]).max(0.0) // ReLU
            })
            .collect()
    }

    fn output_layer(&self, hidden: &[f32]) -> Vec<f32> {
        (0..self.n_class)
            .map(|i| {
                let row = &self.w2[i * self.hidden_size..(i + 1) * self.hidden_size];
                row.iter().zip(hidden).map(|(w, h)| w * h).sum::<f32>() + self.b2[i]
            })
            .collect()
    }

    fn grads_mut(&mut self) -> &mut Grads {
        let (w1, b1, w2, b2) = (self.w1.len(), self.b1.len(), self.w2.len(), self.b2.len());
        self.grads.get_or_insert_with(|| Grads {
            w1: vec![0.0; w1],
            b1: vec![0.0; b1],
            w2: vec![0.0; w2],
            b2: vec![0.0; b2],
        })
    }
}

fn matrix_dims(name: &str, tensor: &Tensor) -> Result<(usize, usize)> {
    match tensor.shape.as_slice() {
        &[rows, cols] if rows * cols == tensor.data.len() => Ok((rows, cols)),
        shape => Err(AnoDetError::model_load(
            "",
            format!("{name}: expected a 2-d tensor, got shape {shape:?}"),
        )),
    }
}

fn copy_tensor(weights: &StateDict, name: &str, shape: &[usize], dst: &mut [f32]) -> Result<()> {
    let tensor = weights
        .get(name)
        .ok_or_else(|| AnoDetError::model_load("", format!("missing key {name}")))?;
    if tensor.shape != shape || tensor.data.len() != dst.len() {
        return Err(AnoDetError::model_load(
            "",
            format!(
                "{name}: shape mismatch, expected {shape:?}, got {:?}",
                tensor.shape
            ),
        ));
    }
    dst.copy_from_slice(&tensor.data);
    Ok(())
}

impl ModelBackend for MlpClassifier {
    fn forward(&self, inputs: &[Vec<f32>]) -> Vec<Vec<f32>> {
        inputs
            .iter()
            .map(|x| self.output_layer(&self.hidden_layer(x)))
            .collect()
    }

    fn state_dict(&self) -> StateDict {
        let mut dict = StateDict::new();
        dict.insert(
            FC1_WEIGHT.to_string(),
            Tensor::new(vec![self.hidden_size, self.input_size], self.w1.clone()),
        );
        dict.insert(
            FC1_BIAS.to_string(),
            Tensor::new(vec![self.hidden_size], self.b1.clone()),
        );
        dict.insert(
            FC2_WEIGHT.to_string(),
            Tensor::new(vec![self.n_class, self.hidden_size], self.w2.clone()),
        );
        dict.insert(
            FC2_BIAS.to_string(),
            Tensor::new(vec![self.n_class], self.b2.clone()),
        );
        dict
    }

    fn load_state_dict(&mut self, weights: &StateDict) -> Result<()> {
        // Validate everything before touching live weights
        let mut w1 = vec![0.0; self.w1.len()];
        let mut b1 = vec![0.0; self.b1.len()];
        let mut w2 = vec![0.0; self.w2.len()];
        let mut b2 = vec![0.0; self.b2.len()];
        copy_tensor(weights, FC1_WEIGHT, &[self.hidden_size, self.input_size], &mut w1)?;
        copy_tensor(weights, FC1_BIAS, &[self.hidden_size], &mut b1)?;
        copy_tensor(weights, FC2_WEIGHT, &[self.n_class, self.hidden_size], &mut w2)?;
        copy_tensor(weights, FC2_BIAS, &[self.n_class], &mut b2)?;

        self.w1 = w1;
        self.b1 = b1;
        self.w2 = w2;
        self.b2 = b2;
        self.cache = None;
        Ok(())
    }
}

impl Learner for MlpClassifier {
    fn set_training(&mut self, training: bool) {
        self.training = training;
        if !training {
            self.cache = None;
        }
    }

    fn forward_loss(&mut self, batch: &Batch) -> BatchOutput {
        let mut hidden = Vec::with_capacity(batch.len());
        let mut probs = Vec::with_capacity(batch.len());
        let mut loss = 0.0f64;
        let mut correct = 0;

        for (x, &target) in batch.inputs.iter().zip(&batch.targets) {
            let h = self.hidden_layer(x);
            let p = softmax(&self.output_layer(&h));
            loss -= (p.get(target).copied().unwrap_or(0.0).max(1e-7) as f64).ln();
            let predicted = p
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i);
            if predicted == Some(target) {
                correct += 1;
            }
            hidden.push(h);
            probs.push(p);
        }

        if self.training {
            self.cache = Some(ForwardCache {
                inputs: batch.inputs.clone(),
                hidden,
                probs,
                targets: batch.targets.clone(),
            });
        }

        BatchOutput {
            loss: if batch.is_empty() {
                0.0
            } else {
                loss / batch.len() as f64
            },
            correct,
        }
    }

    fn backward(&mut self, grad_scale: f64) {
        let Some(cache) = self.cache.take() else {
            tracing::warn!("backward() called without a cached training forward pass");
            return;
        };
        let n = cache.inputs.len().max(1) as f32;
        let scale = grad_scale as f32 / n;
        let (input_size, hidden_size, n_class) = (self.input_size, self.hidden_size, self.n_class);
        let w2 = self.w2.clone();
        let grads = self.grads_mut();

        for (((x, h), p), &target) in cache
            .inputs
            .iter()
            .zip(&cache.hidden)
            .zip(&cache.probs)
            .zip(&cache.targets)
        {
            // Gradient of softmax + cross-entropy
            let mut d_logits: Vec<f32> = p.iter().map(|v| v * scale).collect();
            if target < n_class {
                d_logits[target] -= scale;
            }

            let mut d_hidden = vec![0.0f32; hidden_size];
            for i in 0..n_class {
                grads.b2[i] += d_logits[i];
                for j in 0..hidden_size {
                    grads.w2[i * hidden_size + j] += d_logits[i] * h[j];
                    d_hidden[j] += d_logits[i] * w2[i * hidden_size + j];
                }
            }

            for j in 0..hidden_size {
                // ReLU gradient
                if h[j] <= 0.0 {
                    continue;
                }
                grads.b1[j] += d_hidden[j];
                for (k, &xv) in x.iter().enumerate().take(input_size) {
                    grads.w1[j * input_size + k] += d_hidden[j] * xv;
                }
            }
        }
    }

    fn zero_grad(&mut self) {
        if let Some(grads) = self.grads.as_mut() {
            for g in [&mut grads.w1, &mut grads.b1, &mut grads.w2, &mut grads.b2] {
                g.iter_mut().for_each(|v| *v = 0.0);
            }
        }
    }

    fn parameters(&mut self) -> Vec<Param<'_>> {
        self.grads_mut();
        let Some(grads) = self.grads.as_ref() else {
            return Vec::new();
        };
        vec![
            Param::new(&mut self.w1, &grads.w1, true),
            Param::new(&mut self.b1, &grads.b1, false),
            Param::new(&mut self.w2, &grads.w2, true),
            Param::new(&mut self.b2, &grads.b2, false),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn model(input: usize, hidden: usize, n_class: usize) -> MlpClassifier {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        MlpClassifier::new(input, hidden, n_class, &mut rng)
    }

    #[test]
    fn test_forward_shapes_and_probabilities() {
        let m = model(6, 8, 4);
        let inputs = vec![vec![1.0, 0.0, 0.5, 0.0, 0.2, 1.0]; 3];
        let logits = m.forward(&inputs);
        assert_eq!(logits.len(), 3);
        assert!(logits.iter().all(|l| l.len() == 4));
        for p in m.predict_proba(&inputs) {
            assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_same_seed_same_weights() {
        assert_eq!(model(5, 4, 3).state_dict(), model(5, 4, 3).state_dict());
    }

    #[test]
    fn test_state_dict_round_trip() {
        let a = model(5, 4, 3);
        let rebuilt = MlpClassifier::from_state_dict(&a.state_dict()).unwrap();
        assert_eq!(rebuilt.n_class(), 3);
        assert_eq!(rebuilt.input_size(), 5);
        let x = vec![vec![0.3, 0.1, 0.0, 1.0, 0.5]];
        assert_eq!(a.forward(&x), rebuilt.forward(&x));
    }

    #[test]
    fn test_load_rejects_shape_mismatch() {
        let mut a = model(5, 4, 3);
        let other = model(5, 4, 2).state_dict();
        let before = a.state_dict();
        let err = a.load_state_dict(&other).unwrap_err();
        assert!(matches!(err, AnoDetError::ModelLoadError { .. }));
        // Live weights untouched on failure
        assert_eq!(a.state_dict(), before);
    }

    #[test]
    fn test_load_rejects_missing_key() {
        let mut a = model(5, 4, 3);
        let mut weights = a.state_dict();
        weights.remove(FC2_BIAS);
        assert!(a.load_state_dict(&weights).is_err());
    }

    #[test]
    fn test_gradient_step_reduces_loss() {
        let mut m = model(4, 8, 2);
        let batch = Batch {
            inputs: vec![
                vec![1.0, 0.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0, 0.0],
                vec![1.0, 0.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0, 0.0],
            ],
            targets: vec![0, 1, 0, 1],
        };
        m.set_training(true);
        let initial = m.forward_loss(&batch).loss;
        m.cache = None;
        for _ in 0..200 {
            m.zero_grad();
            m.forward_loss(&batch);
            m.backward(1.0);
            for Param { value, grad, .. } in m.parameters() {
                for (v, g) in value.iter_mut().zip(grad) {
                    *v -= 0.1 * g;
                }
            }
        }
        m.set_training(false);
        let trained = m.forward_loss(&batch);
        assert!(trained.loss < initial);
        assert_eq!(trained.correct, 4);
    }
}
