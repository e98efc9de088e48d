//! Anomaly detection by geometric-transform classification
//!
//! A classifier learns which transform was applied to a normal sample.
//! At inference every transform of a test sample is scored; the mean
//! probability the model assigns to the correct transform is the sample's
//! normality, and `1 - normality` is its anomaly score.

mod transforms;

pub use transforms::{GeoTransform, GeoTransformSet, Rotation, TransformSource};

use crate::config::DetectorParams;
use crate::detector::checkpoint::{
    checkpoint_name, checkpoint_prefix, latest_checkpoint, load_checkpoint, save_checkpoint,
    CheckpointLister, FsLister,
};
use crate::detector::{AnoDetector, DetectorState, LifecycleStage, Scores};
use crate::error::{AnoDetError, Result};
use crate::model::{MlpClassifier, ModelBackend};
use crate::train::{
    fit, AdamW, CyclicLr, DataLoader, DataLoaders, Dataset, FitOptions, TrainingResult,
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::{Path, PathBuf};

/// Correct-transform probabilities, one row per sample.
///
/// `prob_rows` holds `n_class` consecutive softmax rows per sample, row
/// `t` being the prediction for transform `t`.
pub fn diagonal_blocks(prob_rows: &[Vec<f32>], n_class: usize) -> Result<Vec<Vec<f64>>> {
    if n_class == 0 || prob_rows.len() % n_class != 0 {
        return Err(AnoDetError::InvalidInput(format!(
            "{} probability rows do not form {n_class}x{n_class} blocks",
            prob_rows.len()
        )));
    }
    prob_rows
        .chunks(n_class)
        .map(|block| {
            block
                .iter()
                .enumerate()
                .map(|(t, row)| {
                    row.get(t).map(|&p| f64::from(p)).ok_or_else(|| {
                        AnoDetError::InvalidInput(format!(
                            "probability row has {} columns, expected {n_class}",
                            row.len()
                        ))
                    })
                })
                .collect()
        })
        .collect()
}

/// Mean of each block's diagonal; higher is more normal.
pub fn simplified_normality(prob_rows: &[Vec<f32>], n_class: usize) -> Result<Vec<f64>> {
    Ok(diagonal_blocks(prob_rows, n_class)?
        .iter()
        .map(|diag| diag.iter().sum::<f64>() / n_class as f64)
        .collect())
}

pub fn abnormality(normality: f64) -> f64 {
    1.0 - normality
}

/// Geometric-transform anomaly detector over any [`TransformSource`]
pub struct Dadgt<S: TransformSource> {
    source: S,
    params: DetectorParams,
    state: DetectorState,
    model: Option<MlpClassifier>,
    loaders: Option<DataLoaders>,
    lister: Box<dyn CheckpointLister>,
}

impl<S: TransformSource> Dadgt<S> {
    pub fn new(source: S, params: DetectorParams) -> Result<Self> {
        params.validate()?;
        if source.n_transforms() != params.n_class {
            return Err(AnoDetError::InvalidConfig(format!(
                "source produces {} transforms but n_class is {}",
                source.n_transforms(),
                params.n_class
            )));
        }
        let state = DetectorState::new(&params)?;
        Ok(Self {
            source,
            params,
            state,
            model: None,
            loaders: None,
            lister: Box::new(FsLister),
        })
    }

    /// Replace how checkpoint files are discovered.
    pub fn with_lister(mut self, lister: Box<dyn CheckpointLister>) -> Self {
        self.lister = lister;
        self
    }

    pub fn model(&self) -> Option<&MlpClassifier> {
        self.model.as_ref()
    }

    fn model_ref(&self) -> Result<&MlpClassifier> {
        self.model.as_ref().ok_or(AnoDetError::Lifecycle {
            expected: "model-created",
            actual: self.state.stage().name(),
        })
    }

    /// Every transform of every sample, labelled with its transform index
    fn transformed_dataset<'a, I>(&self, samples: I) -> Result<Dataset>
    where
        I: IntoIterator<Item = &'a S::Sample>,
        S::Sample: 'a,
    {
        let mut dataset = Dataset::default();
        for sample in samples {
            for tfm in 0..self.params.n_class {
                dataset.push(self.checked_features(sample, tfm)?, tfm);
            }
        }
        Ok(dataset)
    }

    fn checked_features(&self, sample: &S::Sample, tfm: usize) -> Result<Vec<f32>> {
        let features = self.source.features(sample, tfm)?;
        if features.len() != self.source.feature_len() {
            return Err(AnoDetError::InvalidInput(format!(
                "transform {tfm} produced {} features, expected {}",
                features.len(),
                self.source.feature_len()
            )));
        }
        Ok(features)
    }

    /// Load the newest checkpoint written for the current test target.
    pub fn load_saved_checkpoint(&mut self) -> Result<PathBuf> {
        let prefix = checkpoint_prefix(self.state.target_name());
        let path = latest_checkpoint(self.lister.as_ref(), &self.state.weights, &prefix)?;
        self.load_checkpoint_file(&path)?;
        Ok(path)
    }

    fn load_checkpoint_file(&mut self, path: &Path) -> Result<()> {
        tracing::info!("Loading checkpoint {}", path.display());
        let weights = load_checkpoint(path)?;
        let model = self.model.as_mut().ok_or(AnoDetError::Lifecycle {
            expected: "model-created",
            actual: self.state.stage().name(),
        })?;
        model
            .load_state_dict(&weights)
            .map_err(|e| AnoDetError::model_load(path, e.to_string()))
    }
}

impl<S: TransformSource> AnoDetector for Dadgt<S> {
    type Sample = S::Sample;

    fn state(&self) -> &DetectorState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut DetectorState {
        &mut self.state
    }

    fn params(&self) -> &DetectorParams {
        &self.params
    }

    fn params_mut(&mut self) -> &mut DetectorParams {
        &mut self.params
    }

    fn create_model(&mut self, weights: Option<&Path>) -> Result<()> {
        if self.state.stage() == LifecycleStage::Fresh {
            return Err(AnoDetError::Lifecycle {
                expected: "experiment-prepared",
                actual: self.state.stage().name(),
            });
        }
        let mut rng = ChaCha8Rng::seed_from_u64(self.experiment_seed());
        let mut model = MlpClassifier::new(
            self.source.feature_len(),
            self.params.hidden_size,
            self.params.n_class,
            &mut rng,
        );
        if let Some(path) = weights {
            let state_dict = load_checkpoint(path)?;
            model
                .load_state_dict(&state_dict)
                .map_err(|e| AnoDetError::model_load(path, e.to_string()))?;
            tracing::info!("Loaded weights from {}", path.display());
        }
        self.model = Some(model);
        self.loaders = None;
        self.state.set_stage(LifecycleStage::ModelCreated);
        Ok(())
    }

    fn setup_train(&mut self, samples: &[Self::Sample]) -> Result<()> {
        self.state
            .require(&[LifecycleStage::ModelCreated], "model-created")?;
        if samples.is_empty() {
            return Err(AnoDetError::InvalidInput("no training samples".into()));
        }

        let seed = self.experiment_seed();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let n_val = (self.params.fit.validation_split * samples.len() as f64) as usize;
        let mut order: Vec<usize> = (0..samples.len()).collect();
        order.shuffle(&mut rng);
        let (val_idx, train_idx) = order.split_at(n_val);
        if val_idx.is_empty() || train_idx.is_empty() {
            return Err(AnoDetError::InvalidInput(format!(
                "validation split {} of {} samples leaves {} train / {} val",
                self.params.fit.validation_split,
                samples.len(),
                train_idx.len(),
                val_idx.len()
            )));
        }

        let train = self.transformed_dataset(train_idx.iter().map(|&i| &samples[i]))?;
        let val = self.transformed_dataset(val_idx.iter().map(|&i| &samples[i]))?;
        tracing::info!(
            "Training on {} samples ({} rows), validating on {} samples ({} rows)",
            train_idx.len(),
            train.len(),
            val_idx.len(),
            val.len()
        );

        let batch_size = self.params.fit.batch_size;
        self.loaders = Some(DataLoaders {
            train: DataLoader::new(train, batch_size, true, seed),
            val: DataLoader::new(val, batch_size, false, seed),
        });
        self.state.set_stage(LifecycleStage::TrainSetup);
        Ok(())
    }

    fn train_model(&mut self, _samples: &[Self::Sample]) -> Result<TrainingResult> {
        self.state
            .require(&[LifecycleStage::TrainSetup], "train-setup")?;
        let fit_params = self.params.fit.clone();
        let weights_dir = self.state.weights.clone();
        let target = self.state.target_name().to_string();

        let model = self.model.as_mut().ok_or(AnoDetError::Lifecycle {
            expected: "model-created",
            actual: self.state.stage().name(),
        })?;
        let loaders = self.loaders.as_ref().ok_or(AnoDetError::Lifecycle {
            expected: "train-setup",
            actual: self.state.stage().name(),
        })?;

        let mut optimizer = AdamW::new(
            fit_params.lr,
            (fit_params.b1, fit_params.b2),
            fit_params.weight_decay,
        );
        let mut scheduler = CyclicLr::for_epochs(fit_params.lr, fit_params.epochs);
        let options = FitOptions {
            epochs: fit_params.epochs,
            flooding_b: (fit_params.flooding_b > 0.0).then_some(fit_params.flooding_b),
            show_progress: fit_params.show_progress,
        };

        let mut best_checkpoint: Option<PathBuf> = None;
        let result = fit(
            model,
            &mut optimizer,
            &mut scheduler,
            loaders,
            &options,
            |stats, weights| {
                let path = weights_dir.join(checkpoint_name(&target, stats.epoch, stats.val_loss));
                save_checkpoint(&path, weights)?;
                tracing::debug!("Saved checkpoint {}", path.display());
                best_checkpoint = Some(path);
                Ok(())
            },
        )?;

        // Reload exactly what this run wrote; older runs may share file names
        match best_checkpoint {
            Some(path) => self.load_checkpoint_file(&path)?,
            None => {
                self.load_saved_checkpoint()?;
            }
        }
        self.state.set_stage(LifecycleStage::Trained);
        Ok(result)
    }

    fn setup_runtime(&mut self, ref_samples: &[Self::Sample]) -> Result<()> {
        self.state.require(
            &[
                LifecycleStage::ModelCreated,
                LifecycleStage::Trained,
                LifecycleStage::RuntimeSetup,
            ],
            "model-created or trained",
        )?;
        self.model_ref()?;
        self.state.set_stage(LifecycleStage::RuntimeSetup);
        // Stays in RuntimeSetup if a reference sample cannot be transformed
        for sample in ref_samples {
            for tfm in 0..self.params.n_class {
                self.checked_features(sample, tfm)?;
            }
        }
        tracing::info!("Runtime ready ({} reference samples)", ref_samples.len());
        self.state.set_stage(LifecycleStage::Ready);
        Ok(())
    }

    fn save_model(&self, path: &Path) -> Result<PathBuf> {
        let model = self.model_ref()?;
        save_checkpoint(path, &model.state_dict())?;
        tracing::info!("Saved model to {}", path.display());
        Ok(path.to_path_buf())
    }

    fn predict(
        &self,
        samples: &[Self::Sample],
        labels: Option<&[String]>,
        return_raw: bool,
    ) -> Result<Scores> {
        self.state.require(&[LifecycleStage::Ready], "ready")?;
        if let Some(labels) = labels {
            if labels.len() != samples.len() {
                return Err(AnoDetError::InvalidInput(format!(
                    "{} labels for {} samples",
                    labels.len(),
                    samples.len()
                )));
            }
        }
        let model = self.model_ref()?;

        let mut diagonals = Vec::with_capacity(samples.len());
        for sample in samples {
            let rows = (0..self.params.n_class)
                .map(|tfm| self.checked_features(sample, tfm))
                .collect::<Result<Vec<_>>>()?;
            let probs = model.predict_proba(&rows);
            diagonals.extend(diagonal_blocks(&probs, self.params.n_class)?);
        }

        let n_class = self.params.n_class as f64;
        let scores: Vec<f64> = diagonals
            .iter()
            .map(|diag| abnormality(diag.iter().sum::<f64>() / n_class))
            .collect();
        tracing::debug!("Scored {} samples", scores.len());

        Ok(Scores {
            scores,
            raw: return_raw.then_some(diagonals),
        })
    }
}
