//! Checkpoint naming, discovery and (de)serialization
//!
//! Checkpoints are JSON files holding either a bare state dict or an object
//! with a `state_dict` key. Keys saved from a wrapping module may carry a
//! `model.` prefix, which is stripped on load.

use crate::error::{AnoDetError, Result};
use crate::model::StateDict;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const CHECKPOINT_EXT: &str = "ckpt";

const MODEL_PREFIX: &str = "model.";

/// File name for the checkpoint written after an improving epoch
pub fn checkpoint_name(test_target: &str, epoch: usize, val_loss: f64) -> String {
    format!("{}{epoch}-{val_loss:.2}.{CHECKPOINT_EXT}", checkpoint_prefix(test_target))
}

/// Common prefix of every checkpoint for `test_target`, up to the epoch
pub fn checkpoint_prefix(test_target: &str) -> String {
    format!("weights-{test_target}-")
}

/// `weights-{target}-*.ckpt`
fn is_checkpoint_for(path: &Path, prefix: &str) -> bool {
    let has_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e == CHECKPOINT_EXT);
    has_ext
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(prefix))
}

/// A candidate checkpoint file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointEntry {
    pub path: PathBuf,
    /// Last content change; rewriting a file under the same name moves it
    pub modified: SystemTime,
}

/// Enumerates files in a checkpoint directory
pub trait CheckpointLister {
    fn list(&self, dir: &Path) -> Result<Vec<CheckpointEntry>>;
}

/// Lists the real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLister;

impl CheckpointLister for FsLister {
    fn list(&self, dir: &Path) -> Result<Vec<CheckpointEntry>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            entries.push(CheckpointEntry {
                path: entry.path(),
                modified: metadata.modified()?,
            });
        }
        Ok(entries)
    }
}

/// Most recently written `{prefix}*.ckpt` in `dir`.
///
/// Ties keep the first entry the lister returned.
pub fn latest_checkpoint(
    lister: &dyn CheckpointLister,
    dir: &Path,
    prefix: &str,
) -> Result<PathBuf> {
    lister
        .list(dir)?
        .into_iter()
        .filter(|e| is_checkpoint_for(&e.path, prefix))
        .reduce(|best, e| if e.modified > best.modified { e } else { best })
        .map(|e| e.path)
        .ok_or_else(|| {
            AnoDetError::model_load(
                dir,
                format!("no checkpoint matching {prefix}*.{CHECKPOINT_EXT}"),
            )
        })
}

/// Unwrap `{"state_dict": {...}}` wrappers; bare dicts pass through.
pub fn unwrap_state_dict(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("state_dict") => {
            map.remove("state_dict").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Remove a leading `model.` from every key
pub fn strip_model_prefix(weights: StateDict) -> StateDict {
    weights
        .into_iter()
        .map(|(k, v)| match k.strip_prefix(MODEL_PREFIX) {
            Some(stripped) => (stripped.to_string(), v),
            None => (k, v),
        })
        .collect()
}

/// Write weights as a `{"state_dict": ...}` JSON document.
pub fn save_checkpoint(path: &Path, weights: &StateDict) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let doc = serde_json::json!({ "state_dict": weights });
    std::fs::write(path, serde_json::to_vec(&doc)?)?;
    Ok(())
}

/// Read a checkpoint in either layout and normalize its keys.
pub fn load_checkpoint(path: &Path) -> Result<StateDict> {
    let content = std::fs::read(path)
        .map_err(|e| AnoDetError::model_load(path, e.to_string()))?;
    let value: Value = serde_json::from_slice(&content)
        .map_err(|e| AnoDetError::model_load(path, e.to_string()))?;
    let weights: StateDict = serde_json::from_value(unwrap_state_dict(value))
        .map_err(|e| AnoDetError::model_load(path, e.to_string()))?;
    Ok(strip_model_prefix(weights))
}
