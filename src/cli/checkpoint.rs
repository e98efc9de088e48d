//! Checkpoint command - locate the newest checkpoint for a target

use anodet::detector::checkpoint::{checkpoint_prefix, latest_checkpoint, FsLister};
use anyhow::{Context, Result};
use std::path::Path;

pub fn run(dir: &Path, target: &str) -> Result<()> {
    let path = latest_checkpoint(&FsLister, dir, &checkpoint_prefix(target))
        .with_context(|| format!("No checkpoint for target '{target}' in {}", dir.display()))?;
    println!("{}", path.display());
    Ok(())
}
