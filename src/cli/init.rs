//! Init command - write an example config

use anodet::config::{DetectorParams, CONFIG_FILENAME};
use anyhow::{Context, Result};
use console::style;
use std::path::Path;

/// Run the init command
pub fn run(path: &Path, force: bool) -> Result<()> {
    let project_path = path
        .canonicalize()
        .with_context(|| format!("Path does not exist: {}", path.display()))?;

    if !project_path.is_dir() {
        anyhow::bail!("Path is not a directory: {}", project_path.display());
    }

    let config_path = project_path.join(CONFIG_FILENAME);
    if config_path.exists() && !force {
        println!(
            "{} Already initialized at {} (use --force to overwrite)",
            style("✓").green(),
            style(config_path.display()).cyan()
        );
        return Ok(());
    }

    std::fs::write(&config_path, DetectorParams::example_toml())
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    println!(
        "{} Created {}",
        style("✓").green(),
        style(config_path.display()).cyan()
    );
    println!(
        "\nNext: {}",
        style("anodet calibrate --input scores.csv").bold()
    );
    Ok(())
}
