//! Calibrate command - thresholds from labelled scores

use anodet::calibrate::{calibrate, ThresholdPolicy};
use anodet::config::{CalibrationParams, DetectorParams, CONFIG_FILENAME};
use anyhow::{Context, Result};
use console::style;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLabel {
    Bool(bool),
    Number(f64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct ScoreRecord {
    score: f64,
    label: RawLabel,
}

fn parse_label(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "1" | "true" | "anomaly" | "abnormal" => Some(true),
        "0" | "false" | "normal" => Some(false),
        _ => None,
    }
}

impl RawLabel {
    fn to_bool(&self) -> Option<bool> {
        match self {
            RawLabel::Bool(b) => Some(*b),
            RawLabel::Number(n) if *n == 1.0 => Some(true),
            RawLabel::Number(n) if *n == 0.0 => Some(false),
            RawLabel::Number(_) => None,
            RawLabel::Text(s) => parse_label(s),
        }
    }
}

/// Parse `score,label` lines; a non-numeric first line is a header.
fn parse_csv(content: &str) -> Result<(Vec<f64>, Vec<bool>)> {
    let mut scores = Vec::new();
    let mut labels = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split(',').map(str::trim);
        let (Some(score), Some(label)) = (fields.next(), fields.next()) else {
            anyhow::bail!("line {}: expected `score,label`", lineno + 1);
        };
        let score: f64 = match score.parse() {
            Ok(s) => s,
            Err(_) if lineno == 0 => continue,
            Err(_) => anyhow::bail!("line {}: invalid score '{}'", lineno + 1, score),
        };
        let label = parse_label(label)
            .with_context(|| format!("line {}: invalid label '{}'", lineno + 1, label))?;
        scores.push(score);
        labels.push(label);
    }
    Ok((scores, labels))
}

fn parse_json(content: &str) -> Result<(Vec<f64>, Vec<bool>)> {
    let records: Vec<ScoreRecord> =
        serde_json::from_str(content).context("Expected a JSON array of {score, label}")?;
    let mut scores = Vec::with_capacity(records.len());
    let mut labels = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        let label = record
            .label
            .to_bool()
            .with_context(|| format!("record {i}: invalid label {:?}", record.label))?;
        scores.push(record.score);
        labels.push(label);
    }
    Ok((scores, labels))
}

fn load_scores(input: &Path) -> Result<(Vec<f64>, Vec<bool>)> {
    let content = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let is_json = input
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        parse_json(&content)
    } else {
        parse_csv(&content)
    }
}

/// Run the calibrate command
pub fn run(
    project: &Path,
    input: &Path,
    config: Option<&Path>,
    policy: &str,
    write: bool,
    format: &str,
) -> Result<()> {
    let policy: ThresholdPolicy = policy.parse()?;
    let config_path: PathBuf = config
        .map(Path::to_path_buf)
        .unwrap_or_else(|| project.join(CONFIG_FILENAME));
    let mut params = if config_path.exists() {
        DetectorParams::load(&config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?
    } else {
        tracing::info!(
            "{} not found, using recommended calibration settings",
            config_path.display()
        );
        DetectorParams {
            calibration: CalibrationParams::recommended(),
            ..Default::default()
        }
    };

    let (scores, labels) = load_scores(input)?;
    tracing::info!("Loaded {} scored samples from {}", scores.len(), input.display());

    let calibration = calibrate(&scores, &labels, &params.calibration)
        .context("Calibration failed")?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&calibration)?);
    } else {
        println!("\n{} Calibrated {} samples\n", style("✓").green(), scores.len());
        println!("{}", calibration.report());
        println!();
        print!("{} {:.4}", style("AUC:").bold(), calibration.auc);
        if let Some(pauc) = calibration.partial_auc {
            print!(
                "   {} {:.4}",
                style(format!("pAUC@{}:", calibration.max_fpr)).bold(),
                pauc
            );
        }
        println!();
    }

    if write {
        params.apply_calibration(&calibration, policy);
        params
            .store_calibration(&config_path)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        if format != "json" {
            println!(
                "\n{} Stored {} threshold in {}",
                style("✓").green(),
                style(policy).cyan(),
                style(config_path.display()).cyan()
            );
        }
    }
    Ok(())
}
