//! CLI command definitions and handlers

mod calibrate;
mod checkpoint;
mod init;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// anodet - anomaly score calibration and checkpoint tooling
#[derive(Parser, Debug)]
#[command(name = "anodet")]
#[command(
    version,
    about = "Calibrate anomaly-detector scores into normalized decision thresholds",
    after_help = "\
Examples:
  anodet init                                   Write an example anodet.toml
  anodet calibrate --input scores.csv           Print thresholds for all policies
  anodet calibrate --input scores.json --policy tpr --write
  anodet checkpoint --dir weights --target cat  Show the newest checkpoint"
)]
pub struct Cli {
    /// Project directory holding anodet.toml
    #[arg(long, global = true, default_value = ".")]
    pub path: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn", value_parser = ["error", "warn", "info", "debug", "trace"])]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write an example anodet.toml into the project directory
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Calibrate thresholds from labelled scores
    #[command(after_help = "\
Input formats:
  CSV   one `score,label` pair per line, optional header
  JSON  [{\"score\": 0.12, \"label\": false}, ...]

Labels: 1/true/anomaly mark anomalies, 0/false/normal mark normal samples.")]
    Calibrate {
        /// Scores file (.csv or .json)
        #[arg(long, short = 'i')]
        input: PathBuf,

        /// Config file (default: <path>/anodet.toml)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Threshold policy to persist with --write
        #[arg(long, default_value = "tpr", value_parser = ["sigma", "fpr", "tpr"])]
        policy: String,

        /// Store distance_norm_factor and distance_threshold in the config
        #[arg(long)]
        write: bool,

        /// Output format: text, json
        #[arg(long, short = 'f', default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },

    /// Print the newest checkpoint for a test target
    Checkpoint {
        /// Weights directory
        #[arg(long)]
        dir: PathBuf,

        /// Test target the checkpoints were written for
        #[arg(long, default_value = "all")]
        target: String,
    },
}

/// Run the CLI with parsed arguments
pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { force } => init::run(&cli.path, force),

        Commands::Calibrate {
            input,
            config,
            policy,
            write,
            format,
        } => calibrate::run(
            &cli.path,
            &input,
            config.as_deref(),
            &policy,
            write,
            &format,
        ),

        Commands::Checkpoint { dir, target } => checkpoint::run(&dir, &target),
    }
}
