//! Configuration module for anodet
//!
//! This module handles:
//! - Detector parameters (anodet.toml)
//! - Calibration policy bounds
//! - Fit-loop settings

mod params;

pub use params::{CalibrationParams, DetectorParams, FitParams, CONFIG_FILENAME};
