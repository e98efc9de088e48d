//! anodet - anomaly detection by geometric-transform classification
//!
//! The core is score calibration: turning raw anomaly scores and labels
//! into a normalization factor and three normalized decision thresholds
//! ([`calibrate`]). Around it sit the detector lifecycle contract
//! ([`detector::AnoDetector`]), a training loop ([`train`]), a small MLP
//! backend ([`model`]) and the transform-classification detector
//! ([`dadgt::Dadgt`]).

pub mod calibrate;
pub mod config;
pub mod dadgt;
pub mod detector;
pub mod error;
pub mod model;
pub mod roc;
pub mod train;

pub use error::{AnoDetError, Result};
