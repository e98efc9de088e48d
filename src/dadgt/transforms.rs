//! Geometric transform label sets
//!
//! Each set enumerates the product flip × rotation × translation in a
//! fixed order; the index into that product is the class label the
//! classifier learns to predict.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rotations, counter-clockwise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rotation {
    None,
    Rot90,
    Rot180,
    Rot270,
}

impl Rotation {
    const ALL: [Rotation; 4] = [Self::None, Self::Rot90, Self::Rot180, Self::Rot270];

    pub fn degrees(&self) -> u16 {
        match self {
            Self::None => 0,
            Self::Rot90 => 90,
            Self::Rot180 => 180,
            Self::Rot270 => 270,
        }
    }
}

/// Translation offsets as a fraction of the image size
const TRANSLATIONS: [Option<(f32, f32)>; 5] = [
    None,
    Some((0.1, 0.0)),
    Some((-0.1, 0.0)),
    Some((0.0, 0.1)),
    Some((0.0, -0.1)),
];

/// One geometric transform, applied flip first, then rotation, then
/// translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// Mirror left-right
    pub flip: bool,
    pub rotation: Rotation,
    /// `(dx, dy)` as a fraction of width/height
    pub translate: Option<(f32, f32)>,
}

impl GeoTransform {
    pub fn is_identity(&self) -> bool {
        !self.flip && self.rotation == Rotation::None && self.translate.is_none()
    }
}

impl fmt::Display for GeoTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_identity() {
            return f.write_str("identity");
        }
        let mut parts = Vec::new();
        if self.flip {
            parts.push("flip".to_string());
        }
        if self.rotation != Rotation::None {
            parts.push(format!("rot{}", self.rotation.degrees()));
        }
        if let Some((dx, dy)) = self.translate {
            parts.push(format!("shift({dx:+},{dy:+})"));
        }
        f.write_str(&parts.join("+"))
    }
}

/// Which transform product a detector classifies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeoTransformSet {
    /// 2 flips × 4 rotations × 5 translations
    Full40,
    /// 4 rotations
    Rot4,
    /// 4 rotations × 5 translations
    Rot20,
}

impl GeoTransformSet {
    /// The set whose size matches `n_class`, if any
    pub fn from_n_class(n_class: usize) -> Option<Self> {
        match n_class {
            40 => Some(Self::Full40),
            4 => Some(Self::Rot4),
            20 => Some(Self::Rot20),
            _ => None,
        }
    }

    pub fn n_tfm(&self) -> usize {
        match self {
            Self::Full40 => 40,
            Self::Rot4 => 4,
            Self::Rot20 => 20,
        }
    }

    /// Class labels `0..n_tfm`
    pub fn classes(&self) -> Vec<usize> {
        (0..self.n_tfm()).collect()
    }

    /// Transform for class `index`; `None` when out of range.
    pub fn transform(&self, index: usize) -> Option<GeoTransform> {
        if index >= self.n_tfm() {
            return None;
        }
        let (flip, rot, shift) = match self {
            Self::Full40 => (index / 20 == 1, (index / 5) % 4, index % 5),
            Self::Rot4 => (false, index, 0),
            Self::Rot20 => (false, index / 5, index % 5),
        };
        Some(GeoTransform {
            flip,
            rotation: Rotation::ALL[rot],
            translate: TRANSLATIONS[shift],
        })
    }
}

/// Produces classifier features for a sample under each transform.
///
/// Implementations own the actual pixel work; the detector only needs
/// one feature vector per `(sample, transform index)`.
pub trait TransformSource {
    type Sample;

    /// Number of transform classes; must equal the detector's `n_class`
    fn n_transforms(&self) -> usize;

    /// Length of every feature vector
    fn feature_len(&self) -> usize;

    fn features(&self, sample: &Self::Sample, tfm: usize) -> Result<Vec<f32>>;
}
