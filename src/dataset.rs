use serde::{Deserialize, Serialize};

use crate::error::{PtqError, Result};

/// One labelled image with raw 0..255 pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalSample {
    pub pixels: Vec<u8>,
    pub label: u8,
}

/// Ordered evaluation data. Calibration reads fixed-length prefixes of it,
/// final accuracy reads all of it.
#[derive(Debug, Clone, Default)]
pub struct EvalSet {
    samples: Vec<EvalSample>,
}

impl EvalSet {
    pub fn new(samples: Vec<EvalSample>, input_dim: usize) -> Result<Self> {
        if let Some(bad) = samples.iter().find(|s| s.pixels.len() != input_dim) {
            return Err(PtqError::ShapeMismatch { what: "sample pixels", expected: input_dim, actual: bad.pixels.len() });
        }
        Ok(Self { samples })
    }

    pub fn len(&self) -> usize { self.samples.len() }

    pub fn is_empty(&self) -> bool { self.samples.is_empty() }

    pub fn samples(&self) -> &[EvalSample] { &self.samples }

    pub fn iter(&self) -> std::slice::Iter<'_, EvalSample> { self.samples.iter() }

    /// First `n` samples. Never wraps around: a short set is an error.
    pub fn prefix(&self, n: usize) -> Result<&[EvalSample]> {
        if self.samples.is_empty() { return Err(PtqError::EmptyEvalSet); }
        if n > self.samples.len() {
            return Err(PtqError::EvalSetTooSmall { required: n, actual: self.samples.len() });
        }
        Ok(&self.samples[..n])
    }

    /// Index of the first sample carrying `label`.
    pub fn first_of_label(&self, label: u8) -> Option<usize> {
        self.samples.iter().position(|s| s.label == label)
    }
}
