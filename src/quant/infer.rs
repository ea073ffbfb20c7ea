//! Integer-only inference. Calibration and final evaluation both go through these
//! functions, so the divisor search measures exactly what runs on the device:
//!
//! ```text
//! acc1[r]   = sum_c W1_q[r,c] * pixel[c] + B1[r]
//! hidden[r] = clip(max(acc1[r], 0) / H_DIV, 0, 127)      (floor division)
//! acc2[o]   = sum_h W2_q[o,h] * hidden[h] + B2[o]
//! pred      = argmax_o acc2[o]                           (lowest index on ties)
//! ```

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::dataset::EvalSample;
use crate::error::{PtqError, Result};
use crate::quant::kernels::{argmax_i32, dot_i8_i8, dot_i8_u8};
use crate::quant::weights::{QuantizedWeights, QMAX};

/// Hidden divisor together with the layer-2 bias derived for it. The two only make
/// sense as a pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputStage {
    pub h_div: u32,
    pub b2: Vec<i32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accuracy {
    pub correct: usize,
    pub total: usize,
    /// Hidden activations that hit the 127 ceiling over the pass.
    pub saturated: u64,
}

impl Accuracy {
    pub fn percent(&self) -> f64 {
        if self.total == 0 { 0.0 } else { self.correct as f64 * 100.0 / self.total as f64 }
    }

    /// Strictly higher hit rate than `other`, compared as exact fractions so slices of
    /// different lengths can be ranked against each other.
    pub fn beats(&self, other: &Accuracy) -> bool {
        if self.total == 0 { return false; }
        if other.total == 0 { return self.correct > 0; }
        (self.correct as u128) * (other.total as u128) > (other.correct as u128) * (self.total as u128)
    }

    fn merge(self, other: Self) -> Self {
        Self {
            correct: self.correct + other.correct,
            total: self.total + other.total,
            saturated: self.saturated + other.saturated,
        }
    }
}

/// Every intermediate of one integer inference, for inspection and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTrace {
    pub relu1: Vec<i32>,
    pub hidden: Vec<i8>,
    pub logits: Vec<i32>,
    pub prediction: usize,
}

/// Layer 1 of the quantized network: weights plus the divisor-independent bias.
#[derive(Debug, Clone, Copy)]
pub struct IntegerNetwork<'a> {
    pub weights: &'a QuantizedWeights,
    pub b1: &'a [i32],
}

impl<'a> IntegerNetwork<'a> {
    pub fn new(weights: &'a QuantizedWeights, b1: &'a [i32]) -> Result<Self> {
        let m = weights.meta;
        m.validate()?;
        if weights.w1.len() != m.hidden_dim * m.input_dim {
            return Err(PtqError::ShapeMismatch { what: "w1_q", expected: m.hidden_dim * m.input_dim, actual: weights.w1.len() });
        }
        if weights.w2.len() != m.output_dim * m.hidden_dim {
            return Err(PtqError::ShapeMismatch { what: "w2_q", expected: m.output_dim * m.hidden_dim, actual: weights.w2.len() });
        }
        if b1.len() != m.hidden_dim {
            return Err(PtqError::ShapeMismatch { what: "B1", expected: m.hidden_dim, actual: b1.len() });
        }
        Ok(Self { weights, b1 })
    }

    /// Post-ReLU layer-1 accumulators, before any requantization.
    pub fn relu1_into(&self, pixels: &[u8], out: &mut [i32]) {
        for (r, slot) in out.iter_mut().enumerate() {
            let acc = dot_i8_u8(self.weights.w1_row(r), pixels).saturating_add(self.b1[r]);
            *slot = acc.max(0);
        }
    }

    pub fn relu1(&self, pixels: &[u8]) -> Vec<i32> {
        let mut out = vec![0i32; self.weights.meta.hidden_dim];
        self.relu1_into(pixels, &mut out);
        out
    }

    pub fn forward(&self, pixels: &[u8], stage: &OutputStage) -> ForwardTrace {
        let m = self.weights.meta;
        let relu1 = self.relu1(pixels);
        let mut hidden = vec![0i8; m.hidden_dim];
        requantize_into(&relu1, stage.h_div, &mut hidden);
        let mut logits = vec![0i32; m.output_dim];
        layer2_into(self.weights, &hidden, &stage.b2, &mut logits);
        let prediction = argmax_i32(&logits);
        ForwardTrace { relu1, hidden, logits, prediction }
    }

    pub fn predict(&self, pixels: &[u8], stage: &OutputStage) -> usize {
        self.forward(pixels, stage).prediction
    }

    /// Accuracy of the full integer path over `samples`.
    pub fn accuracy(&self, samples: &[EvalSample], stage: &OutputStage) -> Accuracy {
        let m = self.weights.meta;
        samples
            .par_iter()
            .map_init(
                || Scratch::new(m.hidden_dim, m.output_dim),
                |s, sample| {
                    self.relu1_into(&sample.pixels, &mut s.relu1);
                    s.score(self.weights, stage, sample.label)
                },
            )
            .reduce(Accuracy::default, Accuracy::merge)
    }
}

/// Accuracy from precomputed layer-1 activations. Layer 1 does not depend on the
/// divisor, so the search computes it once per sample and replays the rest.
pub fn accuracy_from_relu1(weights: &QuantizedWeights, relu1: &[Vec<i32>], labels: &[u8], stage: &OutputStage) -> Accuracy {
    let m = weights.meta;
    relu1
        .par_iter()
        .zip(labels.par_iter())
        .map_init(
            || Scratch::new(m.hidden_dim, m.output_dim),
            |s, (acts, &label)| {
                s.relu1.copy_from_slice(acts);
                s.score(weights, stage, label)
            },
        )
        .reduce(Accuracy::default, Accuracy::merge)
}

/// `clip(v / h_div, 0, 127)` with floor division; the flag marks saturation.
#[inline]
pub fn requantize(v: i32, h_div: u32) -> (i8, bool) {
    let q = v.max(0) as i64 / h_div.max(1) as i64;
    (q.min(QMAX as i64) as i8, q > QMAX as i64)
}

/// Returns how many activations saturated.
pub fn requantize_into(relu1: &[i32], h_div: u32, out: &mut [i8]) -> u64 {
    let mut saturated = 0u64;
    for (dst, &v) in out.iter_mut().zip(relu1) {
        let (q, sat) = requantize(v, h_div);
        *dst = q;
        saturated += sat as u64;
    }
    saturated
}

pub fn layer2_into(weights: &QuantizedWeights, hidden: &[i8], b2: &[i32], out: &mut [i32]) {
    for (o, slot) in out.iter_mut().enumerate() {
        *slot = dot_i8_i8(weights.w2_row(o), hidden).saturating_add(b2[o]);
    }
}

struct Scratch {
    relu1: Vec<i32>,
    hidden: Vec<i8>,
    logits: Vec<i32>,
}

impl Scratch {
    fn new(hidden_dim: usize, output_dim: usize) -> Self {
        Self { relu1: vec![0; hidden_dim], hidden: vec![0; hidden_dim], logits: vec![0; output_dim] }
    }

    fn score(&mut self, weights: &QuantizedWeights, stage: &OutputStage, label: u8) -> Accuracy {
        let saturated = requantize_into(&self.relu1, stage.h_div, &mut self.hidden);
        layer2_into(weights, &self.hidden, &stage.b2, &mut self.logits);
        let correct = (argmax_i32(&self.logits) == label as usize) as usize;
        Accuracy { correct, total: 1, saturated }
    }
}
