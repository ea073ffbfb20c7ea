//! Symmetric per-tensor int8 weight quantization and layer-1 bias conversion.
//!
//! No zero-point: pixels and post-ReLU activations are non-negative and are fed to the
//! MACs as-is, so a symmetric scale keeps both matrix products free of offset terms.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{PtqError, Result};
use crate::model::{FloatModel, ModelMeta, PIXEL_MAX};

/// Largest magnitude of a quantized weight and of a requantized hidden activation.
pub const QMAX: i32 = 127;

/// How many values needed clipping to fit their integer range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipStats {
    pub w1: usize,
    pub w2: usize,
    pub b1: usize,
    pub b2: usize,
    /// Hidden activations saturated at `QMAX` during the final full-set pass.
    pub hidden: u64,
}

impl ClipStats {
    pub fn any(&self) -> bool {
        self.w1 + self.w2 + self.b1 + self.b2 > 0 || self.hidden > 0
    }
}

/// Int8 weight matrices (output-major, like `FloatModel`) with their float scales.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedWeights {
    pub meta: ModelMeta,
    pub w1: Vec<i8>, // hidden x input
    pub w2: Vec<i8>, // output x hidden
    pub s_w1: f64,
    pub s_w2: f64,
}

impl QuantizedWeights {
    #[inline]
    pub fn w1_row(&self, r: usize) -> &[i8] {
        let n = self.meta.input_dim;
        &self.w1[r * n..(r + 1) * n]
    }

    #[inline]
    pub fn w2_row(&self, o: usize) -> &[i8] {
        let n = self.meta.hidden_dim;
        &self.w2[o * n..(o + 1) * n]
    }
}

/// Output of [`WeightQuantizer::quantize`].
#[derive(Debug, Clone, PartialEq)]
pub struct WeightQuantization {
    pub weights: QuantizedWeights,
    /// Layer-1 bias in raw accumulator units.
    pub b1: Vec<i32>,
    pub clips: ClipStats,
}

pub struct WeightQuantizer;

impl WeightQuantizer {
    pub fn quantize(&self, model: &FloatModel) -> Result<WeightQuantization> {
        model.validate()?;
        let s_w1 = layer_scale(&model.w1, "w1")?;
        let s_w2 = layer_scale(&model.w2, "w2")?;
        let (w1, w1_clipped) = quantize_layer(&model.w1, s_w1);
        let (w2, w2_clipped) = quantize_layer(&model.w2, s_w2);
        let (b1, b1_clipped) = layer1_bias(&model.b1, s_w1);
        info!("S_w1={:.8} S_w2={:.8}", s_w1, s_w2);
        if let (Some(lo), Some(hi)) = (b1.iter().min(), b1.iter().max()) {
            info!("B1 range: [{}, {}]", lo, hi);
        }
        let clips = ClipStats { w1: w1_clipped, w2: w2_clipped, b1: b1_clipped, ..ClipStats::default() };
        if clips.any() {
            warn!("clipped during weight quantization: w1={} w2={} b1={}", clips.w1, clips.w2, clips.b1);
        }
        Ok(WeightQuantization {
            weights: QuantizedWeights { meta: model.meta, w1, w2, s_w1, s_w2 },
            b1,
            clips,
        })
    }
}

/// `max(|w|) / 127`; an all-zero layer has no usable scale.
pub fn layer_scale(w: &[f32], layer: &'static str) -> Result<f64> {
    let max_abs = w.iter().fold(0f64, |m, &x| m.max((x as f64).abs()));
    if max_abs == 0.0 {
        return Err(PtqError::DegenerateScale { layer });
    }
    Ok(max_abs / QMAX as f64)
}

/// `clip(round(w / scale), -127, 127)`; the flag reports whether clipping kicked in.
/// The quotient is taken in f32, the precision of the weights themselves.
#[inline]
pub fn quantize_value(w: f32, scale: f64) -> (i8, bool) {
    let q = (w / scale as f32).round_ties_even();
    let max = QMAX as f32;
    (q.clamp(-max, max) as i8, q.abs() > max)
}

#[inline]
pub fn dequantize_value(q: i8, scale: f64) -> f64 { q as f64 * scale }

pub fn quantize_layer(w: &[f32], scale: f64) -> (Vec<i8>, usize) {
    let mut clipped = 0usize;
    let q = w
        .iter()
        .map(|&x| {
            let (v, c) = quantize_value(x, scale);
            clipped += c as usize;
            v
        })
        .collect();
    (q, clipped)
}

/// Round to nearest (ties to even) and saturate into i32.
#[inline]
pub fn round_to_i32(v: f64) -> (i32, bool) {
    let r = v.round_ties_even();
    let (lo, hi) = (i32::MIN as f64, i32::MAX as f64);
    (r.clamp(lo, hi) as i32, r < lo || r > hi)
}

/// `B1[r] = round(b1[r] * 255 / S_w1)`. The integer MAC runs on raw 0..255 pixels while the
/// float model saw `pixel / 255`, so the accumulator unit is `S_w1 / 255`.
pub fn layer1_bias(b1: &[f32], s_w1: f64) -> (Vec<i32>, usize) {
    let mut clipped = 0usize;
    let out = b1
        .iter()
        .map(|&b| {
            let (v, c) = round_to_i32(b as f64 * PIXEL_MAX / s_w1);
            clipped += c as usize;
            v
        })
        .collect();
    (out, clipped)
}
