use serde::{Deserialize, Serialize};

use crate::dataset::EvalSet;
use crate::error::{PtqError, Result};

pub const INPUT_SIZE: usize = 784;
pub const HIDDEN_SIZE: usize = 32;
pub const OUTPUT_SIZE: usize = 10;

/// Pixel values reach the float network divided by this.
pub const PIXEL_MAX: f64 = 255.0;

/// Widest layer-1 fan-in whose worst-case MAC (`127 * 255` per term) fits in an i32.
pub const MAX_INPUT_DIM: usize = i32::MAX as usize / (127 * 255);
/// Same bound for layer 2, where both operands are int8 (`127 * 127` per term).
pub const MAX_HIDDEN_DIM: usize = i32::MAX as usize / (127 * 127);
/// Labels are bytes.
pub const MAX_OUTPUT_DIM: usize = u8::MAX as usize + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMeta {
    pub input_dim: usize,
    pub hidden_dim: usize,
    pub output_dim: usize,
}

impl ModelMeta {
    pub fn mnist() -> Self {
        Self { input_dim: INPUT_SIZE, hidden_dim: HIDDEN_SIZE, output_dim: OUTPUT_SIZE }
    }

    /// Rejects fan-ins the i32 accumulators cannot hold.
    pub fn validate(&self) -> Result<()> {
        if self.input_dim > MAX_INPUT_DIM {
            return Err(PtqError::DimensionTooLarge { what: "input_dim", dim: self.input_dim, max: MAX_INPUT_DIM });
        }
        if self.hidden_dim > MAX_HIDDEN_DIM {
            return Err(PtqError::DimensionTooLarge { what: "hidden_dim", dim: self.hidden_dim, max: MAX_HIDDEN_DIM });
        }
        if self.output_dim > MAX_OUTPUT_DIM {
            return Err(PtqError::DimensionTooLarge { what: "output_dim", dim: self.output_dim, max: MAX_OUTPUT_DIM });
        }
        Ok(())
    }
}

/// Trained dense-relu / dense-argmax classifier. Weight matrices are output-major:
/// `w1[r * input_dim + c]` connects input `c` to hidden unit `r`.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatModel {
    pub meta: ModelMeta,
    pub w1: Vec<f32>, // hidden x input
    pub b1: Vec<f32>, // hidden
    pub w2: Vec<f32>, // output x hidden
    pub b2: Vec<f32>, // output
}

impl FloatModel {
    pub fn new(meta: ModelMeta, w1: Vec<f32>, b1: Vec<f32>, w2: Vec<f32>, b2: Vec<f32>) -> Result<Self> {
        let model = Self { meta, w1, b1, w2, b2 };
        model.validate()?;
        Ok(model)
    }

    /// Build from Dense-kernel layout, where kernels are `[in][out]`.
    pub fn from_input_major(meta: ModelMeta, k1: &[f32], b1: Vec<f32>, k2: &[f32], b2: Vec<f32>) -> Result<Self> {
        meta.validate()?;
        let w1 = transpose(k1, meta.input_dim, meta.hidden_dim, "w1")?;
        let w2 = transpose(k2, meta.hidden_dim, meta.output_dim, "w2")?;
        Self::new(meta, w1, b1, w2, b2)
    }

    pub fn validate(&self) -> Result<()> {
        let m = &self.meta;
        m.validate()?;
        check_len("w1", m.hidden_dim * m.input_dim, self.w1.len())?;
        check_len("b1", m.hidden_dim, self.b1.len())?;
        check_len("w2", m.output_dim * m.hidden_dim, self.w2.len())?;
        check_len("b2", m.output_dim, self.b2.len())?;
        for (name, v) in [("w1", &self.w1), ("b1", &self.b1), ("w2", &self.w2), ("b2", &self.b2)] {
            if v.iter().any(|x| !x.is_finite()) {
                return Err(PtqError::NonFinite(name));
            }
        }
        Ok(())
    }

    /// Float hidden activations for raw 0..255 pixels.
    pub fn hidden(&self, pixels: &[u8]) -> Vec<f64> {
        let n = self.meta.input_dim;
        (0..self.meta.hidden_dim)
            .map(|r| {
                let row = &self.w1[r * n..(r + 1) * n];
                let mut sum = self.b1[r] as f64;
                for c in 0..n { sum += row[c] as f64 * (pixels[c] as f64 / PIXEL_MAX); }
                sum.max(0.0)
            })
            .collect()
    }

    pub fn logits(&self, pixels: &[u8]) -> Vec<f64> {
        let h = self.hidden(pixels);
        let hd = self.meta.hidden_dim;
        (0..self.meta.output_dim)
            .map(|o| {
                let row = &self.w2[o * hd..(o + 1) * hd];
                self.b2[o] as f64 + row.iter().zip(&h).map(|(&w, &x)| w as f64 * x).sum::<f64>()
            })
            .collect()
    }

    pub fn predict(&self, pixels: &[u8]) -> usize {
        let out = self.logits(pixels);
        let mut best = 0;
        for o in 1..out.len() {
            if out[o] > out[best] { best = o; }
        }
        best
    }

    /// Reference accuracy of the float network in percent.
    pub fn accuracy(&self, eval: &EvalSet) -> f64 {
        if eval.is_empty() { return 0.0; }
        let correct = eval.iter().filter(|s| self.predict(&s.pixels) == s.label as usize).count();
        correct as f64 * 100.0 / eval.len() as f64
    }
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(PtqError::ShapeMismatch { what, expected, actual });
    }
    Ok(())
}

fn transpose(k: &[f32], rows: usize, cols: usize, what: &'static str) -> Result<Vec<f32>> {
    check_len(what, rows * cols, k.len())?;
    let mut out = vec![0f32; rows * cols];
    for i in 0..rows {
        for j in 0..cols { out[j * rows + i] = k[i * cols + j]; }
    }
    Ok(out)
}
