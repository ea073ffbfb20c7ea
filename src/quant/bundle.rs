use log::warn;
use serde::{Deserialize, Serialize};

use crate::dataset::EvalSet;
use crate::error::{PtqError, Result};
use crate::quant::calibrate::{derive_bias2, CalibrationResult};
use crate::quant::infer::{Accuracy, IntegerNetwork, OutputStage};
use crate::quant::weights::{ClipStats, QuantizedWeights, WeightQuantization, QMAX};

/// Everything the code generator needs. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedModelBundle {
    pub weights: QuantizedWeights,
    pub b1: Vec<i32>,
    /// `H_DIV` with the `B2` derived for it.
    pub stage: OutputStage,
    /// Float layer-2 bias `B2` was derived from, so a loaded bundle can be re-checked.
    pub float_b2: Vec<f32>,
    /// Full eval-set accuracy in percent.
    pub accuracy: f64,
    pub clips: ClipStats,
}

impl QuantizedModelBundle {
    pub fn assemble(quant: WeightQuantization, float_b2: &[f32], cal: &CalibrationResult) -> Result<Self> {
        let mut clips = quant.clips;
        clips.b2 = cal.b2_clipped;
        clips.hidden = cal.full.saturated;
        let bundle = Self {
            weights: quant.weights,
            b1: quant.b1,
            stage: cal.stage.clone(),
            float_b2: float_b2.to_vec(),
            accuracy: cal.accuracy(),
            clips,
        };
        bundle.validate()?;
        Ok(bundle)
    }

    pub fn h_div(&self) -> u32 { self.stage.h_div }

    pub fn validate(&self) -> Result<()> {
        let w = &self.weights;
        IntegerNetwork::new(w, &self.b1)?;
        if self.stage.b2.len() != w.meta.output_dim {
            return Err(PtqError::ShapeMismatch { what: "B2", expected: w.meta.output_dim, actual: self.stage.b2.len() });
        }
        if self.stage.h_div == 0 {
            return Err(PtqError::InvalidDivisor);
        }
        if self.float_b2.len() != w.meta.output_dim {
            return Err(PtqError::ShapeMismatch { what: "b2", expected: w.meta.output_dim, actual: self.float_b2.len() });
        }
        let in_range = |v: &[i8]| v.iter().all(|&x| (x as i32).abs() <= QMAX);
        if !in_range(&w.w1) || !in_range(&w.w2) {
            return Err(PtqError::InvalidParams("quantized weight outside [-127, 127]".to_string()));
        }
        for (layer, s) in [("w1", w.s_w1), ("w2", w.s_w2)] {
            if !(s.is_finite() && s > 0.0) {
                return Err(PtqError::DegenerateScale { layer });
            }
        }
        if derive_bias2(&self.float_b2, w.s_w1, w.s_w2, self.stage.h_div).0 != self.stage {
            return Err(PtqError::StaleBias2 { h_div: self.stage.h_div });
        }
        Ok(())
    }

    pub fn network(&self) -> Result<IntegerNetwork<'_>> {
        IntegerNetwork::new(&self.weights, &self.b1)
    }

    pub fn predict(&self, pixels: &[u8]) -> Result<usize> {
        Ok(self.network()?.predict(pixels, &self.stage))
    }

    /// Independent full-set pass with this bundle's own divisor and bias.
    pub fn recompute_accuracy(&self, eval: &EvalSet) -> Result<Accuracy> {
        if eval.is_empty() { return Err(PtqError::EmptyEvalSet); }
        Ok(self.network()?.accuracy(eval.samples(), &self.stage))
    }

    /// Runs each test vector and reports every class, right or wrong.
    pub fn smoke_test(&self, vectors: &[TestVector]) -> Result<Vec<ClassCheck>> {
        let net = self.network()?;
        let checks: Vec<ClassCheck> = vectors
            .iter()
            .map(|v| ClassCheck { label: v.label, index: v.index, predicted: net.predict(&v.pixels, &self.stage) })
            .collect();
        for c in checks.iter().filter(|c| !c.ok()) {
            warn!("class {} (sample {}) predicted as {}", c.label, c.index, c.predicted);
        }
        Ok(checks)
    }
}

/// First eval sample of one class, shipped next to the weights.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestVector {
    pub label: u8,
    pub index: usize,
    pub pixels: Vec<u8>,
}

impl TestVector {
    /// One vector per label `0..classes`; a class without samples is an error.
    pub fn first_of_each_class(eval: &EvalSet, classes: usize) -> Result<Vec<TestVector>> {
        (0..classes)
            .map(|c| {
                let label = c as u8;
                let index = eval.first_of_label(label).ok_or(PtqError::MissingClass(label))?;
                Ok(TestVector { label, index, pixels: eval.samples()[index].pixels.clone() })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCheck {
    pub label: u8,
    pub index: usize,
    pub predicted: usize,
}

impl ClassCheck {
    pub fn ok(&self) -> bool { self.predicted == self.label as usize }
}
