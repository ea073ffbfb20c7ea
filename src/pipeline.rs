use log::{info, warn};

use crate::dataset::EvalSet;
use crate::error::{PtqError, Result};
use crate::model::{FloatModel, PIXEL_MAX};
use crate::quant::{
    ActivationCalibrator, CalibrationParams, CalibrationResult, ClassCheck, IntegerNetwork, QuantizedModelBundle,
    QuantizedWeights, TestVector, WeightQuantizer,
};

/// Result of a full quantization run. Accuracy collapse is not an error: compare
/// `bundle.accuracy` with `float_accuracy` and decide.
#[derive(Debug, Clone)]
pub struct PtqReport {
    pub bundle: QuantizedModelBundle,
    pub calibration: CalibrationResult,
    pub vectors: Vec<TestVector>,
    pub checks: Vec<ClassCheck>,
    pub float_accuracy: f64,
    /// Integer vs float layer-1 peak on the first sample; about 1.0 when B1 is in accumulator units.
    pub layer1_sanity_ratio: f64,
}

impl PtqReport {
    pub fn failed_checks(&self) -> impl Iterator<Item = &ClassCheck> {
        self.checks.iter().filter(|c| !c.ok())
    }

    pub fn accuracy_drop(&self) -> f64 { self.float_accuracy - self.bundle.accuracy }
}

pub fn quantize_model(model: &FloatModel, eval: &EvalSet, params: CalibrationParams) -> Result<PtqReport> {
    params.validate()?;
    if eval.is_empty() { return Err(PtqError::EmptyEvalSet); }
    let required = params.required_len();
    if eval.len() < required {
        return Err(PtqError::EvalSetTooSmall { required, actual: eval.len() });
    }
    // Fail on missing classes before spending time on the search.
    let vectors = TestVector::first_of_each_class(eval, model.meta.output_dim)?;

    let quant = WeightQuantizer.quantize(model)?;
    let layer1_sanity_ratio = layer1_ratio(model, &quant.weights, &quant.b1, &eval.samples()[0].pixels)?;
    info!("layer-1 sanity ratio on sample 0: {:.4} (want 1.0)", layer1_sanity_ratio);

    let calibration = ActivationCalibrator::new(&quant.weights, &quant.b1, &model.b2, params)?.calibrate(eval)?;
    let bundle = QuantizedModelBundle::assemble(quant, &model.b2, &calibration)?;
    let checks = bundle.smoke_test(&vectors)?;
    let passed = checks.iter().filter(|c| c.ok()).count();
    info!("per-class check: {}/{} correct", passed, checks.len());

    let float_accuracy = model.accuracy(eval);
    info!("float accuracy {:.2}%, integer accuracy {:.2}%", float_accuracy, bundle.accuracy);
    if bundle.accuracy + 1.0 < float_accuracy {
        warn!("integer model loses {:.2} points against float", float_accuracy - bundle.accuracy);
    }

    Ok(PtqReport { bundle, calibration, vectors, checks, float_accuracy, layer1_sanity_ratio })
}

fn layer1_ratio(model: &FloatModel, weights: &QuantizedWeights, b1: &[i32], pixels: &[u8]) -> Result<f64> {
    let net = IntegerNetwork::new(weights, b1)?;
    let int_peak = net.relu1(pixels).into_iter().max().unwrap_or(0) as f64 * weights.s_w1 / PIXEL_MAX;
    let float_peak = model.hidden(pixels).into_iter().fold(0f64, f64::max);
    Ok(int_peak / (float_peak + 1e-9))
}
