//! Post-training quantization: int8 weights, integer inference and the hidden divisor search.

pub mod bundle;
pub mod calibrate;
pub mod infer;
pub mod kernels;
pub mod weights;

pub use bundle::{ClassCheck, QuantizedModelBundle, TestVector};
pub use calibrate::{derive_bias2, ActivationCalibrator, CalibrationParams, CalibrationResult, RangeSurvey};
pub use infer::{Accuracy, ForwardTrace, IntegerNetwork, OutputStage};
pub use weights::{ClipStats, QuantizedWeights, WeightQuantization, WeightQuantizer, QMAX};
