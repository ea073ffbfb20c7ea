//! Integer-only post-training quantization of a two-layer MNIST classifier.
pub mod dataset;
pub mod error;
pub mod io;
pub mod model;
pub mod pipeline;
pub mod quant;

pub use dataset::{EvalSample, EvalSet};
pub use error::{PtqError, Result};
pub use model::{FloatModel, ModelMeta};
pub use pipeline::{quantize_model, PtqReport};
pub use quant::{CalibrationParams, QuantizedModelBundle};
