use thiserror::Error;

pub type Result<T> = std::result::Result<T, PtqError>;

/// Hard stops of the quantization pipeline. None of these leave a partial bundle behind.
#[derive(Debug, Error, PartialEq)]
pub enum PtqError {
    /// Every weight of a layer is zero, so its scale would be zero.
    #[error("degenerate scale: all weights of {layer} are zero")]
    DegenerateScale { layer: &'static str },

    #[error("shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch { what: &'static str, expected: usize, actual: usize },

    /// A fan-in wide enough to overflow the i32 accumulators.
    #[error("{what} = {dim} exceeds the i32 accumulator limit of {max}")]
    DimensionTooLarge { what: &'static str, dim: usize, max: usize },

    #[error("non-finite value in {0}")]
    NonFinite(&'static str),

    #[error("eval set is empty")]
    EmptyEvalSet,

    #[error("eval set too small: calibration needs {required} samples, got {actual}")]
    EvalSetTooSmall { required: usize, actual: usize },

    #[error("invalid calibration params: {0}")]
    InvalidParams(String),

    #[error("eval set has no sample with label {0}")]
    MissingClass(u8),

    #[error("hidden divisor must be >= 1")]
    InvalidDivisor,

    /// `B2` does not match what `H_DIV` and the float bias give.
    #[error("B2 was not derived for H_DIV={h_div}")]
    StaleBias2 { h_div: u32 },
}
