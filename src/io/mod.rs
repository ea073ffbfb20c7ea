//! File formats around the quantizer: float model and IDX inputs, header and preview outputs.

pub mod digits;
pub mod header;
pub mod idx;
pub mod model_file;

pub use header::save_header;
pub use idx::load_eval_set;
pub use model_file::load_float_model;
