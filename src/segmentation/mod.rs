mod engine;
mod onnx;
mod preprocess;
pub mod types;

pub use engine::{EngineState, InferenceEngine};
pub use onnx::OnnxBackend;
pub use preprocess::{
    resize_bilinear, sigmoid, threshold_mask, Preprocessor, CHANNEL_MEAN, CHANNEL_STD,
};
pub use types::{InferenceBackend, InferenceError, InputShape, Mask, ModelLoadError, RawOutput};
