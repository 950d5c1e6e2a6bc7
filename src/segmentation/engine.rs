use super::onnx::OnnxBackend;
use super::preprocess::Preprocessor;
use super::types::{InferenceBackend, InferenceError, InputShape, Mask, ModelLoadError};
use crate::security::{SecurityGate, SecurityVerdict};
use image::RgbImage;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

/// Lifecycle of the engine's model handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Unloaded,
    Loading,
    Loaded,
    /// Last load attempt failed; stays here until the next attempt
    Failed,
}

/// Owns the loaded model and turns frames into foreground masks
pub struct InferenceEngine {
    backend: Box<dyn InferenceBackend>,
    gate: SecurityGate,
    state: EngineState,
    input_shape: InputShape,
    preprocessor: Preprocessor,
    model_path: Option<PathBuf>,
}

impl InferenceEngine {
    pub fn new(backend: Box<dyn InferenceBackend>, gate: SecurityGate) -> Self {
        let input_shape = InputShape::default();
        Self {
            backend,
            gate,
            state: EngineState::Unloaded,
            input_shape,
            preprocessor: Preprocessor::new(input_shape),
            model_path: None,
        }
    }

    /// Engine backed by ONNX Runtime, with execution providers chosen now
    pub fn with_onnx_runtime(gate: SecurityGate) -> Self {
        Self::new(Box::new(OnnxBackend::new()), gate)
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.state == EngineState::Loaded && self.backend.is_loaded()
    }

    /// Input size the loaded model declares, the fallback size otherwise
    pub fn input_shape(&self) -> InputShape {
        self.backend.input_shape().unwrap_or(self.input_shape)
    }

    pub fn model_path(&self) -> Option<&Path> {
        self.model_path.as_deref()
    }

    pub fn gate(&self) -> &SecurityGate {
        &self.gate
    }

    /// Validate and open a model
    ///
    /// The file is only handed to the backend after the security gate
    /// accepted it. Any previously loaded model is released first, so a
    /// failed reload leaves the engine without a model.
    pub fn load_model(
        &mut self,
        path: &Path,
        expected_sha256: Option<&str>,
    ) -> Result<SecurityVerdict, ModelLoadError> {
        tracing::info!("Loading model: {}", path.display());

        self.backend.unload();
        self.model_path = None;
        self.state = EngineState::Loading;

        let verdict = match self.gate.validate(path, expected_sha256) {
            Ok(verdict) => verdict,
            Err(err) => {
                tracing::error!(
                    "Model path validation failed, only load models from trusted directories"
                );
                self.state = EngineState::Failed;
                return Err(err.into());
            }
        };
        if !verdict.is_verified() {
            tracing::warn!(
                "Model integrity is unverified, provide a SHA-256 checksum for production use"
            );
        }

        let loaded = panic::catch_unwind(AssertUnwindSafe(|| self.backend.load(&verdict.path)))
            .unwrap_or_else(|_| {
                Err(ModelLoadError::Runtime(
                    "inference runtime panicked while opening the model".into(),
                ))
            });

        match loaded {
            Ok(shape) => {
                self.input_shape = shape;
                self.preprocessor = Preprocessor::new(shape);
                self.model_path = Some(verdict.path.clone());
                self.state = EngineState::Loaded;
                tracing::info!(
                    "Model loaded: input size {}x{}",
                    shape.width,
                    shape.height
                );
                Ok(verdict)
            }
            Err(err) => {
                tracing::error!("Failed to load model: {}", err);
                self.backend.unload();
                self.state = EngineState::Failed;
                Err(err)
            }
        }
    }

    /// Release the current model, if any, and return to `Unloaded`
    pub fn unload_model(&mut self) {
        if let Some(path) = self.model_path.take() {
            tracing::info!("Unloading model: {}", path.display());
        }
        self.backend.unload();
        self.input_shape = InputShape::default();
        self.preprocessor = Preprocessor::new(self.input_shape);
        self.state = EngineState::Unloaded;
    }

    /// Compute a foreground mask at the frame's resolution
    pub fn run_inference(
        &mut self,
        frame: &RgbImage,
        threshold: f32,
    ) -> Result<Mask, InferenceError> {
        if !self.is_loaded() {
            return Err(InferenceError::NotLoaded);
        }
        let _span = tracing::debug_span!("segment").entered();

        let input = self.preprocessor.preprocess(frame)?;
        let raw = self.backend.run(input)?;

        let (width, height) = frame.dimensions();
        Preprocessor::postprocess(&raw, threshold, width, height)
    }
}
