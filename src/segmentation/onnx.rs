use super::types::{InferenceBackend, InferenceError, InputShape, ModelLoadError, RawOutput};
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, ExecutionProvider, ExecutionProviderDispatch,
    TensorRTExecutionProvider,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, ValueType};
use std::fmt::Display;
use std::path::Path;

const INTRA_THREADS: usize = 4;

/// ONNX Runtime backend
///
/// GPU execution providers are probed once, when the backend is created;
/// every session built afterwards reuses that choice. ONNX Runtime falls
/// back to the CPU provider on its own when a registered provider cannot be
/// initialised.
pub struct OnnxBackend {
    providers: Vec<ExecutionProviderDispatch>,
    session: Option<Session>,
    input_name: String,
    output_name: String,
    input_shape: Option<InputShape>,
}

impl OnnxBackend {
    pub fn new() -> Self {
        Self {
            providers: detect_execution_providers(),
            session: None,
            input_name: String::new(),
            output_name: String::new(),
            input_shape: None,
        }
    }
}

impl Default for OnnxBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn detect_execution_providers() -> Vec<ExecutionProviderDispatch> {
    let mut providers = Vec::new();

    let tensorrt = TensorRTExecutionProvider::default();
    if tensorrt.is_available().unwrap_or(false) {
        tracing::info!("TensorRT execution provider enabled");
        providers.push(tensorrt.build());
    }

    let cuda = CUDAExecutionProvider::default();
    if cuda.is_available().unwrap_or(false) {
        tracing::info!("CUDA execution provider enabled");
        providers.push(cuda.build());
    }

    if providers.is_empty() {
        tracing::info!("No GPU execution provider available, using CPU");
    }
    providers
}

fn load_error(err: impl Display) -> ModelLoadError {
    ModelLoadError::Runtime(err.to_string())
}

fn run_error(err: impl Display) -> InferenceError {
    InferenceError::Runtime(err.to_string())
}

/// Spatial size from an NCHW input shape; symbolic dimensions fall back to
/// [`InputShape::FALLBACK`]
fn declared_input_shape(dims: &[i64]) -> Result<InputShape, ModelLoadError> {
    if dims.len() < 4 {
        return Err(ModelLoadError::Introspection(format!(
            "expected a rank-4 NCHW input, got {:?}",
            dims
        )));
    }
    if dims[1] > 0 && dims[1] != 3 {
        tracing::warn!("Model input declares {} channels, expected 3", dims[1]);
    }

    let concrete = |value: i64, fallback: u32| {
        u32::try_from(value)
            .ok()
            .filter(|v| *v > 0)
            .unwrap_or(fallback)
    };
    Ok(InputShape {
        height: concrete(dims[2], InputShape::FALLBACK.height),
        width: concrete(dims[3], InputShape::FALLBACK.width),
    })
}

/// Interpret the trailing two dimensions as the mask; every leading
/// dimension must be 1
fn raw_output(dims: &[i64], data: &[f32]) -> Result<RawOutput, InferenceError> {
    let rank = dims.len();
    if rank < 2 || dims[..rank - 2].iter().any(|d| *d != 1) {
        return Err(InferenceError::OutputShape(dims.to_vec()));
    }

    let (height, width) = (dims[rank - 2], dims[rank - 1]);
    let (Ok(height), Ok(width)) = (u32::try_from(height), u32::try_from(width)) else {
        return Err(InferenceError::OutputShape(dims.to_vec()));
    };
    if data.len() != height as usize * width as usize {
        return Err(InferenceError::OutputShape(dims.to_vec()));
    }

    Ok(RawOutput {
        width,
        height,
        values: data.to_vec(),
    })
}

impl InferenceBackend for OnnxBackend {
    fn load(&mut self, path: &Path) -> Result<InputShape, ModelLoadError> {
        self.unload();

        // Basic graph optimisation only, keeps the optimiser's attack surface small
        let session = Session::builder()
            .map_err(load_error)?
            .with_execution_providers(&self.providers)
            .map_err(load_error)?
            .with_optimization_level(GraphOptimizationLevel::Level1)
            .map_err(load_error)?
            .with_intra_threads(INTRA_THREADS)
            .map_err(load_error)?
            .commit_from_file(path)
            .map_err(load_error)?;

        let input = session.inputs.first().ok_or(ModelLoadError::NoInputs)?;
        let shape = match &input.input_type {
            ValueType::Tensor { shape, .. } => declared_input_shape(shape)?,
            other => {
                return Err(ModelLoadError::Introspection(format!(
                    "input '{}' is not a tensor: {:?}",
                    input.name, other
                )))
            }
        };
        let input_name = input.name.clone();

        let output = session.outputs.first().ok_or(ModelLoadError::NoOutputs)?;
        if session.outputs.len() > 1 {
            tracing::warn!(
                "Model declares {} outputs, using '{}'",
                session.outputs.len(),
                output.name
            );
        }
        let output_name = output.name.clone();

        tracing::debug!(
            "Model signature: input '{}' {}x{}, output '{}'",
            input_name,
            shape.width,
            shape.height,
            output_name
        );

        self.input_name = input_name;
        self.output_name = output_name;
        self.input_shape = Some(shape);
        self.session = Some(session);
        Ok(shape)
    }

    fn run(&mut self, input: Array4<f32>) -> Result<RawOutput, InferenceError> {
        let session = self.session.as_mut().ok_or(InferenceError::NotLoaded)?;

        let _span = tracing::debug_span!("inference").entered();
        let tensor = Tensor::from_array(input).map_err(run_error)?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(run_error)?;

        let (shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(run_error)?;
        raw_output(shape, data)
    }

    fn is_loaded(&self) -> bool {
        self.session.is_some()
    }

    fn input_shape(&self) -> Option<InputShape> {
        self.input_shape
    }

    fn unload(&mut self) {
        if self.session.take().is_some() {
            tracing::info!("Releasing previous model session");
        }
        self.input_shape = None;
    }
}
