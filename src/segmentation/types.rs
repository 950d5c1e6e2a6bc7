use crate::security::SecurityError;
use image::RgbImage;
use ndarray::Array4;
use std::path::Path;
use thiserror::Error;

/// Spatial size a model expects its input at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
    pub height: u32,
    pub width: u32,
}

impl InputShape {
    /// Used when a model leaves its spatial dimensions symbolic
    pub const FALLBACK: InputShape = InputShape {
        height: 320,
        width: 320,
    };
}

impl Default for InputShape {
    fn default() -> Self {
        Self::FALLBACK
    }
}

/// Foreground confidence per pixel, row-major
///
/// 0.0 = background, 1.0 = foreground. Dimensions match the frame the mask
/// was computed for.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl Mask {
    /// Panics if `values` does not hold exactly `width * height` entries.
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> Self {
        assert_eq!(
            values.len(),
            width as usize * height as usize,
            "mask buffer does not match {}x{}",
            width,
            height
        );
        Self {
            width,
            height,
            values,
        }
    }

    pub fn filled(width: u32, height: u32, value: f32) -> Self {
        Self::new(width, height, vec![value; width as usize * height as usize])
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.values[(y * self.width + x) as usize]
    }

    /// Number of pixels with any foreground confidence
    pub fn non_zero_count(&self) -> usize {
        self.values.iter().filter(|v| **v > 0.0).count()
    }

    /// Grayscale visualisation of the mask
    pub fn to_rgb(&self) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let value = (self.get(x, y) * 255.0).round().clamp(0.0, 255.0) as u8;
            image::Rgb([value, value, value])
        })
    }
}

/// Single-channel model output at the model's native resolution
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutput {
    pub width: u32,
    pub height: u32,
    pub values: Vec<f32>,
}

#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("model failed security validation: {0}")]
    Security(#[from] SecurityError),

    #[error("inference runtime error: {0}")]
    Runtime(String),

    #[error("model declares no inputs")]
    NoInputs,

    #[error("model declares no outputs")]
    NoOutputs,

    #[error("unsupported model signature: {0}")]
    Introspection(String),
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("no model loaded")]
    NotLoaded,

    #[error("preprocessing failed: {0}")]
    Preprocess(String),

    #[error("inference runtime error: {0}")]
    Runtime(String),

    #[error("unexpected output shape {0:?}")]
    OutputShape(Vec<i64>),
}

/// Inference backend holding an opaque model handle
///
/// Allows swapping the runtime (ONNX Runtime, test stubs, ...) without
/// touching the security gate or the compositor.
pub trait InferenceBackend: Send {
    /// Open a model that already passed the security gate and report its
    /// declared input size
    fn load(&mut self, path: &Path) -> Result<InputShape, ModelLoadError>;

    /// Forward pass over a `[1, 3, H, W]` tensor
    fn run(&mut self, input: Array4<f32>) -> Result<RawOutput, InferenceError>;

    fn is_loaded(&self) -> bool;

    /// Declared input size of the loaded model
    fn input_shape(&self) -> Option<InputShape>;

    /// Drop the current model handle
    fn unload(&mut self) {
        // Default implementation: nothing to release
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_indexing_is_row_major() {
        let mask = Mask::new(2, 2, vec![0.0, 0.25, 0.5, 1.0]);
        assert_eq!(mask.get(1, 0), 0.25);
        assert_eq!(mask.get(0, 1), 0.5);
        assert_eq!(mask.non_zero_count(), 3);
    }

    #[test]
    fn test_mask_to_rgb() {
        let mask = Mask::new(2, 1, vec![0.0, 1.0]);
        let rgb = mask.to_rgb();
        assert_eq!(rgb.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(rgb.get_pixel(1, 0).0, [255, 255, 255]);
    }

    #[test]
    #[should_panic]
    fn test_mask_rejects_wrong_length() {
        Mask::new(3, 3, vec![0.0; 4]);
    }
}
