use super::types::{InferenceError, InputShape, Mask, RawOutput};
use image::{imageops, RgbImage};
use ndarray::Array4;

/// Per-plane mean the segmentation model was trained with, indexed by
/// tensor plane (plane 0 is blue)
pub const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// Per-plane standard deviation, indexed like [`CHANNEL_MEAN`]
pub const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Preprocessor for converting RGB images to model input tensors
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(shape: InputShape) -> Self {
        Self {
            target_width: shape.width,
            target_height: shape.height,
        }
    }

    /// Preprocess an RGB image into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Resize to target dimensions (bilinear)
    /// 2. Convert to float in [0, 1]
    /// 3. Subtract plane mean, divide by plane std
    /// 4. Transpose from HWC to NCHW format with planes in B, G, R order
    ///
    /// Returns: Array4<f32> with shape [1, 3, height, width]
    pub fn preprocess(&self, image: &RgbImage) -> Result<Array4<f32>, InferenceError> {
        let _span = tracing::debug_span!("preprocess").entered();

        if image.width() == 0 || image.height() == 0 {
            return Err(InferenceError::Preprocess(format!(
                "empty frame {}x{}",
                image.width(),
                image.height()
            )));
        }

        let resized;
        let source = if image.dimensions() != (self.target_width, self.target_height) {
            resized = imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            );
            &resized
        } else {
            image
        };

        let (width, height) = source.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        for (x, y, pixel) in source.enumerate_pixels() {
            // Plane c takes channel 2 - c: the model expects BGR planes
            for c in 0..3 {
                let value = pixel[2 - c] as f32 / 255.0;
                tensor[[0, c, y as usize, x as usize]] = (value - CHANNEL_MEAN[c]) / CHANNEL_STD[c];
            }
        }

        Ok(tensor)
    }

    /// Turn raw model output into a frame-sized mask
    ///
    /// Applies a sigmoid, zeroes everything at or below `threshold`, then
    /// resizes bilinearly to `target_width` x `target_height`.
    pub fn postprocess(
        raw: &RawOutput,
        threshold: f32,
        target_width: u32,
        target_height: u32,
    ) -> Result<Mask, InferenceError> {
        let _span = tracing::debug_span!("postprocess").entered();

        let mask = threshold_mask(raw, threshold)?;
        if mask.dimensions() == (target_width, target_height) {
            return Ok(mask);
        }
        Ok(resize_bilinear(&mask, target_width, target_height))
    }
}

pub fn sigmoid(value: f32) -> f32 {
    1.0 / (1.0 + (-value).exp())
}

/// Sigmoid activation plus threshold at the model's native resolution
pub fn threshold_mask(raw: &RawOutput, threshold: f32) -> Result<Mask, InferenceError> {
    let expected = raw.width as usize * raw.height as usize;
    if raw.values.len() != expected || expected == 0 {
        return Err(InferenceError::OutputShape(vec![
            raw.values.len() as i64,
            raw.height as i64,
            raw.width as i64,
        ]));
    }

    let values = raw
        .values
        .iter()
        .map(|&logit| {
            let confidence = sigmoid(logit);
            if confidence > threshold {
                confidence
            } else {
                0.0
            }
        })
        .collect();

    Ok(Mask::new(raw.width, raw.height, values))
}

/// Bilinear resize with pixel-centre alignment
///
/// Constant regions stay exactly constant.
pub fn resize_bilinear(mask: &Mask, width: u32, height: u32) -> Mask {
    let (src_w, src_h) = mask.dimensions();
    if width == 0 || height == 0 || src_w == 0 || src_h == 0 {
        return Mask::filled(width, height, 0.0);
    }

    let scale_x = src_w as f32 / width as f32;
    let scale_y = src_h as f32 / height as f32;

    let sample_axis = |dst: u32, scale: f32, len: u32| -> (u32, u32, f32) {
        let pos = ((dst as f32 + 0.5) * scale - 0.5).clamp(0.0, (len - 1) as f32);
        let lo = pos.floor() as u32;
        let hi = (lo + 1).min(len - 1);
        (lo, hi, pos - lo as f32)
    };

    let mut values = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height {
        let (y0, y1, fy) = sample_axis(y, scale_y, src_h);
        for x in 0..width {
            let (x0, x1, fx) = sample_axis(x, scale_x, src_w);
            let top = lerp(mask.get(x0, y0), mask.get(x1, y0), fx);
            let bottom = lerp(mask.get(x0, y1), mask.get(x1, y1), fx);
            values.push(lerp(top, bottom, fy));
        }
    }

    Mask::new(width, height, values)
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn raw(width: u32, height: u32, values: Vec<f32>) -> RawOutput {
        RawOutput {
            width,
            height,
            values,
        }
    }

    #[test]
    fn test_preprocess_shape_and_normalization() {
        let pre = Preprocessor::new(InputShape {
            height: 4,
            width: 6,
        });
        let image = RgbImage::from_pixel(6, 4, image::Rgb([255, 0, 128]));
        let tensor = pre.preprocess(&image).unwrap();

        assert_eq!(tensor.shape(), &[1, 3, 4, 6]);
        assert_eq!(
            pre.preprocess(&RgbImage::new(13, 9)).unwrap().shape(),
            &[1, 3, 4, 6]
        );
        let b = (128.0 / 255.0 - CHANNEL_MEAN[0]) / CHANNEL_STD[0];
        let g = (0.0 - CHANNEL_MEAN[1]) / CHANNEL_STD[1];
        let r = (1.0 - CHANNEL_MEAN[2]) / CHANNEL_STD[2];
        assert!((tensor[[0, 0, 2, 3]] - b).abs() < 1e-5);
        assert!((tensor[[0, 1, 2, 3]] - g).abs() < 1e-5);
        assert!((tensor[[0, 2, 2, 3]] - r).abs() < 1e-5);
    }

    #[test]
    fn test_first_plane_is_blue() {
        let pre = Preprocessor::new(InputShape {
            height: 1,
            width: 1,
        });
        let red = pre
            .preprocess(&RgbImage::from_pixel(1, 1, image::Rgb([255, 0, 0])))
            .unwrap();
        assert!((red[[0, 0, 0, 0]] - (0.0 - 0.485) / 0.229).abs() < 1e-5);
        assert!((red[[0, 2, 0, 0]] - (1.0 - 0.406) / 0.225).abs() < 1e-5);

        let blue = pre
            .preprocess(&RgbImage::from_pixel(1, 1, image::Rgb([0, 0, 255])))
            .unwrap();
        assert!((blue[[0, 0, 0, 0]] - (1.0 - 0.485) / 0.229).abs() < 1e-5);
    }

    #[test]
    fn test_preprocess_rejects_empty_frame() {
        let pre = Preprocessor::new(InputShape::default());
        let image = RgbImage::new(0, 0);
        assert!(matches!(
            pre.preprocess(&image),
            Err(InferenceError::Preprocess(_))
        ));
    }

    #[test]
    fn test_threshold_zeroes_at_or_below() {
        // sigmoid(0) == 0.5 exactly
        let mask = threshold_mask(&raw(3, 1, vec![0.0, 2.0, -2.0]), 0.5).unwrap();
        assert_eq!(mask.values()[0], 0.0);
        assert!((mask.values()[1] - sigmoid(2.0)).abs() < 1e-6);
        assert_eq!(mask.values()[2], 0.0);
    }

    #[test]
    fn test_threshold_rejects_short_output() {
        let err = threshold_mask(&raw(4, 4, vec![0.0; 3]), 0.5).unwrap_err();
        assert!(matches!(err, InferenceError::OutputShape(_)));
    }

    #[test]
    fn test_resize_keeps_constant_exact() {
        let mask = Mask::filled(5, 3, 1.0);
        let resized = resize_bilinear(&mask, 17, 11);
        assert_eq!(resized.dimensions(), (17, 11));
        assert!(resized.values().iter().all(|v| *v == 1.0));
    }

    #[test]
    fn test_resize_interpolates_between_columns() {
        let mask = Mask::new(2, 1, vec![0.0, 1.0]);
        let resized = resize_bilinear(&mask, 4, 1);
        // Pixel centres map to -0.25, 0.25, 0.75, 1.25 in source space
        assert_eq!(resized.values()[0], 0.0);
        assert!((resized.values()[1] - 0.25).abs() < 1e-6);
        assert!((resized.values()[2] - 0.75).abs() < 1e-6);
        assert_eq!(resized.values()[3], 1.0);
    }

    #[test]
    fn test_postprocess_resizes_to_frame() {
        let mask = Preprocessor::postprocess(&raw(2, 2, vec![10.0; 4]), 0.5, 8, 6).unwrap();
        assert_eq!(mask.dimensions(), (8, 6));
    }

    proptest! {
        #[test]
        fn prop_raising_threshold_never_adds_pixels(
            logits in proptest::collection::vec(-8.0f32..8.0, 16),
            low in 0.0f32..=1.0,
            high in 0.0f32..=1.0,
        ) {
            let (low, high) = if low <= high { (low, high) } else { (high, low) };
            let output = raw(4, 4, logits);
            let loose = threshold_mask(&output, low).unwrap();
            let strict = threshold_mask(&output, high).unwrap();
            prop_assert!(strict.non_zero_count() <= loose.non_zero_count());
        }

        #[test]
        fn prop_mask_values_in_unit_range(
            logits in proptest::collection::vec(-50.0f32..50.0, 9),
            threshold in 0.0f32..=1.0,
        ) {
            let mask = threshold_mask(&raw(3, 3, logits), threshold).unwrap();
            prop_assert!(mask.values().iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }
}
