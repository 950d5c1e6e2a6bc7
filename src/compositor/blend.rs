use super::blur::{blur_mask, blur_rgb};
use crate::segmentation::Mask;
use image::{Rgb, RgbImage};
use thiserror::Error;

/// How the background is recomposed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeMode {
    /// Solid colour behind the subject
    Replace(Rgb<u8>),
    /// Blurred copy of the frame behind the subject
    Blur { amount: u32 },
    /// Frame left as is
    Passthrough,
}

#[derive(Debug, Error)]
pub enum CompositeError {
    #[error("mask is {mask:?} but frame is {frame:?}")]
    MaskSize { mask: (u32, u32), frame: (u32, u32) },
}

/// Soften mask edges with a `2 * amount + 1` Gaussian; `amount == 0` is a no-op
pub fn refine_mask_edges(mask: &Mask, amount: u32) -> Mask {
    blur_mask(mask, amount)
}

/// Blend `foreground` over the mode's background using `mask` as opacity
///
/// `output = foreground * mask + background * (1 - mask)` per channel.
pub fn composite(
    foreground: &RgbImage,
    mask: &Mask,
    mode: CompositeMode,
) -> Result<RgbImage, CompositeError> {
    if mask.dimensions() != foreground.dimensions() {
        return Err(CompositeError::MaskSize {
            mask: mask.dimensions(),
            frame: foreground.dimensions(),
        });
    }
    let _span = tracing::debug_span!("composite").entered();

    let output = match mode {
        CompositeMode::Replace(color) => RgbImage::from_fn(
            foreground.width(),
            foreground.height(),
            |x, y| blend(foreground.get_pixel(x, y), &color, mask.get(x, y)),
        ),
        CompositeMode::Blur { amount } => {
            let blurred = blur_rgb(foreground, amount);
            RgbImage::from_fn(foreground.width(), foreground.height(), |x, y| {
                blend(
                    foreground.get_pixel(x, y),
                    blurred.get_pixel(x, y),
                    mask.get(x, y),
                )
            })
        }
        CompositeMode::Passthrough => foreground.clone(),
    };

    Ok(output)
}

fn blend(fg: &Rgb<u8>, bg: &Rgb<u8>, alpha: f32) -> Rgb<u8> {
    let alpha = alpha.clamp(0.0, 1.0);
    let mix = |f: u8, b: u8| {
        (f as f32 * alpha + b as f32 * (1.0 - alpha))
            .round()
            .clamp(0.0, 255.0) as u8
    };
    Rgb([mix(fg[0], bg[0]), mix(fg[1], bg[1]), mix(fg[2], bg[2])])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 20) as u8, (y * 30) as u8, ((x + y) * 10) as u8])
        })
    }

    #[test]
    fn test_full_mask_keeps_foreground() {
        let fg = gradient(8, 6);
        let mask = Mask::filled(8, 6, 1.0);
        for mode in [
            CompositeMode::Replace(Rgb([255, 0, 0])),
            CompositeMode::Blur { amount: 3 },
        ] {
            assert_eq!(composite(&fg, &mask, mode).unwrap(), fg);
        }
    }

    #[test]
    fn test_empty_mask_shows_background() {
        let fg = gradient(8, 6);
        let mask = Mask::filled(8, 6, 0.0);

        let replaced = composite(&fg, &mask, CompositeMode::Replace(Rgb([1, 2, 3]))).unwrap();
        assert!(replaced.pixels().all(|p| p.0 == [1, 2, 3]));

        let blurred = composite(&fg, &mask, CompositeMode::Blur { amount: 3 }).unwrap();
        assert_eq!(blurred, blur_rgb(&fg, 3));
    }

    #[test]
    fn test_half_mask_averages() {
        let fg = RgbImage::from_pixel(1, 1, Rgb([200, 100, 0]));
        let mask = Mask::filled(1, 1, 0.5);
        let out = composite(&fg, &mask, CompositeMode::Replace(Rgb([0, 0, 100]))).unwrap();
        assert_eq!(out.get_pixel(0, 0).0, [100, 50, 50]);
    }

    #[test]
    fn test_passthrough_ignores_mask() {
        let fg = gradient(4, 4);
        let mask = Mask::filled(4, 4, 0.0);
        assert_eq!(composite(&fg, &mask, CompositeMode::Passthrough).unwrap(), fg);
    }

    #[test]
    fn test_mask_size_mismatch() {
        let fg = gradient(4, 4);
        let mask = Mask::filled(3, 4, 1.0);
        assert!(composite(&fg, &mask, CompositeMode::Passthrough).is_err());
    }

    #[test]
    fn test_refine_zero_is_noop() {
        let mask = Mask::new(3, 1, vec![0.0, 1.0, 0.0]);
        assert_eq!(refine_mask_edges(&mask, 0), mask);
        assert_ne!(refine_mask_edges(&mask, 1), mask);
    }
}
