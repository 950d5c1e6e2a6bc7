//! Separable Gaussian blur on interleaved float buffers.
//!
//! Kernel size is always odd (`2 * amount + 1`); sigma is derived from the
//! kernel size and borders reflect without repeating the edge sample.

use crate::segmentation::Mask;
use image::RgbImage;

/// Kernel size for a blur or smoothing amount
pub fn kernel_size(amount: u32) -> usize {
    2 * amount as usize + 1
}

/// Normalised 1-D Gaussian weights for an odd `ksize`
pub fn gaussian_kernel(ksize: usize) -> Vec<f32> {
    let sigma = 0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let radius = (ksize / 2) as f32;
    let scale = -0.5 / (sigma * sigma);

    let weights: Vec<f32> = (0..ksize)
        .map(|i| {
            let x = i as f32 - radius;
            (scale * x * x).exp()
        })
        .collect();
    let sum: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

/// Mirror an out-of-range index back into `0..len`
fn reflect(index: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let last = len as isize - 1;
    let mut i = index;
    while i < 0 || i > last {
        i = if i < 0 { -i } else { 2 * last - i };
    }
    i as usize
}

/// Blur an interleaved `width x height x channels` buffer
pub fn blur_interleaved(
    values: &[f32],
    width: usize,
    height: usize,
    channels: usize,
    ksize: usize,
) -> Vec<f32> {
    if ksize <= 1 || width == 0 || height == 0 {
        return values.to_vec();
    }
    let kernel = gaussian_kernel(ksize);
    let radius = (ksize / 2) as isize;
    let stride = width * channels;

    let mut horizontal = vec![0.0f32; values.len()];
    for y in 0..height {
        let row = &values[y * stride..(y + 1) * stride];
        for x in 0..width {
            for c in 0..channels {
                let mut acc = 0.0;
                for (k, weight) in kernel.iter().enumerate() {
                    let sx = reflect(x as isize + k as isize - radius, width);
                    acc += row[sx * channels + c] * weight;
                }
                horizontal[y * stride + x * channels + c] = acc;
            }
        }
    }

    let mut output = vec![0.0f32; values.len()];
    for y in 0..height {
        for (k, weight) in kernel.iter().enumerate() {
            let sy = reflect(y as isize + k as isize - radius, height);
            let src = &horizontal[sy * stride..(sy + 1) * stride];
            let dst = &mut output[y * stride..(y + 1) * stride];
            for (d, s) in dst.iter_mut().zip(src) {
                *d += s * weight;
            }
        }
    }

    output
}

/// Gaussian blur of a mask; `amount == 0` returns it unchanged
pub fn blur_mask(mask: &Mask, amount: u32) -> Mask {
    if amount == 0 {
        return mask.clone();
    }
    let (width, height) = mask.dimensions();
    let values = blur_interleaved(
        mask.values(),
        width as usize,
        height as usize,
        1,
        kernel_size(amount),
    );
    Mask::new(
        width,
        height,
        values.into_iter().map(|v| v.clamp(0.0, 1.0)).collect(),
    )
}

/// Gaussian blur of an RGB image; `amount == 0` returns a copy
pub fn blur_rgb(image: &RgbImage, amount: u32) -> RgbImage {
    if amount == 0 {
        return image.clone();
    }
    let (width, height) = image.dimensions();
    let values: Vec<f32> = image.as_raw().iter().map(|v| *v as f32).collect();
    let blurred = blur_interleaved(
        &values,
        width as usize,
        height as usize,
        3,
        kernel_size(amount),
    );
    let raw = blurred
        .into_iter()
        .map(|v| v.round().clamp(0.0, 255.0) as u8)
        .collect();
    RgbImage::from_raw(width, height, raw).unwrap_or_else(|| image.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_is_normalised_and_symmetric() {
        for ksize in [3, 7, 31, 101] {
            let kernel = gaussian_kernel(ksize);
            let sum: f32 = kernel.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
            assert_eq!(kernel.len(), ksize);
            assert!((kernel[0] - kernel[ksize - 1]).abs() < 1e-7);
            assert!(kernel[ksize / 2] >= kernel[0]);
        }
    }

    #[test]
    fn test_reflect() {
        assert_eq!(reflect(-1, 5), 1);
        assert_eq!(reflect(-2, 5), 2);
        assert_eq!(reflect(5, 5), 3);
        assert_eq!(reflect(3, 1), 0);
        // kernel wider than the image
        assert!(reflect(-40, 3) < 3);
        assert!(reflect(40, 3) < 3);
    }

    #[test]
    fn test_blur_keeps_uniform_image() {
        let image = RgbImage::from_pixel(9, 5, image::Rgb([10, 200, 90]));
        let blurred = blur_rgb(&image, 15);
        assert_eq!(blurred, image);
    }

    #[test]
    fn test_blur_spreads_an_edge() {
        let mut values = vec![0.0; 10];
        values[5..].fill(1.0);
        let mask = Mask::new(10, 1, values);
        let smoothed = blur_mask(&mask, 2);
        assert!(smoothed.get(4, 0) > 0.0);
        assert!(smoothed.get(5, 0) < 1.0);
        assert!(smoothed.get(4, 0) < smoothed.get(5, 0));
    }

    #[test]
    fn test_zero_amount_is_noop() {
        let mask = Mask::new(2, 1, vec![0.0, 1.0]);
        assert_eq!(blur_mask(&mask, 0), mask);
    }
}
