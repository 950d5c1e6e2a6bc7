//! Conversion between wire formats and the RGB working image.
//!
//! YUV uses BT.601 limited-range coefficients. Chroma is upsampled by
//! nearest neighbour and downsampled by averaging each 2x2 block.

use super::frame::{chroma_dimensions, FormatError, Frame, PixelFormat};
use image::{Rgb, RgbImage};

/// Convert a wire frame into the RGB working image
pub fn to_working(frame: &Frame) -> Result<RgbImage, FormatError> {
    frame.check_len()?;
    let (width, height) = frame.dimensions();
    let data = frame.data();

    let image = match frame.format() {
        PixelFormat::Rgba => RgbImage::from_fn(width, height, |x, y| {
            let i = (y as usize * width as usize + x as usize) * 4;
            Rgb([data[i], data[i + 1], data[i + 2]])
        }),
        PixelFormat::I420 | PixelFormat::Nv12 => {
            let planes = YuvPlanes::new(frame.format(), width, height);
            RgbImage::from_fn(width, height, |x, y| {
                let (u, v) = planes.chroma(data, x, y);
                let luma = data[y as usize * width as usize + x as usize];
                Rgb(yuv_to_rgb(luma, u, v))
            })
        }
        other => return Err(FormatError::Unsupported(other)),
    };

    Ok(image)
}

/// Write the working image back into `frame`, keeping its format
///
/// The RGBA alpha channel is left untouched. Nothing is written unless the
/// frame and image sizes agree.
pub fn write_working(image: &RgbImage, frame: &mut Frame) -> Result<(), FormatError> {
    frame.check_len()?;
    if image.dimensions() != frame.dimensions() {
        return Err(FormatError::DimensionMismatch {
            expected: frame.dimensions(),
            actual: image.dimensions(),
        });
    }

    let (width, height) = frame.dimensions();
    let format = frame.format();
    let data = frame.data_mut();

    match format {
        PixelFormat::Rgba => {
            for (pixel, out) in image.pixels().zip(data.chunks_exact_mut(4)) {
                out[..3].copy_from_slice(&pixel.0);
            }
        }
        PixelFormat::I420 | PixelFormat::Nv12 => {
            for (x, y, pixel) in image.enumerate_pixels() {
                data[y as usize * width as usize + x as usize] = rgb_to_luma(pixel.0);
            }

            let planes = YuvPlanes::new(format, width, height);
            let (cw, ch) = chroma_dimensions(width, height);
            for cy in 0..ch as u32 {
                for cx in 0..cw as u32 {
                    let (u, v) = block_chroma(image, cx * 2, cy * 2);
                    planes.set_chroma(data, cx, cy, u, v);
                }
            }
        }
        other => return Err(FormatError::Unsupported(other)),
    }

    Ok(())
}

/// Build a new wire frame of `format` from the working image
pub fn from_working(image: &RgbImage, format: PixelFormat) -> Result<Frame, FormatError> {
    let (width, height) = image.dimensions();
    let len = format
        .buffer_len(width, height)
        .ok_or(FormatError::Unsupported(format))?;
    let mut frame = Frame::new(format, width, height, vec![0; len])?;
    if format == PixelFormat::Rgba {
        for alpha in frame.data_mut().iter_mut().skip(3).step_by(4) {
            *alpha = u8::MAX;
        }
    }
    write_working(image, &mut frame)?;
    Ok(frame)
}

/// Offsets of the chroma samples inside a 4:2:0 buffer
struct YuvPlanes {
    format: PixelFormat,
    chroma_width: usize,
    u_offset: usize,
    v_offset: usize,
}

impl YuvPlanes {
    fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        let luma_len = width as usize * height as usize;
        let (cw, ch) = chroma_dimensions(width, height);
        Self {
            format,
            chroma_width: cw,
            u_offset: luma_len,
            v_offset: luma_len + cw * ch,
        }
    }

    fn indices(&self, cx: u32, cy: u32) -> (usize, usize) {
        let index = cy as usize * self.chroma_width + cx as usize;
        match self.format {
            PixelFormat::Nv12 => {
                let base = self.u_offset + index * 2;
                (base, base + 1)
            }
            _ => (self.u_offset + index, self.v_offset + index),
        }
    }

    fn chroma(&self, data: &[u8], x: u32, y: u32) -> (u8, u8) {
        let (u, v) = self.indices(x / 2, y / 2);
        (data[u], data[v])
    }

    fn set_chroma(&self, data: &mut [u8], cx: u32, cy: u32, u: u8, v: u8) {
        let (ui, vi) = self.indices(cx, cy);
        data[ui] = u;
        data[vi] = v;
    }
}

/// Average chroma of the (up to) 2x2 block starting at `(x, y)`
fn block_chroma(image: &RgbImage, x: u32, y: u32) -> (u8, u8) {
    let (width, height) = image.dimensions();
    let (mut u_sum, mut v_sum, mut count) = (0.0f32, 0.0f32, 0.0f32);

    for py in y..(y + 2).min(height) {
        for px in x..(x + 2).min(width) {
            let (u, v) = rgb_to_chroma(image.get_pixel(px, py).0);
            u_sum += u;
            v_sum += v;
            count += 1.0;
        }
    }

    (to_u8(u_sum / count), to_u8(v_sum / count))
}

fn to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

fn rgb_to_luma([r, g, b]: [u8; 3]) -> u8 {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    to_u8(0.257 * r + 0.504 * g + 0.098 * b + 16.0)
}

fn rgb_to_chroma([r, g, b]: [u8; 3]) -> (f32, f32) {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let u = -0.148 * r - 0.291 * g + 0.439 * b + 128.0;
    let v = 0.439 * r - 0.368 * g - 0.071 * b + 128.0;
    (u, v)
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = 1.164 * (y as f32 - 16.0);
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;

    [
        to_u8(c + 1.596 * e),
        to_u8(c - 0.391 * d - 0.813 * e),
        to_u8(c + 2.018 * d),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLORS: [[u8; 3]; 6] = [
        [0, 0, 255],
        [255, 0, 0],
        [0, 255, 0],
        [128, 128, 128],
        [200, 120, 40],
        [16, 16, 16],
    ];

    fn max_diff(a: &RgbImage, b: &RgbImage) -> u8 {
        a.as_raw()
            .iter()
            .zip(b.as_raw())
            .map(|(x, y)| x.abs_diff(*y))
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn test_rgba_round_trip_is_exact_and_keeps_alpha() {
        let mut data = Vec::new();
        for i in 0..6u8 {
            data.extend_from_slice(&[i * 10, i * 20, i * 30, 100 + i]);
        }
        let original = Frame::new(PixelFormat::Rgba, 3, 2, data).unwrap();

        let working = to_working(&original).unwrap();
        let mut restored = original.clone();
        restored.data_mut()[..3].copy_from_slice(&[9, 9, 9]);
        write_working(&working, &mut restored).unwrap();

        assert_eq!(restored, original);
    }

    #[test]
    fn test_uniform_yuv_round_trip_within_tolerance() {
        for format in [PixelFormat::I420, PixelFormat::Nv12] {
            for color in COLORS {
                let image = RgbImage::from_pixel(6, 4, Rgb(color));
                let frame = from_working(&image, format).unwrap();
                let restored = to_working(&frame).unwrap();
                assert!(
                    max_diff(&image, &restored) <= 3,
                    "{:?} {:?} -> {:?}",
                    format,
                    color,
                    restored.get_pixel(0, 0)
                );

                // wire -> working -> wire is stable
                let mut again = frame.clone();
                write_working(&restored, &mut again).unwrap();
                let drift = frame
                    .data()
                    .iter()
                    .zip(again.data())
                    .map(|(a, b)| a.abs_diff(*b))
                    .max()
                    .unwrap_or(0);
                assert!(drift <= 2, "{:?} {:?} drifted by {}", format, color, drift);
            }
        }
    }

    #[test]
    fn test_odd_dimensions_round_trip() {
        let image = RgbImage::from_pixel(5, 3, Rgb([0, 0, 255]));
        let frame = from_working(&image, PixelFormat::I420).unwrap();
        assert_eq!(frame.data().len(), 15 + 2 * 3 * 2);
        assert!(max_diff(&image, &to_working(&frame).unwrap()) <= 3);
    }

    #[test]
    fn test_nv12_interleaves_chroma() {
        let image = RgbImage::from_pixel(2, 2, Rgb([0, 0, 255]));
        let i420 = from_working(&image, PixelFormat::I420).unwrap();
        let nv12 = from_working(&image, PixelFormat::Nv12).unwrap();
        assert_eq!(&i420.data()[..4], &nv12.data()[..4]);
        assert_eq!(i420.data()[4], nv12.data()[4]);
        assert_eq!(i420.data()[5], nv12.data()[5]);
    }

    #[test]
    fn test_unsupported_format_is_distinct() {
        let frame = Frame::new(PixelFormat::Other(3), 2, 2, vec![0; 8]).unwrap();
        assert!(matches!(
            to_working(&frame),
            Err(FormatError::Unsupported(PixelFormat::Other(3)))
        ));
    }

    #[test]
    fn test_write_rejects_size_mismatch() {
        let mut frame = Frame::new(PixelFormat::Rgba, 2, 2, vec![7; 16]).unwrap();
        let image = RgbImage::new(3, 2);
        assert!(write_working(&image, &mut frame).is_err());
        assert!(frame.data().iter().all(|b| *b == 7));
    }
}
