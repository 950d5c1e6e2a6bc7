use super::OutputSink;
use crate::compositor::{self, Frame, PixelFormat};
use anyhow::{Context, Result};
use image::imageops;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

/// v4l2loopback device fed with I420 frames
pub struct V4L2Output {
    // Keeps the negotiated format alive while frames are written
    _device: Device,
    file: File,
    width: u32,
    height: u32,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open v4l2 device at {}", path.display()))?;
        let requested = Format::new(width, height, FourCC::new(b"YU12"));
        let applied = Output::set_format(&device, &requested)
            .context("Failed to set output format on v4l2loopback device")?;
        if applied.width != width || applied.height != height {
            anyhow::bail!(
                "v4l2loopback device accepted {}x{} instead of {}x{}",
                applied.width,
                applied.height,
                width,
                height
            );
        }

        // v4l2loopback accepts raw frame data written to the device file
        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        tracing::info!("v4l2loopback device ready, format {}", applied.fourcc);

        Ok(Self {
            _device: device,
            file,
            width,
            height,
        })
    }

    /// Scale to the device resolution and repack as I420
    fn to_device_frame(&self, frame: &Frame) -> Result<Frame> {
        let same_size = frame.dimensions() == (self.width, self.height);
        if frame.format() == PixelFormat::I420 && same_size {
            return Ok(frame.clone());
        }

        let mut working = compositor::to_working(frame).context("Failed to unpack frame")?;
        if !same_size {
            working = imageops::resize(
                &working,
                self.width,
                self.height,
                imageops::FilterType::Triangle,
            );
        }
        compositor::from_working(&working, PixelFormat::I420)
            .context("Failed to pack I420 frame")
    }
}

impl OutputSink for V4L2Output {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let device_frame = self.to_device_frame(frame)?;

        self.file
            .write_all(device_frame.data())
            .context("Failed to write frame to v4l2loopback device")?;

        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
