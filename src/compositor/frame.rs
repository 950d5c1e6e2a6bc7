use thiserror::Error;

/// Wire pixel layouts a frame can arrive in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Planar 4:2:0, Y plane then U plane then V plane
    I420,
    /// Semi-planar 4:2:0, Y plane then one interleaved UV plane
    Nv12,
    /// Packed 8-bit RGBA
    Rgba,
    /// Any other host format, identified by the host's format code
    Other(u32),
}

impl PixelFormat {
    pub fn is_supported(&self) -> bool {
        !matches!(self, PixelFormat::Other(_))
    }

    /// Exact buffer size for a frame of this format, `None` for formats the
    /// filter does not understand
    ///
    /// Odd dimensions round the chroma planes up.
    pub fn buffer_len(&self, width: u32, height: u32) -> Option<usize> {
        let (w, h) = (width as usize, height as usize);
        match self {
            PixelFormat::I420 | PixelFormat::Nv12 => {
                let (cw, ch) = chroma_dimensions(width, height);
                Some(w * h + 2 * cw * ch)
            }
            PixelFormat::Rgba => Some(w * h * 4),
            PixelFormat::Other(_) => None,
        }
    }
}

/// Size of one subsampled chroma plane
pub(crate) fn chroma_dimensions(width: u32, height: u32) -> (usize, usize) {
    (width.div_ceil(2) as usize, height.div_ceil(2) as usize)
}

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unsupported pixel format {0:?}")]
    Unsupported(PixelFormat),

    #[error("{format:?} frame {width}x{height} needs {expected} bytes, got {actual}")]
    BufferLength {
        format: PixelFormat,
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("working image is {actual:?}, frame is {expected:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

/// One video frame in its wire format
///
/// Frames are supplied by the caller for a single processing call and are
/// modified in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    format: PixelFormat,
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Wrap a pixel buffer, checking its length for supported formats
    pub fn new(
        format: PixelFormat,
        width: u32,
        height: u32,
        data: Vec<u8>,
    ) -> Result<Self, FormatError> {
        if let Some(expected) = format.buffer_len(width, height) {
            if data.len() != expected {
                return Err(FormatError::BufferLength {
                    format,
                    width,
                    height,
                    expected,
                    actual: data.len(),
                });
            }
        }
        Ok(Self {
            format,
            width,
            height,
            data,
        })
    }

    pub fn from_rgba_image(image: image::RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            format: PixelFormat::Rgba,
            width,
            height,
            data: image.into_raw(),
        }
    }

    pub fn format(&self) -> PixelFormat {
        self.format
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

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Buffer length check for supported formats, `Unsupported` otherwise
    pub(crate) fn check_len(&self) -> Result<(), FormatError> {
        let expected = self
            .format
            .buffer_len(self.width, self.height)
            .ok_or(FormatError::Unsupported(self.format))?;
        if self.data.len() != expected {
            return Err(FormatError::BufferLength {
                format: self.format,
                width: self.width,
                height: self.height,
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }
}
