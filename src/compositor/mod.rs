//! Pixel format conversion and mask-driven blending.
//!
//! Everything here is a pure function over in-memory buffers.

mod blend;
pub mod blur;
mod colorspace;
mod frame;

pub use blend::{composite, refine_mask_edges, CompositeError, CompositeMode};
pub use colorspace::{from_working, to_working, write_working};
pub use frame::{FormatError, Frame, PixelFormat};
