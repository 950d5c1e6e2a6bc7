//! Live background removal for video frames.
//!
//! A frame flows through [`filter::BackgroundFilter::process_frame`]: it is
//! unpacked from its wire format, segmented by the loaded model, blended
//! against a solid colour or a blurred copy of itself, and packed back in
//! place. Models are only ever opened after [`security::SecurityGate`]
//! accepted them.

pub mod compositor;
pub mod filter;
pub mod security;
pub mod segmentation;

#[cfg(feature = "live")]
pub mod capture;
#[cfg(feature = "live")]
pub mod output;

pub use compositor::{Frame, PixelFormat};
pub use filter::{BackgroundFilter, FilterSettings, FrameOutcome};
pub use security::{ModelDirectories, SecurityGate};
pub use segmentation::{InferenceEngine, Mask};
