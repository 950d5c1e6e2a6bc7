//! Per-frame orchestration: settings, the processing guard and the stage
//! sequence from wire frame to wire frame.

mod config;
mod pipeline;
mod stats;

pub use config::{
    ConfigError, FilterConfig, FilterSettings, BLUR_AMOUNT_RANGE, DEFAULT_BLUR_AMOUNT,
    DEFAULT_EDGE_SMOOTHING, DEFAULT_REPLACEMENT_COLOR, DEFAULT_THRESHOLD, EDGE_SMOOTHING_RANGE,
};
pub use pipeline::BackgroundFilter;
pub use stats::{FilterStats, FrameOutcome, PassThroughReason, StatsSnapshot};
