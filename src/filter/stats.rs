use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Why a frame left the filter unmodified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassThroughReason {
    /// No model is loaded
    NotLoaded,
    /// A previous frame is still being processed
    Busy,
    /// The frame's pixel format is not handled
    UnsupportedFormat,
    /// The model could not produce a mask for this frame
    InferenceFailed,
    /// Any other failure, including a panic inside a stage
    Error,
}

/// Result of one `process_frame` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Processed,
    PassThrough(PassThroughReason),
}

impl FrameOutcome {
    pub fn is_processed(&self) -> bool {
        matches!(self, FrameOutcome::Processed)
    }
}

/// Per-instance counters, updated without taking the processing guard
#[derive(Debug, Default)]
pub struct FilterStats {
    processed: AtomicU64,
    not_loaded: AtomicU64,
    busy: AtomicU64,
    unsupported_format: AtomicU64,
    inference_failed: AtomicU64,
    errors: AtomicU64,
}

impl FilterStats {
    pub fn record(&self, outcome: FrameOutcome) {
        let counter = match outcome {
            FrameOutcome::Processed => &self.processed,
            FrameOutcome::PassThrough(PassThroughReason::NotLoaded) => &self.not_loaded,
            FrameOutcome::PassThrough(PassThroughReason::Busy) => &self.busy,
            FrameOutcome::PassThrough(PassThroughReason::UnsupportedFormat) => {
                &self.unsupported_format
            }
            FrameOutcome::PassThrough(PassThroughReason::InferenceFailed) => {
                &self.inference_failed
            }
            FrameOutcome::PassThrough(PassThroughReason::Error) => &self.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            not_loaded: self.not_loaded.load(Ordering::Relaxed),
            busy: self.busy.load(Ordering::Relaxed),
            unsupported_format: self.unsupported_format.load(Ordering::Relaxed),
            inference_failed: self.inference_failed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub not_loaded: u64,
    pub busy: u64,
    pub unsupported_format: u64,
    pub inference_failed: u64,
    pub errors: u64,
}

impl StatsSnapshot {
    pub fn passed_through(&self) -> u64 {
        self.not_loaded + self.busy + self.unsupported_format + self.inference_failed + self.errors
    }
}

/// Stage timings accumulated while holding the processing guard
#[derive(Debug, Default)]
pub(crate) struct FrameTimings {
    frames: u64,
    convert: Duration,
    inference: Duration,
    composite: Duration,
}

impl FrameTimings {
    const LOG_EVERY: u64 = 30;

    pub(crate) fn add(&mut self, convert: Duration, inference: Duration, composite: Duration) {
        self.frames += 1;
        self.convert += convert;
        self.inference += inference;
        self.composite += composite;

        if self.frames % Self::LOG_EVERY == 0 {
            self.log();
        }
    }

    fn log(&self) {
        let avg_ms = |total: Duration| total.as_secs_f64() * 1000.0 / self.frames as f64;
        let convert_ms = avg_ms(self.convert);
        let inference_ms = avg_ms(self.inference);
        let composite_ms = avg_ms(self.composite);
        let total_ms = convert_ms + inference_ms + composite_ms;
        let fps = if total_ms > 0.0 { 1000.0 / total_ms } else { 0.0 };

        tracing::info!(
            "Frame {}: convert={:.1}ms, inference={:.1}ms, composite={:.1}ms, total={:.1}ms, fps={:.1}",
            self.frames,
            convert_ms,
            inference_ms,
            composite_ms,
            total_ms,
            fps
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_by_reason() {
        let stats = FilterStats::default();
        stats.record(FrameOutcome::Processed);
        stats.record(FrameOutcome::PassThrough(PassThroughReason::Busy));
        stats.record(FrameOutcome::PassThrough(PassThroughReason::Busy));
        stats.record(FrameOutcome::PassThrough(PassThroughReason::UnsupportedFormat));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.processed, 1);
        assert_eq!(snapshot.busy, 2);
        assert_eq!(snapshot.passed_through(), 3);
    }
}
