use super::config::{FilterConfig, FilterSettings};
use super::stats::{
    FilterStats, FrameOutcome, FrameTimings, PassThroughReason, StatsSnapshot,
};
use crate::compositor::{self, CompositeError, CompositeMode, FormatError, Frame};
use crate::security::{ModelDirectories, SecurityGate, SecurityVerdict};
use crate::segmentation::{EngineState, InferenceEngine, InferenceError, Mask, ModelLoadError};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
enum StageError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Composite(#[from] CompositeError),
}

impl StageError {
    fn reason(&self) -> PassThroughReason {
        match self {
            StageError::Format(FormatError::Unsupported(_)) => {
                PassThroughReason::UnsupportedFormat
            }
            StageError::Inference(_) => PassThroughReason::InferenceFailed,
            _ => PassThroughReason::Error,
        }
    }
}

/// State only touched while holding the processing guard
struct FrameSlot {
    engine: InferenceEngine,
    dimensions: Option<(u32, u32)>,
    last_duration: Option<Duration>,
    timings: FrameTimings,
}

impl FrameSlot {
    fn track_dimensions(&mut self, dimensions: (u32, u32)) {
        if self.dimensions != Some(dimensions) {
            tracing::debug!("Frame size changed to {}x{}", dimensions.0, dimensions.1);
            self.dimensions = Some(dimensions);
        }
    }
}

/// One background filter instance
///
/// `process_frame` takes `&self` and may be called from the host's video
/// thread; configuration changes take `&mut self`, so the host has to
/// serialise them with frame delivery. At most one frame is processed at a
/// time, any frame arriving meanwhile is passed through untouched.
pub struct BackgroundFilter {
    settings: FilterSettings,
    config: FilterConfig,
    slot: Mutex<FrameSlot>,
    stats: FilterStats,
}

impl BackgroundFilter {
    /// Create an instance and apply `settings`, loading the model they name
    pub fn new(engine: InferenceEngine, settings: FilterSettings) -> Self {
        let mut filter = Self {
            settings: FilterSettings::default(),
            config: FilterConfig::default(),
            slot: Mutex::new(FrameSlot {
                engine,
                dimensions: None,
                last_duration: None,
                timings: FrameTimings::default(),
            }),
            stats: FilterStats::default(),
        };
        filter.update(settings);
        filter
    }

    /// Instance backed by ONNX Runtime, loading models only from `directories`
    pub fn with_onnx_runtime(settings: FilterSettings, directories: ModelDirectories) -> Self {
        let engine = InferenceEngine::with_onnx_runtime(SecurityGate::new(directories));
        Self::new(engine, settings)
    }

    /// Settings a freshly added filter starts with
    pub fn defaults() -> FilterSettings {
        FilterSettings::default()
    }

    /// Apply new settings
    ///
    /// Out-of-range numeric values are replaced by the defaults as a group.
    /// The model is reloaded when its path or expected checksum changed and
    /// unloaded when the path is cleared; load failures are logged and leave
    /// the filter passing frames through.
    pub fn update(&mut self, settings: FilterSettings) {
        self.config = settings.to_config();

        let model_changed = settings.model_path != self.settings.model_path
            || settings.model_sha256 != self.settings.model_sha256;
        if model_changed {
            match &settings.model_path {
                Some(path) => {
                    if let Err(err) = self.load_model(path, settings.model_sha256.as_deref()) {
                        tracing::warn!("Background filter disabled: {}", err);
                    }
                }
                None => self.slot.get_mut().engine.unload_model(),
            }
        }

        self.settings = settings;
    }

    /// Validate and load a model, replacing the current one
    pub fn load_model(
        &mut self,
        path: &Path,
        expected_sha256: Option<&str>,
    ) -> Result<SecurityVerdict, ModelLoadError> {
        self.slot.get_mut().engine.load_model(path, expected_sha256)
    }

    pub fn settings(&self) -> &FilterSettings {
        &self.settings
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Blocks until any in-flight frame finishes
    pub fn engine_state(&self) -> EngineState {
        self.slot.lock().engine.state()
    }

    /// Size of the last frame that reached the processing stages
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.slot.lock().dimensions
    }

    pub fn last_frame_duration(&self) -> Option<Duration> {
        self.slot.lock().last_duration
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Filter one frame in place
    ///
    /// Never fails: whenever a stage cannot complete the frame is left
    /// exactly as it was and the returned outcome says why.
    pub fn process_frame(&self, frame: &mut Frame) -> FrameOutcome {
        let outcome = match self.slot.try_lock() {
            Some(mut slot) => self.process_guarded(&mut slot, frame),
            None => FrameOutcome::PassThrough(PassThroughReason::Busy),
        };
        self.stats.record(outcome);
        outcome
    }

    /// Mask the current model produces for `frame`, after edge refinement
    ///
    /// Returns `None` when the filter is busy or any stage fails.
    pub fn preview_mask(&self, frame: &Frame) -> Option<Mask> {
        let mut slot = self.slot.try_lock()?;
        let working = compositor::to_working(frame).ok()?;
        let mask = match slot.engine.run_inference(&working, self.config.threshold) {
            Ok(mask) => mask,
            Err(err) => {
                tracing::warn!("Mask preview failed: {}", err);
                return None;
            }
        };

        if self.config.smooth_edges {
            Some(compositor::refine_mask_edges(&mask, self.config.edge_smoothing))
        } else {
            Some(mask)
        }
    }

    fn process_guarded(&self, slot: &mut FrameSlot, frame: &mut Frame) -> FrameOutcome {
        if !slot.engine.is_loaded() {
            return FrameOutcome::PassThrough(PassThroughReason::NotLoaded);
        }
        slot.track_dimensions(frame.dimensions());

        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            run_stages(slot, &self.config, frame)
        }));
        slot.last_duration = Some(started.elapsed());

        match result {
            Ok(Ok(())) => FrameOutcome::Processed,
            Ok(Err(err)) => {
                match &err {
                    StageError::Format(FormatError::Unsupported(format)) => {
                        tracing::debug!("Passing through unsupported format {:?}", format);
                    }
                    StageError::Inference(err) => {
                        tracing::warn!("Inference failed: {}", err);
                    }
                    err => tracing::error!("Error processing frame: {}", err),
                }
                FrameOutcome::PassThrough(err.reason())
            }
            Err(_) => {
                tracing::error!("Panic while processing frame, passing it through");
                FrameOutcome::PassThrough(PassThroughReason::Error)
            }
        }
    }
}

/// Convert, segment, refine, composite and write back one frame
///
/// The frame buffer is only written in the final step, after every fallible
/// stage succeeded.
fn run_stages(
    slot: &mut FrameSlot,
    config: &FilterConfig,
    frame: &mut Frame,
) -> Result<(), StageError> {
    let convert_start = Instant::now();
    let working = compositor::to_working(frame)?;
    let mut convert = convert_start.elapsed();

    let inference_start = Instant::now();
    let mut mask = slot.engine.run_inference(&working, config.threshold)?;
    let inference = inference_start.elapsed();

    let composite_start = Instant::now();
    if config.smooth_edges {
        mask = compositor::refine_mask_edges(&mask, config.edge_smoothing);
    }
    let mode = config.composite_mode();
    let output = compositor::composite(&working, &mask, mode)?;
    let composite = composite_start.elapsed();

    // Passthrough output equals the input, skip the lossy write-back
    if mode != CompositeMode::Passthrough {
        let write_start = Instant::now();
        compositor::write_working(&output, frame)?;
        convert += write_start.elapsed();
    }

    slot.timings.add(convert, inference, composite);
    Ok(())
}
