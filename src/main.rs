use anyhow::{bail, Context, Result};
use camola_bgfilter::compositor::{self, Frame, PixelFormat};
use camola_bgfilter::filter::{BackgroundFilter, FilterSettings};
use camola_bgfilter::security::{GatePolicy, ModelDirectories, SecurityGate};
use camola_bgfilter::segmentation::{EngineState, InferenceEngine};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a still image through the frame pipeline
    Image(ImageArgs),

    /// Filter a webcam stream into a v4l2loopback device
    #[cfg(feature = "live")]
    Live(LiveArgs),
}

#[derive(Args, Debug)]
struct FilterArgs {
    /// Settings file (TOML); the flags below override it
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Path to segmentation model (ONNX file)
    /// If not provided, frames pass through unmodified
    #[arg(long)]
    model: Option<PathBuf>,

    /// Expected SHA-256 of the model file (hex)
    #[arg(long)]
    model_sha256: Option<String>,

    /// Directory models may be loaded from, repeatable
    /// Defaults to the host's user and system model directories
    #[arg(long = "model-dir")]
    model_dirs: Vec<PathBuf>,

    /// Refuse models from user-writable directories without a checksum
    #[arg(long)]
    require_checksum: bool,

    /// Foreground confidence threshold (0.0-1.0)
    #[arg(long)]
    threshold: Option<f32>,

    /// Blur the background instead of replacing it
    #[arg(long)]
    blur: bool,

    /// Background blur amount (1-50)
    #[arg(long)]
    blur_amount: Option<i32>,

    /// Replacement background colour as RRGGBB
    #[arg(long, value_parser = parse_hex_color)]
    color: Option<u32>,

    /// Keep hard mask edges
    #[arg(long)]
    no_smooth_edges: bool,

    /// Mask edge smoothing amount (1-10)
    #[arg(long)]
    edge_smoothing: Option<i32>,
}

#[derive(Args, Debug)]
struct ImageArgs {
    /// Input image
    input: PathBuf,

    /// Output image
    output: PathBuf,

    /// Wire format the frame is handed to the filter in
    #[arg(long, value_enum, default_value_t = WireFormat::Rgba)]
    format: WireFormat,

    /// Write the mask (grayscale silhouette) instead of the filtered frame
    #[arg(long)]
    show_mask: bool,

    #[command(flatten)]
    filter: FilterArgs,
}

#[cfg(feature = "live")]
#[derive(Args, Debug)]
struct LiveArgs {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Capture resolution width
    #[arg(long, default_value_t = 1280)]
    capture_width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 720)]
    capture_height: u32,

    /// Output resolution width
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// Target frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    #[command(flatten)]
    filter: FilterArgs,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum WireFormat {
    Rgba,
    I420,
    Nv12,
}

impl From<WireFormat> for PixelFormat {
    fn from(format: WireFormat) -> Self {
        match format {
            WireFormat::Rgba => PixelFormat::Rgba,
            WireFormat::I420 => PixelFormat::I420,
            WireFormat::Nv12 => PixelFormat::Nv12,
        }
    }
}

fn parse_hex_color(value: &str) -> Result<u32, String> {
    let hex = value.trim_start_matches('#');
    if hex.len() != 6 {
        return Err(format!("expected RRGGBB, got '{}'", value));
    }
    u32::from_str_radix(hex, 16).map_err(|err| format!("invalid colour '{}': {}", value, err))
}

impl FilterArgs {
    fn settings(&self) -> Result<FilterSettings> {
        let mut settings = match &self.settings {
            Some(path) => FilterSettings::from_toml_file(path)?,
            None => FilterSettings::default(),
        };

        if let Some(model) = &self.model {
            settings.model_path = Some(model.clone());
        }
        if let Some(hash) = &self.model_sha256 {
            settings.model_sha256 = Some(hash.clone());
        }
        if let Some(threshold) = self.threshold {
            settings.threshold = threshold;
        }
        if self.blur {
            // Replace takes priority over blur
            settings.blur_background = true;
            settings.replace_background = false;
        }
        if let Some(amount) = self.blur_amount {
            settings.blur_amount = amount;
        }
        if let Some(color) = self.color {
            settings.set_replacement_rgb(color);
        }
        if self.no_smooth_edges {
            settings.smooth_edges = false;
        }
        if let Some(amount) = self.edge_smoothing {
            settings.edge_smoothing = amount;
        }

        Ok(settings)
    }

    fn build_filter(&self) -> Result<BackgroundFilter> {
        let settings = self.settings()?;

        let directories = if self.model_dirs.is_empty() {
            ModelDirectories::host_defaults()
        } else {
            self.model_dirs
                .iter()
                .fold(ModelDirectories::new(), |dirs, dir| dirs.with_user(dir))
        };
        tracing::info!("Allowed model directories: {}", directories.len());

        let gate = SecurityGate::new(directories).with_policy(GatePolicy {
            require_checksum_for_user_dirs: self.require_checksum,
        });
        let engine = InferenceEngine::with_onnx_runtime(gate);

        let model_path = settings.model_path.clone();
        let filter = BackgroundFilter::new(engine, settings);

        match model_path {
            Some(path) if filter.engine_state() != EngineState::Loaded => {
                bail!("Failed to load segmentation model from {}", path.display())
            }
            Some(_) => tracing::info!("Segmentation model loaded successfully"),
            None => tracing::info!("Running in passthrough mode (no segmentation)"),
        }

        Ok(filter)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    match cli.command {
        Command::Image(args) => run_image(&args),
        #[cfg(feature = "live")]
        Command::Live(args) => run_live(&args),
    }
}

fn run_image(args: &ImageArgs) -> Result<()> {
    let filter = args.filter.build_filter()?;

    let image = image::open(&args.input)
        .with_context(|| format!("Failed to open {}", args.input.display()))?;
    let mut frame = match args.format {
        WireFormat::Rgba => Frame::from_rgba_image(image.to_rgba8()),
        other => compositor::from_working(&image.to_rgb8(), other.into())
            .context("Failed to pack input frame")?,
    };
    tracing::info!(
        "Input: {}x{} as {:?}",
        frame.width(),
        frame.height(),
        frame.format()
    );

    if args.show_mask {
        let mask = filter
            .preview_mask(&frame)
            .context("Model did not produce a mask")?;
        mask.to_rgb()
            .save(&args.output)
            .with_context(|| format!("Failed to write {}", args.output.display()))?;
        return Ok(());
    }

    let started = Instant::now();
    let outcome = filter.process_frame(&mut frame);
    tracing::info!(
        "Frame {:?} in {:.1}ms",
        outcome,
        started.elapsed().as_secs_f64() * 1000.0
    );

    compositor::to_working(&frame)
        .context("Failed to unpack output frame")?
        .save(&args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    Ok(())
}

#[cfg(feature = "live")]
fn run_live(args: &LiveArgs) -> Result<()> {
    use camola_bgfilter::capture::{CaptureSource, WebcamCapture};
    use camola_bgfilter::output::{OutputSink, V4L2Output};
    use std::time::Duration;

    tracing::info!("Camola starting");
    tracing::info!("Capture: {}x{}", args.capture_width, args.capture_height);
    tracing::info!("Output: {}x{}", args.output_width, args.output_height);
    tracing::info!("Target FPS: {}", args.fps);

    let filter = args.filter.build_filter()?;

    let mut capture =
        WebcamCapture::new(args.input_device, args.capture_width, args.capture_height)
            .context("Failed to initialize webcam capture")?;
    let mut output =
        V4L2Output::new(&args.output_device, args.output_width, args.output_height)
            .context("Failed to initialize v4l2loopback output")?;

    let (capture_width, capture_height) = capture.resolution();
    let (output_width, output_height) = output.resolution();
    if (capture_width, capture_height) != (output_width, output_height) {
        tracing::info!(
            "Scaling {}x{} camera frames to {}x{} on output",
            capture_width,
            capture_height,
            output_width,
            output_height
        );
    }

    let frame_duration = Duration::from_secs_f32(1.0 / args.fps.max(1) as f32);
    let mut frame_count = 0u64;
    let mut total_capture_time = Duration::ZERO;
    let mut total_filter_time = Duration::ZERO;
    let mut total_output_time = Duration::ZERO;

    tracing::info!("Starting main pipeline loop");
    tracing::info!("Press Ctrl+C to stop");

    loop {
        let loop_start = Instant::now();

        let capture_start = Instant::now();
        let mut frame = capture.capture_frame().context("Failed to capture frame")?;
        total_capture_time += capture_start.elapsed();

        let filter_start = Instant::now();
        filter.process_frame(&mut frame);
        total_filter_time += filter_start.elapsed();

        let output_start = Instant::now();
        output
            .write_frame(&frame)
            .context("Failed to write frame")?;
        total_output_time += output_start.elapsed();

        frame_count += 1;

        // Log stats every 30 frames
        if frame_count % 30 == 0 {
            let avg_ms = |total: Duration| total.as_secs_f64() * 1000.0 / frame_count as f64;
            let stats = filter.stats();
            tracing::info!(
                "Frame {}: capture={:.1}ms, filter={:.1}ms, output={:.1}ms, filtered={}, passed through={}",
                frame_count,
                avg_ms(total_capture_time),
                avg_ms(total_filter_time),
                avg_ms(total_output_time),
                stats.processed,
                stats.passed_through()
            );
        }

        // Frame rate limiting
        let elapsed = loop_start.elapsed();
        if elapsed < frame_duration {
            std::thread::sleep(frame_duration - elapsed);
        }
    }
}
