use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ab_glyph::FontArc;
use fence_core::{
    annotate::Annotator,
    detection::{YoloDetector, DEFAULT_CONF_THRESHOLD},
    geometry::FencePolygon,
    pipeline::Pipeline,
    runtime::configure_ort_dylib,
    video::{save_to_video, total_frames, VideoReader, DEFAULT_FPS},
};

// ── CLI definition ────────────────────────────────────────────────────────────

/// The reference fence quadrilateral (top-left, top-right, bottom-right,
/// bottom-left), used when no fence is given on the command line.
const DEFAULT_FENCE: &str = "415,75 610,100 510,310 170,180";

#[derive(Parser)]
#[command(
    name = "fencewatch",
    version,
    about = "Virtual-fence trespass detection for video files",
    long_about = None
)]
struct Cli {
    /// Input video path (mp4, avi, mov)
    #[arg(short, long)]
    input: PathBuf,

    /// Output video path
    #[arg(short, long, default_value = "processed_video.mp4")]
    output: PathBuf,

    /// YOLOv8 ONNX model path
    #[arg(long, default_value = "yolov8n.onnx")]
    model: PathBuf,

    /// Fence polygon as whitespace-separated "x,y" vertices in frame-pixel
    /// coordinates
    #[arg(long, default_value = DEFAULT_FENCE)]
    fence: String,

    /// Output frame rate
    #[arg(long, default_value_t = DEFAULT_FPS)]
    fps: u32,

    /// Detection confidence threshold (0-1)
    #[arg(long, default_value_t = DEFAULT_CONF_THRESHOLD)]
    confidence: f32,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    // Respect RUST_LOG; default to info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    configure_ort_dylib();

    let fence = FencePolygon::parse(&cli.fence).context("invalid --fence value")?;

    info!("virtual-fence trespass detection");
    info!("  input  : {}", cli.input.display());
    info!("  output : {}", cli.output.display());
    info!("  fence  : {:?}", fence.points());

    let detector = YoloDetector::load(&cli.model, cli.confidence)
        .with_context(|| format!("failed to load model: {}", cli.model.display()))?;

    let annotator = Annotator::new(fence, find_label_font());
    let mut pipeline = Pipeline::new(detector, annotator);

    let reader = VideoReader::open(&cli.input)
        .with_context(|| format!("cannot open video: {}", cli.input.display()))?;

    let total = total_frames(&cli.input);
    let pb = progress_bar(total);
    let pb_tick = pb.clone();

    let outcome = pipeline
        .process_frames_with_progress(reader, move |done| {
            if total > 0 {
                pb_tick.set_position(done);
            } else {
                pb_tick.tick();
            }
        })
        .context("video processing failed")?;

    pb.finish_with_message("Frames processed.");

    if outcome.frames.is_empty() {
        bail!(
            "{} contained no decodable frames; nothing to write",
            cli.input.display()
        );
    }

    save_to_video(&outcome.frames, &cli.output, cli.fps)
        .with_context(|| format!("failed to write output video: {}", cli.output.display()))?;

    info!("processed video written to {}", cli.output.display());
    if outcome.alerts > 0 {
        warn!("ALERT: {} trespassing events detected!", outcome.alerts);
    } else {
        info!("No trespassing detected.");
    }

    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn progress_bar(total: u64) -> ProgressBar {
    if total > 0 {
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} frames [{elapsed_precise}]",
            )
            .unwrap()
            .progress_chars("=> "),
        );
        pb
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed_precise}]").unwrap(),
        );
        pb.set_message("Processing frames…");
        pb.enable_steady_tick(std::time::Duration::from_millis(80));
        pb
    }
}

/// Find a TrueType font for label text.  Checked in order: the
/// FENCEWATCH_FONT environment variable, then common system font locations.
/// Without a font the fence, boxes and alert overlays are still drawn.
fn find_label_font() -> Option<FontArc> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(env_font) = std::env::var_os("FENCEWATCH_FONT") {
        candidates.push(PathBuf::from(env_font));
    }
    candidates.extend(
        [
            "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
            "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
            "/usr/share/fonts/TTF/DejaVuSans.ttf",
            "/Library/Fonts/Arial Unicode.ttf",
        ]
        .iter()
        .map(PathBuf::from),
    );

    for path in candidates {
        if let Ok(bytes) = std::fs::read(&path) {
            if let Ok(font) = FontArc::try_from_vec(bytes) {
                info!(path = %path.display(), "loaded label font");
                return Some(font);
            }
            warn!(path = %path.display(), "font file exists but could not be parsed");
        }
    }

    warn!("no label font found; labels will be skipped (set FENCEWATCH_FONT to a .ttf)");
    None
}
