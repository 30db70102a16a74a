mod replay;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use pavement_overlay::OverlayConfig;
use pavement_overlay::core_modules::detection::DetectionDataset;
use tracing_subscriber::EnvFilter;

use crate::replay::{ReplayOptions, replay};

/// Replays a detection dataset through the overlay engine and writes the
/// rendered overlays, the detection log and the summary to a directory.
#[derive(Debug, Parser)]
#[command(name = "overlay_tester")]
struct Args {
    /// Detection dataset (JSON array of frame records or `{ "frames": [...] }`).
    dataset: PathBuf,
    /// Directory for PNG overlays, detection_log.json and summary.json.
    output_dir: PathBuf,
    /// JSON overlay configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Frame rate to assume when the dataset does not report one.
    #[arg(long)]
    fps: Option<f64>,
    #[arg(long)]
    max_log: Option<usize>,
    /// TrueType font for label text.
    #[arg(long)]
    font: Option<PathBuf>,
    #[arg(long, default_value_t = 1280)]
    width: u32,
    #[arg(long, default_value_t = 720)]
    height: u32,
    /// Video length in seconds; defaults to the span the dataset covers.
    #[arg(long)]
    duration: Option<f64>,
    /// Only write the log and summary.
    #[arg(long)]
    no_frames: bool,
}

fn main() -> anyhow::Result<()> {
    // --- 1. Argument Parsing & Setup ---
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pavement_overlay=info,overlay_tester=info")),
        )
        .init();

    // --- 2. Configuration ---
    let mut config = match &args.config {
        Some(path) => OverlayConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => OverlayConfig::default(),
    }
    .with_env_overrides();
    if let Some(fps) = args.fps {
        config = config.with_fps(fps);
    }
    if let Some(max_log) = args.max_log {
        config = config.with_max_log_entries(max_log);
    }
    if let Some(font) = &args.font {
        config = config.with_font_path(font);
    }
    config.validate()?;

    // --- 3. Replay ---
    let dataset = DetectionDataset::from_path(&args.dataset)
        .with_context(|| format!("reading dataset {}", args.dataset.display()))?;
    let options = ReplayOptions {
        width: args.width,
        height: args.height,
        duration_secs: args.duration,
        output_dir: args.output_dir.clone(),
        save_frames: !args.no_frames,
    };
    let report = replay(&config, &dataset, &options)?;

    // --- 4. Report ---
    println!(
        "replayed {:.3}s at {} fps: {} log entries, {} overlay frames written to {}",
        report.duration_secs,
        report.fps,
        report.log.len(),
        report.frames_written,
        args.output_dir.display()
    );
    if let Some(summary) = &report.summary {
        for class in &summary.classes {
            println!(
                "  {:<12} {:>5} detections, {:>4} objects, mean confidence {:.0}%",
                class.class_label.display_name(),
                class.detections,
                class.unique_objects,
                class.mean_confidence * 100.0
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let args = Args::try_parse_from([
            "overlay_tester",
            "results.json",
            "out",
            "--fps",
            "25",
            "--no-frames",
            "--width",
            "640",
        ])
        .unwrap();
        assert_eq!(args.dataset, PathBuf::from("results.json"));
        assert_eq!(args.fps, Some(25.0));
        assert!(args.no_frames);
        assert_eq!((args.width, args.height), (640, 720));
        assert!(args.config.is_none());
    }

    #[test]
    fn dataset_and_output_are_required() {
        assert!(Args::try_parse_from(["overlay_tester", "results.json"]).is_err());
    }
}
