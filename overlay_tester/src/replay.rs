// THEORY:
// A replay is a whole play-through of a dataset against a `SimulatedVideo`,
// stepped one frame period at a time with a `ManualScheduler`, exactly as a
// browser would drive the engine at the video's own frame rate. It produces the
// same log and summary a reviewer would see, plus a PNG of every distinct
// frame that carried detections.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::Context;
use pavement_overlay::core_modules::detection::DetectionDataset;
use pavement_overlay::core_modules::detection_log::DetectionLogEntry;
use pavement_overlay::core_modules::playback::SimulatedVideo;
use pavement_overlay::core_modules::scheduler::ManualScheduler;
use pavement_overlay::core_modules::summary::DetectionSummary;
use pavement_overlay::core_modules::surface::RgbaSurface;
use pavement_overlay::{OverlayConfig, OverlayEngine, PlaybackPhase};
use serde::Serialize;
use tracing::{debug, info};

type ReplayEngine = OverlayEngine<SimulatedVideo, RgbaSurface, ManualScheduler>;

pub const LOG_FILE: &str = "detection_log.json";
pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub width: u32,
    pub height: u32,
    /// Defaults to the span the dataset covers.
    pub duration_secs: Option<f64>,
    pub output_dir: PathBuf,
    pub save_frames: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub fps: f64,
    pub duration_secs: f64,
    pub ticks: u64,
    pub frames_written: usize,
    pub max_outstanding_ticks: usize,
    pub log: Vec<DetectionLogEntry>,
    pub summary: Option<DetectionSummary>,
}

pub fn replay(
    config: &OverlayConfig,
    dataset: &DetectionDataset,
    options: &ReplayOptions,
) -> anyhow::Result<ReplayReport> {
    std::fs::create_dir_all(&options.output_dir)
        .with_context(|| format!("creating {}", options.output_dir.display()))?;

    // --- 1. Engine Setup ---
    let surface = config.raster_surface(options.width, options.height)?;
    let mut engine = ReplayEngine::new(config.clone(), ManualScheduler::new());
    engine.attach_surface(surface);

    let fps = dataset.effective_fps(config.fps);
    let duration_secs = options
        .duration_secs
        .unwrap_or_else(|| dataset.covered_secs(fps));
    engine.load(dataset, SimulatedVideo::new(duration_secs));
    engine.on_loaded_data();

    // --- 2. Play-through ---
    let step = 1.0 / fps;
    let max_ticks = (duration_secs * fps).ceil() as u64 + 2;
    let mut ticks = 0;
    let mut frames_written = 0;
    let mut last_written = None;

    if let Some(video) = engine.video_mut() {
        video.play();
    }
    engine.on_play();

    while ticks < max_ticks {
        let ended = engine.video_mut().is_some_and(|video| video.advance(step));
        for handle in engine.scheduler_mut().take_due() {
            engine.on_tick(handle);
        }
        engine.flush_counters();
        ticks += 1;

        let counters = engine.counters();
        if options.save_frames
            && counters.detection_count > 0
            && last_written != Some(counters.current_frame)
        {
            write_frame(&engine, &options.output_dir, counters.current_frame)?;
            last_written = Some(counters.current_frame);
            frames_written += 1;
        }

        if ended {
            // Normally the final tick has already finished playback.
            if engine.phase() != PlaybackPhase::Ended {
                engine.on_ended();
            }
            break;
        }
    }

    info!(
        ticks,
        frames_written,
        logged = engine.log().len(),
        "replay finished"
    );

    // --- 3. Results ---
    let report = ReplayReport {
        fps,
        duration_secs,
        ticks,
        frames_written,
        max_outstanding_ticks: engine.scheduler().max_outstanding(),
        log: engine.log().to_vec(),
        summary: engine.summary().cloned(),
    };
    write_json(&options.output_dir.join(LOG_FILE), &report.log)?;
    write_json(&options.output_dir.join(SUMMARY_FILE), &report.summary)?;
    Ok(report)
}

fn write_frame(engine: &ReplayEngine, dir: &Path, frame: u64) -> anyhow::Result<()> {
    let Some(surface) = engine.surface() else {
        return Ok(());
    };
    let path = dir.join(format!("frame_{frame:06}.png"));
    surface
        .save_png(&path)
        .with_context(|| format!("writing {}", path.display()))?;
    debug!(path = %path.display(), "wrote overlay frame");
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATASET: &str = r#"{
        "video_id": "survey-12",
        "fps": 10,
        "frames": [
            {"frame_id": 0, "potholes": []},
            {"frame_id": 2, "potholes": [
                {"pothole_id": 1, "bbox": {"x1": 2, "y1": 2, "x2": 12, "y2": 12}, "confidence": 0.87}
            ]},
            {"frame_id": 3, "potholes": [
                {"pothole_id": 1, "bbox": [3, 3, 13, 13], "confidence": 0.91}
            ], "signboards": [
                {"signboard_id": 4, "bbox": {"x1": 20, "y1": 2, "x2": 30, "y2": 20}, "confidence": 0.6}
            ]},
            {"frame_id": 6, "potholes": [{"bbox": [1, 2, 3, 4]}]}
        ]
    }"#;

    fn options(dir: &Path) -> ReplayOptions {
        ReplayOptions {
            width: 32,
            height: 32,
            duration_secs: None,
            output_dir: dir.to_path_buf(),
            save_frames: true,
        }
    }

    #[test]
    fn replay_writes_frames_log_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = DetectionDataset::from_json_str(DATASET).unwrap();
        let report = replay(&OverlayConfig::default(), &dataset, &options(dir.path())).unwrap();

        assert_eq!(report.fps, 10.0);
        assert_eq!(report.duration_secs, 0.7);
        assert_eq!(report.frames_written, 2);
        assert!(dir.path().join("frame_000002.png").exists());
        assert!(dir.path().join("frame_000003.png").exists());
        assert!(!dir.path().join("frame_000006.png").exists());

        let frames: Vec<u64> = report.log.iter().map(|entry| entry.frame).collect();
        assert_eq!(frames, vec![3, 2]);
        assert_eq!(report.max_outstanding_ticks, 1);

        let summary = report.summary.unwrap();
        assert_eq!(summary.total_detections, 3);

        let log: serde_json::Value =
            serde_json::from_reader(File::open(dir.path().join(LOG_FILE)).unwrap()).unwrap();
        assert_eq!(log[0]["frame"], 3);
        assert_eq!(log[1]["timestamp_display"], "00:00.200");
        let summary: serde_json::Value =
            serde_json::from_reader(File::open(dir.path().join(SUMMARY_FILE)).unwrap()).unwrap();
        assert_eq!(summary["frames_with_detections"], 2);
    }

    #[test]
    fn frames_can_be_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = DetectionDataset::from_json_str(DATASET).unwrap();
        let opts = ReplayOptions {
            save_frames: false,
            ..options(dir.path())
        };
        let report = replay(&OverlayConfig::default(), &dataset, &opts).unwrap();
        assert_eq!(report.frames_written, 0);
        assert_eq!(report.log.len(), 2);
        assert!(dir.path().join(SUMMARY_FILE).exists());
    }

    #[test]
    fn short_duration_cuts_the_replay() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = DetectionDataset::from_json_str(DATASET).unwrap();
        let opts = ReplayOptions {
            duration_secs: Some(0.22),
            ..options(dir.path())
        };
        let report = replay(&OverlayConfig::default(), &dataset, &opts).unwrap();
        let frames: Vec<u64> = report.log.iter().map(|entry| entry.frame).collect();
        assert_eq!(frames, vec![2]);
    }

    #[test]
    fn a_video_ending_on_a_detection_frame_logs_and_writes_it() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = DetectionDataset::from_json_str(DATASET).unwrap();
        let opts = ReplayOptions {
            duration_secs: Some(0.25),
            ..options(dir.path())
        };
        let report = replay(&OverlayConfig::default(), &dataset, &opts).unwrap();
        let frames: Vec<u64> = report.log.iter().map(|entry| entry.frame).collect();
        assert_eq!(frames, vec![3, 2]);
        assert_eq!(report.log[0].timestamp_display, "00:00.250");
        assert!(dir.path().join("frame_000003.png").exists());
        assert!(report.summary.is_some());
    }

    #[test]
    fn unusable_dataset_fps_uses_the_configured_rate() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = DetectionDataset::from_json_str(
            r#"{"fps": 0, "frames": [{"frame_id": 9, "potholes": []}]}"#,
        )
        .unwrap();
        let config = OverlayConfig::default().with_fps(20.0);
        let report = replay(&config, &dataset, &options(dir.path())).unwrap();
        assert_eq!(report.fps, 20.0);
        assert_eq!(report.duration_secs, 0.5);
    }
}
