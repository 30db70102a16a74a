// THEORY:
// The `engine` module is the top-level API of the overlay. `OverlayEngine`
// keeps the detection overlay in lockstep with a video it does not control.
//
// Two drivers can ask for a redraw:
// - the tick loop, a chain of scheduled ticks that runs while the video is
//   playing or the user is scrubbing, and
// - discrete playback events (`timeupdate`, `loadeddata`, `pause`) that
//   matter only while nothing is moving.
// The playback phase decides which driver is live, and the single outstanding
// `TickHandle` guarantees that the tick loop is never scheduled twice.
//
// Phases:
//   Idle     --play-->            Playing   (fresh play-through when at ~0s)
//   Playing  --tick-->            Playing   (render + log when the frame changed)
//   Playing  --pause-->           Paused    (one exact render, no log)
//   any      --seek start-->      Seeking   (render every tick, never log)
//   Seeking  --seek end-->        Paused | Playing (visited set forgotten)
//   any      --ended-->           Ended     (summary revealed the first time only)
//
// Everything the engine owns (lookup, log, visited set, pending tick, video
// resources) is scoped to one dataset/video pairing and is torn down by
// `load` and `unmount`.

use crate::config::OverlayConfig;
use crate::core_modules::detection::DetectionDataset;
use crate::core_modules::detection_log::{DetectionLog, DetectionLogEntry};
use crate::core_modules::frame_lookup::FrameLookup;
use crate::core_modules::playback::PlaybackClock;
use crate::core_modules::render::FrameRenderer;
use crate::core_modules::scheduler::{FrameScheduler, TickHandle};
use crate::core_modules::summary::DetectionSummary;
use crate::core_modules::surface::OverlaySurface;
use crate::core_modules::timeline::{format_timestamp, frame_index_at, is_at_start};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

// Re-export key data structures for the public API.
pub use crate::core_modules::detection::{BoundingBox, ClassLabel, DetectionRecord};
pub use crate::core_modules::render::{OverlayStyle, RenderOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackPhase {
    #[default]
    Idle,
    Playing,
    Seeking,
    Paused,
    Ended,
}

impl PlaybackPhase {
    /// Phases in which the tick loop, not playback events, drives redraws.
    pub fn is_loop_driven(&self) -> bool {
        matches!(self, PlaybackPhase::Playing | PlaybackPhase::Seeking)
    }
}

/// The two values the surrounding page displays next to the video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct OverlayCounters {
    pub current_frame: u64,
    pub detection_count: usize,
}

/// Everything a display needs, detached from the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlaySnapshot {
    pub phase: PlaybackPhase,
    pub counters: OverlayCounters,
    pub log: Vec<DetectionLogEntry>,
    pub summary_visible: bool,
    pub summary: Option<DetectionSummary>,
}

pub struct OverlayEngine<V, S, K>
where
    V: PlaybackClock,
    S: OverlaySurface,
    K: FrameScheduler,
{
    config: OverlayConfig,
    renderer: FrameRenderer,
    scheduler: K,
    /// The only tick this engine may act on.
    pending_tick: Option<TickHandle>,
    video: Option<V>,
    surface: Option<S>,
    fps: f64,
    lookup: FrameLookup,
    log: DetectionLog,
    phase: PlaybackPhase,
    last_processed_frame: Option<u64>,
    /// Counter values from the latest render, published on the next tick.
    staged_counters: Option<OverlayCounters>,
    counters: OverlayCounters,
    counters_tx: watch::Sender<OverlayCounters>,
    has_completed: bool,
    summary_visible: bool,
    summary: Option<DetectionSummary>,
}

impl<V, S, K> OverlayEngine<V, S, K>
where
    V: PlaybackClock,
    S: OverlaySurface,
    K: FrameScheduler,
{
    pub fn new(config: OverlayConfig, scheduler: K) -> Self {
        let (counters_tx, _) = watch::channel(OverlayCounters::default());
        Self {
            renderer: FrameRenderer::new(config.style),
            log: DetectionLog::new(config.max_log_entries),
            fps: config.fps,
            config,
            scheduler,
            pending_tick: None,
            video: None,
            surface: None,
            lookup: FrameLookup::default(),
            phase: PlaybackPhase::Idle,
            last_processed_frame: None,
            staged_counters: None,
            counters: OverlayCounters::default(),
            counters_tx,
            has_completed: false,
            summary_visible: false,
            summary: None,
        }
    }

    pub fn attach_surface(&mut self, surface: S) {
        self.surface = Some(surface);
    }

    pub fn detach_surface(&mut self) -> Option<S> {
        self.surface.take()
    }

    /// Pairs the engine with a new dataset and video. Whatever was loaded
    /// before is cancelled and released first.
    pub fn load(&mut self, dataset: &DetectionDataset, video: V) {
        self.teardown();

        self.fps = dataset.effective_fps(self.config.fps);
        self.lookup = FrameLookup::build(dataset);
        self.video = Some(video);

        info!(
            video_id = dataset.video_id.as_deref().unwrap_or("-"),
            frames = self.lookup.frame_count(),
            detections = self.lookup.detection_count(),
            fps = self.fps,
            "loaded detection dataset"
        );
    }

    /// Cancels outstanding work and releases the video and surface.
    pub fn unmount(&mut self) {
        self.teardown();
        self.surface = None;
        debug!("overlay engine unmounted");
    }

    fn teardown(&mut self) {
        self.cancel_pending_tick();
        if let Some(mut video) = self.video.take() {
            video.release();
        }
        self.lookup = FrameLookup::default();
        self.log = DetectionLog::new(self.config.max_log_entries);
        self.phase = PlaybackPhase::Idle;
        self.last_processed_frame = None;
        self.staged_counters = None;
        self.counters = OverlayCounters::default();
        self.counters_tx.send_replace(self.counters);
        self.has_completed = false;
        self.summary_visible = false;
        self.summary = None;
    }

    // --- Playback events ---

    pub fn on_play(&mut self) {
        if self.phase == PlaybackPhase::Seeking {
            // The seek loop keeps running; the seek end decides what follows.
            return;
        }
        let Some(now) = self.current_time() else {
            return;
        };
        if is_at_start(now, self.config.restart_epsilon_secs) {
            debug!("playback started from the beginning, starting a fresh play-through");
            self.log.reset();
            self.last_processed_frame = None;
        }
        self.phase = PlaybackPhase::Playing;
        self.schedule_tick();
    }

    pub fn on_pause(&mut self) {
        if matches!(self.phase, PlaybackPhase::Seeking | PlaybackPhase::Ended) {
            return;
        }
        self.cancel_pending_tick();
        self.phase = PlaybackPhase::Paused;
        self.render_current(false);
    }

    pub fn on_seek_start(&mut self) {
        self.phase = PlaybackPhase::Seeking;
        self.schedule_tick();
    }

    pub fn on_seek_end(&mut self) {
        self.cancel_pending_tick();
        self.log.forget_visited();
        self.render_current(false);
        // The landed frame must be logged if playback resumes from here.
        self.last_processed_frame = None;

        let paused = self.video.as_ref().is_none_or(|video| video.is_paused());
        if paused {
            self.phase = PlaybackPhase::Paused;
            self.request_flush_tick();
        } else {
            self.phase = PlaybackPhase::Playing;
            self.schedule_tick();
        }
    }

    /// Event-driven redraw for a moving playhead while the tick loop is idle.
    pub fn on_time_update(&mut self) {
        if self.phase.is_loop_driven() {
            return;
        }
        if let Some(frame) = self.current_frame_index() {
            if self.last_processed_frame != Some(frame) {
                self.render_frame(frame, false);
            }
        }
    }

    /// The first decoded frame is available; show its overlay.
    pub fn on_loaded_data(&mut self) {
        if self.phase.is_loop_driven() {
            return;
        }
        self.render_current(false);
    }

    /// Playback reached the end. Returns `true` only when this call revealed
    /// the summary, which happens once per loaded dataset.
    pub fn on_ended(&mut self) -> bool {
        self.cancel_pending_tick();
        self.phase = PlaybackPhase::Ended;
        self.request_flush_tick();
        if self.has_completed {
            return false;
        }
        self.has_completed = true;
        self.summary_visible = true;
        let summary = DetectionSummary::from_lookup(&self.lookup);
        info!(
            frames = summary.frames_with_detections,
            detections = summary.total_detections,
            logged = self.log.len(),
            "first play-through complete, revealing summary"
        );
        self.summary = Some(summary);
        true
    }

    /// Runs one scheduled tick. Ticks with a handle the engine no longer
    /// holds are stale and ignored.
    pub fn on_tick(&mut self, handle: TickHandle) {
        if self.pending_tick != Some(handle) {
            debug!(tick = handle.id(), "ignoring stale tick");
            return;
        }
        self.pending_tick = None;
        self.flush_counters();

        match self.phase {
            PlaybackPhase::Playing => {
                let ended = self.video.as_ref().is_some_and(|video| video.is_ended());
                if let Some(frame) = self.current_frame_index() {
                    if self.last_processed_frame != Some(frame) {
                        self.render_frame(frame, true);
                    }
                }
                if ended {
                    // The final frame is drawn and logged above.
                    self.on_ended();
                    return;
                }
                self.schedule_tick();
            }
            PlaybackPhase::Seeking => {
                if let Some(frame) = self.current_frame_index() {
                    self.render_frame(frame, false);
                }
                self.schedule_tick();
            }
            // Nothing moves; the tick only published the counters.
            PlaybackPhase::Idle | PlaybackPhase::Paused | PlaybackPhase::Ended => {}
        }
    }

    /// Publishes counters staged by the last render.
    pub fn flush_counters(&mut self) {
        if let Some(counters) = self.staged_counters.take() {
            self.counters = counters;
            self.counters_tx.send_replace(counters);
        }
    }

    // --- Rendering ---

    fn render_current(&mut self, log: bool) {
        if let Some(frame) = self.current_frame_index() {
            self.render_frame(frame, log);
        }
    }

    /// Draws `frame`, stages the counters, and logs the frame when `log` is
    /// set and it has detections not yet logged in this play-through.
    /// Outside the tick loop a tick is requested to publish the counters.
    /// Returns `false` when there is no surface to draw on.
    pub fn render_frame(&mut self, frame: u64, log: bool) -> bool {
        let Some(surface) = self.surface.as_mut() else {
            return false;
        };
        let outcome = self.renderer.render(surface, frame, &self.lookup);
        self.last_processed_frame = Some(frame);
        self.staged_counters = Some(OverlayCounters {
            current_frame: outcome.frame,
            detection_count: outcome.detection_count,
        });

        if log && outcome.detection_count > 0 && !self.log.has_logged(frame) {
            let timestamp_display = format_timestamp(self.current_time().unwrap_or(0.0));
            self.log.append(DetectionLogEntry {
                frame,
                detections: self.lookup.detections_at(frame).to_vec(),
                timestamp_display,
            });
        }
        if !self.phase.is_loop_driven() {
            self.request_flush_tick();
        }
        true
    }

    // --- Scheduling ---

    fn schedule_tick(&mut self) {
        self.cancel_pending_tick();
        self.pending_tick = Some(self.scheduler.request_tick());
    }

    /// Asks for a tick that only publishes staged counters, unless one is
    /// already outstanding.
    fn request_flush_tick(&mut self) {
        if self.staged_counters.is_some() && self.pending_tick.is_none() {
            self.pending_tick = Some(self.scheduler.request_tick());
        }
    }

    fn cancel_pending_tick(&mut self) {
        if let Some(handle) = self.pending_tick.take() {
            self.scheduler.cancel_tick(handle);
        }
    }

    // --- Observers ---

    pub fn current_time(&self) -> Option<f64> {
        self.video.as_ref().map(|video| video.current_time())
    }

    pub fn current_frame_index(&self) -> Option<u64> {
        frame_index_at(self.current_time()?, self.fps)
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.phase
    }

    pub fn counters(&self) -> OverlayCounters {
        self.counters
    }

    pub fn subscribe_counters(&self) -> watch::Receiver<OverlayCounters> {
        self.counters_tx.subscribe()
    }

    pub fn log(&self) -> &DetectionLog {
        &self.log
    }

    pub fn lookup(&self) -> &FrameLookup {
        &self.lookup
    }

    pub fn summary(&self) -> Option<&DetectionSummary> {
        self.summary.as_ref()
    }

    pub fn summary_visible(&self) -> bool {
        self.summary_visible
    }

    pub fn has_completed(&self) -> bool {
        self.has_completed
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn pending_tick(&self) -> Option<TickHandle> {
        self.pending_tick
    }

    pub fn surface(&self) -> Option<&S> {
        self.surface.as_ref()
    }

    pub fn video(&self) -> Option<&V> {
        self.video.as_ref()
    }

    pub fn video_mut(&mut self) -> Option<&mut V> {
        self.video.as_mut()
    }

    pub fn scheduler(&self) -> &K {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut K {
        &mut self.scheduler
    }

    pub fn snapshot(&self) -> OverlaySnapshot {
        OverlaySnapshot {
            phase: self.phase,
            counters: self.counters,
            log: self.log.to_vec(),
            summary_visible: self.summary_visible,
            summary: self.summary.clone(),
        }
    }
}

impl<V, S, K> Drop for OverlayEngine<V, S, K>
where
    V: PlaybackClock,
    S: OverlaySurface,
    K: FrameScheduler,
{
    fn drop(&mut self) {
        self.cancel_pending_tick();
        if let Some(mut video) = self.video.take() {
            video.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::core_modules::detection::FrameDetections;
    use crate::core_modules::playback::SimulatedVideo;
    use crate::core_modules::scheduler::ManualScheduler;
    use crate::core_modules::surface::RecordingSurface;

    type TestEngine = OverlayEngine<SimulatedVideo, RecordingSurface, ManualScheduler>;

    fn dataset() -> DetectionDataset {
        let record = |frame_id, detection_id| DetectionRecord {
            detection_id,
            frame_id,
            bounding_box: BoundingBox::new(10.0, 10.0, 50.0, 50.0),
            confidence: 0.9,
            class_label: ClassLabel::Pothole,
        };
        DetectionDataset::from_frames(vec![
            FrameDetections { frame_id: 2, detections: vec![record(2, 1)] },
            FrameDetections { frame_id: 3, detections: vec![record(3, 1), record(3, 2)] },
        ])
        .with_fps(10.0)
    }

    fn engine() -> TestEngine {
        let mut engine = TestEngine::new(OverlayConfig::default(), ManualScheduler::new());
        engine.attach_surface(RecordingSurface::new(320, 240));
        engine.load(&dataset(), SimulatedVideo::new(1.0).with_blob_url("blob:test"));
        engine
    }

    fn pump(engine: &mut TestEngine) {
        for handle in engine.scheduler_mut().take_due() {
            engine.on_tick(handle);
        }
    }

    /// A paused clock at 0s that counts how often it was released.
    struct CountingClock {
        releases: Rc<Cell<u32>>,
    }

    impl PlaybackClock for CountingClock {
        fn current_time(&self) -> f64 {
            0.0
        }

        fn is_paused(&self) -> bool {
            true
        }

        fn is_ended(&self) -> bool {
            false
        }

        fn release(&mut self) {
            self.releases.set(self.releases.get() + 1);
        }
    }

    type CountingEngine = OverlayEngine<CountingClock, RecordingSurface, ManualScheduler>;

    fn counting_clock() -> (CountingClock, Rc<Cell<u32>>) {
        let releases = Rc::new(Cell::new(0));
        (CountingClock { releases: Rc::clone(&releases) }, releases)
    }

    fn counting_engine() -> CountingEngine {
        let mut engine = CountingEngine::new(OverlayConfig::default(), ManualScheduler::new());
        engine.attach_surface(RecordingSurface::new(320, 240));
        engine
    }

    #[test]
    fn dataset_fps_overrides_config() {
        let engine = engine();
        assert_eq!(engine.fps(), 10.0);
        assert_eq!(engine.phase(), PlaybackPhase::Idle);
        assert_eq!(engine.current_frame_index(), Some(0));
    }

    #[test]
    fn counters_are_published_one_tick_late() {
        let mut engine = engine();
        let mut counters_rx = engine.subscribe_counters();
        engine.video_mut().unwrap().play();
        engine.on_play();
        engine.video_mut().unwrap().seek_to(0.3);
        pump(&mut engine);

        assert_eq!(engine.counters(), OverlayCounters::default());
        assert!(!counters_rx.has_changed().unwrap());

        pump(&mut engine);
        assert_eq!(
            engine.counters(),
            OverlayCounters { current_frame: 3, detection_count: 2 }
        );
        assert!(counters_rx.has_changed().unwrap());
        assert_eq!(counters_rx.borrow_and_update().detection_count, 2);
    }

    #[test]
    fn paused_redraws_publish_counters_on_the_next_tick() {
        let mut engine = engine();
        let mut counters_rx = engine.subscribe_counters();
        engine.video_mut().unwrap().seek_to(0.2);
        engine.on_time_update();
        assert_eq!(engine.scheduler().pending_count(), 1);
        assert_eq!(engine.counters(), OverlayCounters::default());

        pump(&mut engine);
        assert_eq!(
            engine.counters(),
            OverlayCounters { current_frame: 2, detection_count: 1 }
        );
        assert!(counters_rx.has_changed().unwrap());
        assert_eq!(engine.pending_tick(), None);

        engine.video_mut().unwrap().seek_to(0.3);
        engine.on_loaded_data();
        engine.on_time_update();
        pump(&mut engine);
        assert_eq!(
            engine.counters(),
            OverlayCounters { current_frame: 3, detection_count: 2 }
        );
        assert_eq!(engine.scheduler().max_outstanding(), 1);
    }

    #[test]
    fn pausing_publishes_the_exact_frame() {
        let mut engine = engine();
        engine.video_mut().unwrap().play();
        engine.on_play();
        engine.video_mut().unwrap().seek_to(0.3);
        engine.video_mut().unwrap().pause();
        engine.on_pause();
        assert_eq!(engine.scheduler().pending_count(), 1);

        pump(&mut engine);
        assert_eq!(
            engine.counters(),
            OverlayCounters { current_frame: 3, detection_count: 2 }
        );
        assert_eq!(engine.phase(), PlaybackPhase::Paused);
        assert_eq!(engine.pending_tick(), None);
    }

    #[test]
    fn stale_ticks_are_ignored() {
        let mut engine = engine();
        engine.video_mut().unwrap().play();
        engine.on_play();
        let first = engine.pending_tick().unwrap();
        engine.on_seek_start();
        let second = engine.pending_tick().unwrap();
        assert_ne!(first, second);
        assert_eq!(engine.scheduler().pending_count(), 1);

        engine.on_tick(first);
        assert_eq!(engine.pending_tick(), Some(second));
    }

    #[test]
    fn missing_surface_keeps_the_loop_alive() {
        let mut engine = engine();
        let surface = engine.detach_surface();
        assert!(surface.is_some());
        engine.video_mut().unwrap().play();
        engine.on_play();
        engine.video_mut().unwrap().seek_to(0.2);
        pump(&mut engine);
        assert!(engine.log().is_empty());
        assert!(engine.pending_tick().is_some());

        engine.attach_surface(RecordingSurface::new(320, 240));
        pump(&mut engine);
        assert_eq!(engine.log().len(), 1);
    }

    #[test]
    fn unmount_cancels_and_releases() {
        let mut engine = engine();
        engine.video_mut().unwrap().play();
        engine.on_play();
        assert_eq!(engine.scheduler().pending_count(), 1);

        engine.unmount();
        assert_eq!(engine.scheduler().pending_count(), 0);
        assert!(engine.video().is_none());
        assert!(engine.surface().is_none());
        assert!(engine.lookup().is_empty());
        assert_eq!(engine.phase(), PlaybackPhase::Idle);
    }

    #[test]
    fn loading_a_new_video_releases_the_old_one() {
        let mut engine = engine();
        engine.video_mut().unwrap().play();
        engine.on_play();
        engine.on_ended();
        assert!(engine.summary_visible());

        engine.load(&dataset(), SimulatedVideo::new(2.0));
        assert!(!engine.summary_visible());
        assert!(!engine.has_completed());
        assert_eq!(engine.scheduler().pending_count(), 0);
        assert_eq!(engine.video().map(|v| v.duration_secs()), Some(2.0));
    }

    #[test]
    fn unmount_releases_the_video_once() {
        let (clock, releases) = counting_clock();
        let mut engine = counting_engine();
        engine.load(&dataset(), clock);
        engine.on_loaded_data();
        assert_eq!(releases.get(), 0);

        engine.unmount();
        assert_eq!(releases.get(), 1);
        engine.unmount();
        drop(engine);
        assert_eq!(releases.get(), 1);
    }

    #[test]
    fn loading_again_releases_only_the_replaced_video() {
        let (first, first_releases) = counting_clock();
        let (second, second_releases) = counting_clock();
        let mut engine = counting_engine();
        engine.load(&dataset(), first);
        engine.load(&dataset(), second);
        assert_eq!(first_releases.get(), 1);
        assert_eq!(second_releases.get(), 0);

        drop(engine);
        assert_eq!(first_releases.get(), 1);
        assert_eq!(second_releases.get(), 1);
    }

    #[test]
    fn dropping_the_engine_releases_the_video_once() {
        let (clock, releases) = counting_clock();
        let mut engine = counting_engine();
        engine.load(&dataset(), clock);
        engine.on_play();
        assert!(engine.pending_tick().is_some());

        drop(engine);
        assert_eq!(releases.get(), 1);
    }

    #[test]
    fn no_video_means_no_frame() {
        let mut engine = TestEngine::new(OverlayConfig::default(), ManualScheduler::new());
        engine.attach_surface(RecordingSurface::new(10, 10));
        engine.on_play();
        engine.on_time_update();
        engine.on_loaded_data();
        assert_eq!(engine.phase(), PlaybackPhase::Idle);
        assert_eq!(engine.current_frame_index(), None);
        assert_eq!(engine.surface().map(|s| s.clear_count()), Some(0));
    }

    #[test]
    fn time_updates_only_redraw_when_idle_or_paused() {
        let mut engine = engine();
        engine.video_mut().unwrap().seek_to(0.2);
        engine.on_time_update();
        assert_eq!(engine.surface().map(|s| s.boxes().len()), Some(1));

        // Same frame again: nothing to do.
        engine.on_time_update();
        assert_eq!(engine.surface().map(|s| s.clear_count()), Some(1));

        engine.video_mut().unwrap().play();
        engine.on_play();
        engine.video_mut().unwrap().seek_to(0.3);
        engine.on_time_update();
        assert_eq!(engine.surface().map(|s| s.clear_count()), Some(1));
    }

    #[test]
    fn snapshot_carries_log_and_counters() {
        let mut engine = engine();
        engine.video_mut().unwrap().play();
        engine.on_play();
        engine.video_mut().unwrap().seek_to(0.2);
        pump(&mut engine);
        engine.flush_counters();

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.phase, PlaybackPhase::Playing);
        assert_eq!(snapshot.counters.current_frame, 2);
        assert_eq!(snapshot.log.len(), 1);
        assert_eq!(snapshot.log[0].timestamp_display, "00:00.200");
        assert!(!snapshot.summary_visible);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["phase"], "playing");
        assert_eq!(json["log"][0]["detections"][0]["class_label"], "Pothole");
    }
}
