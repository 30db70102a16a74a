// THEORY:
// The overlay actor is the async stand-in for a browser's render loop. It owns
// the engine, a `SimulatedVideo` for the loaded dataset, and a raster surface.
//
// Key architectural principles:
// 1.  **One Task, Two Inputs**: A `select!` over the command channel and a
//     display-rate interval. Commands become playback events; each interval
//     tick advances the video clock and fires the engine's pending tick, if
//     it asked for one.
// 2.  **Publish on Change**: After each input the actor compares the engine
//     snapshot to the last one it published and only then broadcasts a new
//     snapshot and (when anyone is listening) a freshly encoded PNG.
// 3.  **Orderly Shutdown**: `Shutdown` or a closed command channel ends the
//     loop, and the engine is unmounted so the video resources are released.

use std::time::Duration;

use pavement_overlay::core_modules::detection::DetectionDataset;
use pavement_overlay::core_modules::playback::SimulatedVideo;
use pavement_overlay::core_modules::scheduler::IntervalScheduler;
use pavement_overlay::core_modules::surface::RgbaSurface;
use pavement_overlay::{OverlayConfig, OverlayEngine, OverlaySnapshot, PlaybackPhase};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{ControlHandle, FramePacket, OverlayBus, PlaybackCommand};

/// Roughly one display refresh at 60 Hz.
pub const TICK_PERIOD: Duration = Duration::from_millis(16);

const COMMAND_QUEUE: usize = 32;

type HostedEngine = OverlayEngine<SimulatedVideo, RgbaSurface, IntervalScheduler>;

struct OverlayActor {
    engine: HostedEngine,
    bus: OverlayBus,
    published: Option<OverlaySnapshot>,
    loads: u64,
}

/// Spawns the actor task. Dropping every `ControlHandle` also stops it.
pub fn spawn_overlay_actor(
    config: OverlayConfig,
    surface: RgbaSurface,
    bus: OverlayBus,
) -> (ControlHandle, JoinHandle<()>) {
    let (command_tx, mut command_rx) = mpsc::channel::<PlaybackCommand>(COMMAND_QUEUE);

    let handle = tokio::spawn(async move {
        let mut engine = HostedEngine::new(config, IntervalScheduler::new());
        engine.attach_surface(surface);
        let mut actor = OverlayActor {
            engine,
            bus,
            published: None,
            loads: 0,
        };

        let mut interval = tokio::time::interval(TICK_PERIOD);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();

        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(PlaybackCommand::Shutdown) | None => break,
                    Some(command) => actor.handle(command),
                },
                now = interval.tick() => {
                    let elapsed = now.saturating_duration_since(last_tick);
                    last_tick = now;
                    actor.on_interval(elapsed);
                }
            }
            actor.publish_if_changed();
        }

        actor.engine.unmount();
        info!("overlay actor stopped");
    });

    (ControlHandle { command_tx }, handle)
}

impl OverlayActor {
    fn handle(&mut self, command: PlaybackCommand) {
        match command {
            PlaybackCommand::Load {
                dataset,
                duration_secs,
            } => self.load(&dataset, duration_secs),
            PlaybackCommand::Play => {
                if let Some(video) = self.engine.video_mut() {
                    video.play();
                }
                self.engine.on_play();
            }
            PlaybackCommand::Pause => {
                if let Some(video) = self.engine.video_mut() {
                    video.pause();
                }
                self.engine.on_pause();
            }
            PlaybackCommand::SeekStart => self.engine.on_seek_start(),
            PlaybackCommand::SeekTo(time_secs) => {
                if let Some(video) = self.engine.video_mut() {
                    video.seek_to(time_secs);
                }
                // A bare seek outside a scrub behaves like a timeupdate.
                if self.engine.phase() != PlaybackPhase::Seeking {
                    self.engine.on_time_update();
                }
            }
            PlaybackCommand::SeekEnd => self.engine.on_seek_end(),
            PlaybackCommand::Snapshot(reply) => {
                let _ = reply.send(self.engine.snapshot());
            }
            // Handled by the run loop.
            PlaybackCommand::Shutdown => {}
        }
    }

    fn load(&mut self, dataset: &DetectionDataset, duration_secs: f64) {
        self.loads += 1;
        let video = SimulatedVideo::new(duration_secs)
            .with_blob_url(format!("blob:overlay-visualizer/{}", self.loads));
        self.engine.load(dataset, video);
        self.engine.on_loaded_data();
    }

    fn on_interval(&mut self, elapsed: Duration) {
        let ended = self
            .engine
            .video_mut()
            .is_some_and(|video| video.advance(elapsed.as_secs_f64()));

        if let Some(tick) = self.engine.scheduler_mut().take_pending() {
            self.engine.on_tick(tick);
        }
        if ended && self.engine.phase() != PlaybackPhase::Ended {
            self.engine.on_ended();
        }
        self.engine.flush_counters();
    }

    fn publish_if_changed(&mut self) {
        let snapshot = self.engine.snapshot();
        if self.published.as_ref() == Some(&snapshot) {
            return;
        }

        if self.bus.frames_tx.receiver_count() > 0 {
            if let Some(packet) = self.encode_frame() {
                let _ = self.bus.frames_tx.send(packet);
            }
        }
        // No subscribers is not an error.
        let _ = self.bus.meta_tx.send(snapshot.clone());
        debug!(
            phase = ?snapshot.phase,
            frame = snapshot.counters.current_frame,
            "published overlay snapshot"
        );
        self.published = Some(snapshot);
    }

    fn encode_frame(&self) -> Option<FramePacket> {
        let surface = self.engine.surface()?;
        let data = match surface.encode_png() {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "failed to encode overlay frame");
                return None;
            }
        };
        let (width, height) = surface.image().dimensions();
        let ts_secs = self.engine.current_time().unwrap_or(0.0);
        Some(FramePacket {
            ts_millis: (ts_secs * 1000.0).round() as u64,
            frame: self.engine.counters().current_frame,
            width,
            height,
            format: image::ImageFormat::Png,
            data: data.into(),
        })
    }
}
