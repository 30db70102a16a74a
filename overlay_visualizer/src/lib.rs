// THEORY:
// The visualizer hosts one `OverlayEngine` behind an async boundary so that
// anything on the network (or a test) can drive playback and watch the overlay.
//
// Key architectural principles:
// 1.  **Single Owner**: The engine lives inside one actor task (see `actor`).
//     Commands reach it over an mpsc channel; there is never shared access to
//     the engine, its log, or its surface.
// 2.  **Broadcast Out**: Rendered overlays (PNG) and engine snapshots fan out
//     through `OverlayBus`. Slow subscribers lag and skip; they never hold
//     up the actor.
// 3.  **Optional Web Surface**: The HTTP/WebSocket server is behind the `web`
//     feature. Without it the actor and bus are still usable headless.

pub mod actor;
#[cfg(feature = "web")]
mod server;

use std::sync::Arc;

use anyhow::{Context, anyhow};
use pavement_overlay::OverlaySnapshot;
use pavement_overlay::core_modules::detection::DetectionDataset;
use tokio::sync::{broadcast, mpsc, oneshot};

pub use actor::spawn_overlay_actor;

pub const ENV_BIND: &str = "PO_BIND";
pub const DEFAULT_BIND: &str = "127.0.0.1:3001";

/// One rendered overlay, already encoded.
#[derive(Debug, Clone)]
pub struct FramePacket {
    /// Playback position the overlay was rendered for.
    pub ts_millis: u64,
    pub frame: u64,
    pub width: u32,
    pub height: u32,
    pub format: image::ImageFormat,
    pub data: Arc<[u8]>,
}

#[derive(Clone)]
pub struct OverlayBus {
    pub frames_tx: broadcast::Sender<FramePacket>,
    pub meta_tx: broadcast::Sender<OverlaySnapshot>,
}

impl OverlayBus {
    pub fn new(capacity: usize) -> Self {
        let (frames_tx, _) = broadcast::channel::<FramePacket>(capacity.max(1));
        let (meta_tx, _) = broadcast::channel::<OverlaySnapshot>(capacity.max(1));
        Self { frames_tx, meta_tx }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND.to_string(),
        }
    }
}

impl ServerConfig {
    /// Reads `PO_BIND`, falling back to the default address.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(bind) = lookup(ENV_BIND).filter(|v| !v.is_empty()) {
            cfg.bind_addr = bind;
        }
        cfg
    }
}

/// Everything the overlay actor can be asked to do.
#[derive(Debug)]
pub enum PlaybackCommand {
    Load {
        dataset: DetectionDataset,
        duration_secs: f64,
    },
    Play,
    Pause,
    SeekStart,
    SeekTo(f64),
    SeekEnd,
    Snapshot(oneshot::Sender<OverlaySnapshot>),
    Shutdown,
}

#[derive(Clone)]
pub struct ControlHandle {
    pub command_tx: mpsc::Sender<PlaybackCommand>,
}

impl ControlHandle {
    pub async fn send(&self, command: PlaybackCommand) -> anyhow::Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| anyhow!("overlay actor has stopped"))
    }

    pub async fn load(&self, dataset: DetectionDataset, duration_secs: f64) -> anyhow::Result<()> {
        self.send(PlaybackCommand::Load {
            dataset,
            duration_secs,
        })
        .await
    }

    pub async fn play(&self) -> anyhow::Result<()> {
        self.send(PlaybackCommand::Play).await
    }

    pub async fn pause(&self) -> anyhow::Result<()> {
        self.send(PlaybackCommand::Pause).await
    }

    /// A complete scrub: start, move the playhead, release.
    pub async fn seek(&self, time_secs: f64) -> anyhow::Result<()> {
        self.send(PlaybackCommand::SeekStart).await?;
        self.send(PlaybackCommand::SeekTo(time_secs)).await?;
        self.send(PlaybackCommand::SeekEnd).await
    }

    pub async fn snapshot(&self) -> anyhow::Result<OverlaySnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(PlaybackCommand::Snapshot(reply_tx)).await?;
        reply_rx.await.context("overlay actor dropped the snapshot request")
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.send(PlaybackCommand::Shutdown).await
    }
}

#[cfg(feature = "web")]
pub async fn start_server(
    bus: OverlayBus,
    cfg: ServerConfig,
    control: ControlHandle,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    server::start(bus, cfg, control).await
}

#[cfg(not(feature = "web"))]
pub async fn start_server(
    _bus: OverlayBus,
    _cfg: ServerConfig,
    _control: ControlHandle,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    Err(anyhow!("web feature not enabled for overlay_visualizer"))
}
