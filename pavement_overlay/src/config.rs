// THEORY:
// `OverlayConfig` collects every tunable of the engine in one plain struct, in
// the same spirit as a pipeline configuration: hosts build it with defaults,
// optionally read it from a JSON file, then let environment variables override
// individual values.

use crate::core_modules::detection_log::DEFAULT_LOG_CAPACITY;
use crate::core_modules::render::OverlayStyle;
use crate::core_modules::surface::RgbaSurface;
use crate::error::{OverlayError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const ENV_FPS: &str = "PAVEMENT_OVERLAY_FPS";
pub const ENV_MAX_LOG: &str = "PAVEMENT_OVERLAY_MAX_LOG";
pub const ENV_FONT: &str = "PAVEMENT_OVERLAY_FONT";

/// Configuration for the OverlayEngine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Frame rate used to map playback time to frame indices when the
    /// dataset does not report its own.
    pub fps: f64,
    /// Maximum number of entries kept in the detection log.
    pub max_log_entries: usize,
    /// A play that starts within this many seconds of zero begins a fresh
    /// play-through.
    pub restart_epsilon_secs: f64,
    pub style: OverlayStyle,
    /// TrueType font for label text on raster surfaces.
    pub font_path: Option<PathBuf>,
    pub label_font_px: f32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            fps: 30.0,
            max_log_entries: DEFAULT_LOG_CAPACITY,
            restart_epsilon_secs: 0.1,
            style: OverlayStyle::default(),
            font_path: None,
            label_font_px: 16.0,
        }
    }
}

impl OverlayConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_max_log_entries(mut self, max_log_entries: usize) -> Self {
        self.max_log_entries = max_log_entries;
        self
    }

    pub fn with_font_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_path = Some(path.into());
        self
    }

    /// Applies `PAVEMENT_OVERLAY_*` environment overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from any key/value source. Values that do not parse
    /// are ignored with a warning.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(ENV_FPS).filter(|v| !v.is_empty()) {
            match raw.parse::<f64>() {
                Ok(fps) => self.fps = fps,
                Err(_) => warn!(key = ENV_FPS, value = %raw, "ignoring unparsable override"),
            }
        }
        if let Some(raw) = lookup(ENV_MAX_LOG).filter(|v| !v.is_empty()) {
            match raw.parse::<usize>() {
                Ok(max) => self.max_log_entries = max,
                Err(_) => warn!(key = ENV_MAX_LOG, value = %raw, "ignoring unparsable override"),
            }
        }
        if let Some(raw) = lookup(ENV_FONT).filter(|v| !v.is_empty()) {
            self.font_path = Some(PathBuf::from(raw));
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(OverlayError::Config(format!(
                "fps must be a positive number, got {}",
                self.fps
            )));
        }
        if self.max_log_entries == 0 {
            return Err(OverlayError::Config(
                "max_log_entries must be at least 1".to_string(),
            ));
        }
        if !self.restart_epsilon_secs.is_finite() || self.restart_epsilon_secs < 0.0 {
            return Err(OverlayError::Config(format!(
                "restart_epsilon_secs must be zero or more, got {}",
                self.restart_epsilon_secs
            )));
        }
        if !self.label_font_px.is_finite() || self.label_font_px <= 0.0 {
            return Err(OverlayError::Config(format!(
                "label_font_px must be positive, got {}",
                self.label_font_px
            )));
        }
        Ok(())
    }

    /// Builds a raster surface, loading the label font when one is configured.
    pub fn raster_surface(&self, width: u32, height: u32) -> Result<RgbaSurface> {
        let surface = RgbaSurface::new(width, height);
        match &self.font_path {
            Some(path) => {
                let font = RgbaSurface::load_font(path)?;
                Ok(surface.with_font(font, self.label_font_px))
            }
            None => {
                warn!("no label font configured; overlay labels will have no text");
                Ok(surface)
            }
        }
    }
}
