use std::path::PathBuf;
use thiserror::Error;

/// Errors raised at the edges of the engine: reading datasets, fonts, config
/// files and writing overlay images. The playback state machine never fails.
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unrecognised detection dataset layout: {0}")]
    Dataset(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("font at {} could not be loaded", path.display())]
    Font { path: PathBuf },
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, OverlayError>;
