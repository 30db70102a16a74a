// THEORY:
// This file is the main entry point for the `pavement_overlay` library crate.
// It exposes the `OverlayEngine` and its associated data structures
// (`OverlayConfig`, `DetectionDataset`, `OverlaySnapshot`, etc.) as the public
// API consumed by the visualizer and the tester binaries.
//
// The engine answers one question many times per second: "which detections
// belong to the frame the video is showing right now, and what does the overlay
// look like for it?" The internal layers (`core_modules`) each own one piece of
// that answer: ingestion, the sparse frame lookup, time-to-frame arithmetic,
// drawing, the bounded event log, and tick scheduling. `engine` stitches them
// into the playback/seek state machine.

pub mod config;
pub mod core_modules;
pub mod engine;
pub mod error;

pub use config::OverlayConfig;
pub use engine::{OverlayCounters, OverlayEngine, OverlaySnapshot, PlaybackPhase};
pub use error::{OverlayError, Result};
