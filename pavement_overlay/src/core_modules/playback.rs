// THEORY:
// The engine never owns playback. The video element (or whatever stands in for
// it) decides where the playhead is, whether it is paused, and whether it has
// ended; the engine only polls that state through `PlaybackClock`.
//
// `SimulatedVideo` is a stand-in clock for hosts without a real decoder: the
// offline tester and the visualizer advance it by wall-clock or fixed steps and
// feed the resulting events to the engine. It also models the object URL a
// browser creates for a video blob, which must be released when the engine
// lets go of the video.

use serde::Serialize;
use tracing::debug;

pub trait PlaybackClock {
    /// Playhead position in seconds.
    fn current_time(&self) -> f64;
    fn is_paused(&self) -> bool;
    fn is_ended(&self) -> bool;
    /// Frees resources tied to the video (e.g. a blob object URL). Called once
    /// when the engine unmounts or swaps the video out.
    fn release(&mut self) {}
}

/// A plain snapshot of playback state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlaybackState {
    pub current_time: f64,
    pub paused: bool,
    pub ended: bool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            current_time: 0.0,
            paused: true,
            ended: false,
        }
    }
}

impl PlaybackClock for PlaybackState {
    fn current_time(&self) -> f64 {
        self.current_time
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn is_ended(&self) -> bool {
        self.ended
    }
}

/// A video clock of fixed duration that only moves when told to.
#[derive(Debug, Clone)]
pub struct SimulatedVideo {
    state: PlaybackState,
    duration_secs: f64,
    blob_url: Option<String>,
    released: bool,
}

impl SimulatedVideo {
    pub fn new(duration_secs: f64) -> Self {
        Self {
            state: PlaybackState::default(),
            duration_secs: duration_secs.max(0.0),
            blob_url: None,
            released: false,
        }
    }

    pub fn with_blob_url(mut self, url: impl Into<String>) -> Self {
        self.blob_url = Some(url.into());
        self
    }

    /// Starts playback. Playing an ended video restarts it from zero.
    pub fn play(&mut self) {
        if self.state.ended {
            self.state.current_time = 0.0;
            self.state.ended = false;
        }
        self.state.paused = false;
    }

    pub fn pause(&mut self) {
        self.state.paused = true;
    }

    pub fn seek_to(&mut self, time_secs: f64) {
        self.state.current_time = time_secs.clamp(0.0, self.duration_secs);
        self.state.ended = false;
    }

    /// Moves the playhead forward by `dt_secs` while playing. Returns `true`
    /// on the step that reaches the end.
    pub fn advance(&mut self, dt_secs: f64) -> bool {
        if self.state.paused || self.state.ended {
            return false;
        }
        self.state.current_time += dt_secs.max(0.0);
        if self.state.current_time >= self.duration_secs {
            self.state.current_time = self.duration_secs;
            self.state.ended = true;
            self.state.paused = true;
            return true;
        }
        false
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    pub fn blob_url(&self) -> Option<&str> {
        self.blob_url.as_deref()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl PlaybackClock for SimulatedVideo {
    fn current_time(&self) -> f64 {
        self.state.current_time
    }

    fn is_paused(&self) -> bool {
        self.state.paused
    }

    fn is_ended(&self) -> bool {
        self.state.ended
    }

    fn release(&mut self) {
        if let Some(url) = self.blob_url.take() {
            debug!(%url, "revoked video object url");
        }
        self.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_stops_at_the_end() {
        let mut video = SimulatedVideo::new(1.0);
        assert!(!video.advance(0.5), "paused video must not move");
        video.play();
        assert!(!video.advance(0.5));
        assert!(video.advance(0.75));
        assert_eq!(video.current_time(), 1.0);
        assert!(video.is_ended());
        assert!(video.is_paused());
    }

    #[test]
    fn playing_after_the_end_restarts() {
        let mut video = SimulatedVideo::new(1.0);
        video.play();
        video.advance(2.0);
        video.play();
        assert_eq!(video.current_time(), 0.0);
        assert!(!video.is_ended());
    }

    #[test]
    fn release_drops_the_blob_url() {
        let mut video = SimulatedVideo::new(3.0).with_blob_url("blob:survey/1");
        assert_eq!(video.blob_url(), Some("blob:survey/1"));
        video.release();
        assert!(video.is_released());
        assert_eq!(video.blob_url(), None);
    }

    #[test]
    fn seek_clamps_into_the_video() {
        let mut video = SimulatedVideo::new(2.0);
        video.seek_to(5.0);
        assert_eq!(video.current_time(), 2.0);
        video.seek_to(-1.0);
        assert_eq!(video.current_time(), 0.0);
    }
}
