// THEORY:
// The `timeline` module holds the arithmetic that ties the video clock to the
// detection data. A frame index is never stored: it is recomputed from the
// playback position every time something asks for it, so the overlay can
// never drift from what the video is showing.

/// Maps a playback position to a frame index: `round(time * fps)`.
///
/// Negative or non-finite positions count as the start of the video. A
/// non-positive or non-finite frame rate has no frame at all.
pub fn frame_index_at(time_secs: f64, fps: f64) -> Option<u64> {
    if !fps.is_finite() || fps <= 0.0 {
        return None;
    }
    let time = if time_secs.is_finite() && time_secs > 0.0 {
        time_secs
    } else {
        0.0
    };
    Some((time * fps).round() as u64)
}

/// True when the position is close enough to zero to count as a fresh start.
pub fn is_at_start(time_secs: f64, epsilon_secs: f64) -> bool {
    time_secs <= epsilon_secs
}

/// Formats a playback position as `MM:SS.mmm`.
pub fn format_timestamp(time_secs: f64) -> String {
    let clamped = if time_secs.is_finite() { time_secs.max(0.0) } else { 0.0 };
    let total_millis = (clamped * 1000.0).round() as u64;
    let minutes = total_millis / 60_000;
    let seconds = (total_millis / 1000) % 60;
    let millis = total_millis % 1000;
    format!("{minutes:02}:{seconds:02}.{millis:03}")
}
