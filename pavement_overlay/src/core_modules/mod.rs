pub mod detection;
pub mod detection_log;
pub mod frame_lookup;
pub mod playback;
pub mod render;
pub mod scheduler;
pub mod summary;
pub mod surface;
pub mod timeline;
