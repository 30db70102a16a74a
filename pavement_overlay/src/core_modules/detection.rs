// THEORY:
// The `detection` module is the ingestion boundary of the overlay engine. The
// backend has produced per-frame results in several shapes over its lifetime
// (`potholes` and `signboards` lists with their own id fields, a generic
// `detections` list carrying a class name, boxes as objects or as arrays). All
// of those shapes are normalised here, exactly once, into a single canonical
// `DetectionRecord`.
//
// Key architectural principles:
// 1.  **Normalise Early**: Nothing downstream branches on the shape of the
//     source data. The frame lookup, renderer, log and summary only ever see
//     `DetectionRecord`s.
// 2.  **Permissive Ingestion**: The backend is the sole producer, so a record
//     that cannot be understood is dropped (and traced at `debug`) instead of
//     failing the whole dataset. A malformed frame is a frame with zero
//     detections. Only a document that is not a dataset at all is an error.
// 3.  **Immutable Records**: Once built, a record is never modified; it is
//     cloned into log entries and shared through the lookup.

use crate::error::{OverlayError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Class name used for generic detections that carry no class at all.
const UNLABELLED_CLASS: &str = "Detection";

/// An axis-aligned box in video pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Builds a box from two corners in any order; the result always has
    /// `x1 <= x2` and `y1 <= y2`.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }
}

/// What a detection is. The two classes the road survey produces are named;
/// anything else keeps the backend's own class name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ClassLabel {
    Pothole,
    Signboard,
    Other(String),
}

impl ClassLabel {
    /// Maps a backend class name onto a label, case-insensitively.
    pub fn from_name(name: &str) -> Self {
        let trimmed = name.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "pothole" | "potholes" => Self::Pothole,
            "signboard" | "signboards" | "sign" => Self::Signboard,
            "" => Self::Other(UNLABELLED_CLASS.to_string()),
            _ => Self::Other(trimmed.to_string()),
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Self::Pothole => "Pothole",
            Self::Signboard => "Signboard",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl From<String> for ClassLabel {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<ClassLabel> for String {
    fn from(label: ClassLabel) -> Self {
        label.display_name().to_string()
    }
}

/// The canonical form of a single detection, independent of the shape it
/// arrived in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub detection_id: u64,
    pub frame_id: u64,
    pub bounding_box: BoundingBox,
    /// Always within `[0, 1]`.
    pub confidence: f32,
    pub class_label: ClassLabel,
}

impl DetectionRecord {
    /// Confidence as a whole percentage, rounded to nearest.
    pub fn confidence_percent(&self) -> u32 {
        (self.confidence * 100.0).round() as u32
    }

    /// The text drawn next to the box, e.g. `Pothole #1 (87%)`.
    pub fn label_text(&self) -> String {
        format!(
            "{} #{} ({}%)",
            self.class_label,
            self.detection_id,
            self.confidence_percent()
        )
    }
}

/// All normalised detections for one frame record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameDetections {
    pub frame_id: u64,
    pub detections: Vec<DetectionRecord>,
}

/// A fully normalised detection result for one processed video.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionDataset {
    pub video_id: Option<String>,
    /// Frame rate the backend sampled the video at, when it reported one.
    pub fps: Option<f64>,
    pub frames: Vec<FrameDetections>,
}

impl DetectionDataset {
    pub fn from_frames(frames: Vec<FrameDetections>) -> Self {
        Self {
            video_id: None,
            fps: None,
            frames,
        }
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(json)?;
        Self::from_value(document)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let document: Value = serde_json::from_reader(reader)?;
        Self::from_value(document)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Accepts either a bare array of frame records or an object wrapping
    /// them as `{ "frames": [...], "fps": .., "video_id": .. }`.
    pub fn from_value(document: Value) -> Result<Self> {
        let (video_id, fps, raw_frames) = match document {
            Value::Array(frames) => (None, None, frames),
            Value::Object(mut object) => {
                let frames = match object.remove("frames") {
                    Some(Value::Array(frames)) => frames,
                    _ => {
                        return Err(OverlayError::Dataset(
                            "expected a `frames` array in the dataset object".to_string(),
                        ));
                    }
                };
                let fps = object.get("fps").and_then(Value::as_f64);
                let video_id = object.get("video_id").and_then(|id| match id {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                });
                (video_id, fps, frames)
            }
            _ => {
                return Err(OverlayError::Dataset(
                    "expected an array of frame records or an object with a `frames` array"
                        .to_string(),
                ));
            }
        };

        let total = raw_frames.len();
        let frames: Vec<FrameDetections> = raw_frames.iter().filter_map(normalize_frame).collect();
        if frames.len() < total {
            debug!(
                skipped = total - frames.len(),
                total, "dropped frame records without a usable frame id"
            );
        }

        Ok(Self {
            video_id,
            fps,
            frames,
        })
    }

    pub fn detection_count(&self) -> usize {
        self.frames.iter().map(|f| f.detections.len()).sum()
    }

    /// The dataset's own frame rate when it is usable, else `fallback`.
    pub fn effective_fps(&self, fallback: f64) -> f64 {
        self.fps
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .unwrap_or(fallback)
    }

    /// Seconds of video the records cover at `fps`, up to and including the
    /// last frame record.
    pub fn covered_secs(&self, fps: f64) -> f64 {
        let Some(last) = self.frames.iter().map(|f| f.frame_id).max() else {
            return 0.0;
        };
        if !fps.is_finite() || fps <= 0.0 {
            return 0.0;
        }
        (last + 1) as f64 / fps
    }
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(alias = "frame", alias = "frame_number")]
    frame_id: u64,
    #[serde(default)]
    potholes: Option<Value>,
    #[serde(default)]
    signboards: Option<Value>,
    #[serde(default)]
    detections: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawDetection {
    #[serde(alias = "pothole_id", alias = "signboard_id", alias = "detection_id")]
    id: Option<u64>,
    #[serde(alias = "bounding_box", alias = "box")]
    bbox: RawBox,
    #[serde(alias = "score", alias = "conf")]
    confidence: f64,
    #[serde(default, alias = "label", alias = "class")]
    class_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBox {
    Corners { x1: f32, y1: f32, x2: f32, y2: f32 },
    Array([f32; 4]),
}

impl RawBox {
    fn into_box(self) -> Option<BoundingBox> {
        let bbox = match self {
            RawBox::Corners { x1, y1, x2, y2 } => BoundingBox::new(x1, y1, x2, y2),
            RawBox::Array([x1, y1, x2, y2]) => BoundingBox::new(x1, y1, x2, y2),
        };
        bbox.is_finite().then_some(bbox)
    }
}

fn normalize_frame(value: &Value) -> Option<FrameDetections> {
    let raw = match RawFrame::deserialize(value) {
        Ok(raw) => raw,
        Err(err) => {
            debug!(%err, "skipping malformed frame record");
            return None;
        }
    };

    let sources = [
        ("potholes", raw.potholes.as_ref(), Some(ClassLabel::Pothole)),
        ("signboards", raw.signboards.as_ref(), Some(ClassLabel::Signboard)),
        ("detections", raw.detections.as_ref(), None),
    ];

    let mut detections = Vec::new();
    for (field, list, class) in sources {
        for item in detection_list(raw.frame_id, field, list) {
            match normalize_detection(item, raw.frame_id, class.as_ref()) {
                Some(record) => detections.push(record),
                None => debug!(frame = raw.frame_id, "skipping malformed detection"),
            }
        }
    }

    Some(FrameDetections {
        frame_id: raw.frame_id,
        detections,
    })
}

/// The entries of one per-class list; anything but an array counts as empty.
fn detection_list<'a>(frame_id: u64, field: &str, list: Option<&'a Value>) -> &'a [Value] {
    match list {
        None | Some(Value::Null) => &[],
        Some(Value::Array(items)) => items,
        Some(_) => {
            debug!(frame = frame_id, field, "detection list is not an array, treating it as empty");
            &[]
        }
    }
}

fn normalize_detection(
    value: &Value,
    frame_id: u64,
    class: Option<&ClassLabel>,
) -> Option<DetectionRecord> {
    let raw = RawDetection::deserialize(value).ok()?;
    let detection_id = raw.id?;
    let bounding_box = raw.bbox.into_box()?;
    if !raw.confidence.is_finite() {
        return None;
    }

    let class_label = match class {
        Some(label) => label.clone(),
        None => raw
            .class_name
            .as_deref()
            .map(ClassLabel::from_name)
            .unwrap_or_else(|| ClassLabel::Other(UNLABELLED_CLASS.to_string())),
    };

    Some(DetectionRecord {
        detection_id,
        frame_id,
        bounding_box,
        confidence: raw.confidence.clamp(0.0, 1.0) as f32,
        class_label,
    })
}
