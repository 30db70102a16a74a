// THEORY:
// The `summary` module aggregates a whole dataset into the figures shown once
// the reviewer has watched the video to the end: how many frames had findings,
// how many detections of each class, how many distinct objects (by detection
// id), and how confident the detector was on average.
//
// It reads only the immutable `FrameLookup`, so it can run at any time without
// disturbing playback.

use crate::core_modules::detection::ClassLabel;
use crate::core_modules::frame_lookup::FrameLookup;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassSummary {
    pub class_label: ClassLabel,
    pub detections: usize,
    /// Distinct detection ids; a tracked object seen on many frames counts once.
    pub unique_objects: usize,
    pub mean_confidence: f32,
    pub max_confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DetectionSummary {
    pub frames_with_detections: usize,
    pub total_detections: usize,
    pub first_frame: Option<u64>,
    pub last_frame: Option<u64>,
    /// One row per class, in `ClassLabel` order.
    pub classes: Vec<ClassSummary>,
}

#[derive(Default)]
struct ClassTally {
    detections: usize,
    ids: HashSet<u64>,
    confidence_sum: f64,
    max_confidence: f32,
}

impl DetectionSummary {
    pub fn from_lookup(lookup: &FrameLookup) -> Self {
        let mut tallies: BTreeMap<ClassLabel, ClassTally> = BTreeMap::new();
        for (_, detections) in lookup.frames() {
            for detection in detections {
                let tally = tallies.entry(detection.class_label.clone()).or_default();
                tally.detections += 1;
                tally.ids.insert(detection.detection_id);
                tally.confidence_sum += f64::from(detection.confidence);
                tally.max_confidence = tally.max_confidence.max(detection.confidence);
            }
        }

        let classes = tallies
            .into_iter()
            .map(|(class_label, tally)| ClassSummary {
                class_label,
                detections: tally.detections,
                unique_objects: tally.ids.len(),
                mean_confidence: (tally.confidence_sum / tally.detections as f64) as f32,
                max_confidence: tally.max_confidence,
            })
            .collect();

        Self {
            frames_with_detections: lookup.frame_count(),
            total_detections: lookup.detection_count(),
            first_frame: lookup.first_frame(),
            last_frame: lookup.last_frame(),
            classes,
        }
    }

    pub fn class(&self, label: &ClassLabel) -> Option<&ClassSummary> {
        self.classes.iter().find(|summary| &summary.class_label == label)
    }
}
