// THEORY:
// The `FrameLookup` is the engine's only view of a dataset once it has been
// loaded. It maps a frame index to the ordered list of detections for that
// frame, and it is built exactly once per dataset.
//
// Key architectural principles:
// 1.  **Sparse Storage**: Long survey videos are mostly empty road. Frames with
//     zero detections are simply absent, and a lookup miss means "nothing to
//     draw".
// 2.  **Read-Only After Build**: The map lives behind an `Arc` and has no
//     mutating API. Cloning a lookup is cheap and every clone sees the same
//     data, so the render loop and any export or diagnostic code can read it
//     side by side without locks.
// 3.  **Insertion Order**: Detections keep the order the backend listed them
//     in. Duplicate frame records append to the existing list.

use crate::core_modules::detection::{DetectionDataset, DetectionRecord};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct FrameLookup {
    frames: Arc<BTreeMap<u64, Vec<DetectionRecord>>>,
    detection_total: usize,
}

impl FrameLookup {
    /// Builds the lookup from a normalised dataset, omitting empty frames.
    pub fn build(dataset: &DetectionDataset) -> Self {
        Self::from_records(
            dataset
                .frames
                .iter()
                .flat_map(|frame| frame.detections.iter().cloned()),
        )
    }

    /// Groups records by their `frame_id`, keeping their relative order.
    pub fn from_records(records: impl IntoIterator<Item = DetectionRecord>) -> Self {
        let mut frames: BTreeMap<u64, Vec<DetectionRecord>> = BTreeMap::new();
        let mut detection_total = 0;
        for record in records {
            frames.entry(record.frame_id).or_default().push(record);
            detection_total += 1;
        }
        Self {
            frames: Arc::new(frames),
            detection_total,
        }
    }

    /// The detections for `frame`, or an empty slice when there are none.
    pub fn detections_at(&self, frame: u64) -> &[DetectionRecord] {
        self.frames.get(&frame).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn contains(&self, frame: u64) -> bool {
        self.frames.contains_key(&frame)
    }

    /// Number of frames that carry at least one detection.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn detection_count(&self) -> usize {
        self.detection_total
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Non-empty frames in ascending frame order.
    pub fn frames(&self) -> impl Iterator<Item = (u64, &[DetectionRecord])> {
        self.frames
            .iter()
            .map(|(frame, detections)| (*frame, detections.as_slice()))
    }

    pub fn first_frame(&self) -> Option<u64> {
        self.frames.keys().next().copied()
    }

    pub fn last_frame(&self) -> Option<u64> {
        self.frames.keys().next_back().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::detection::{BoundingBox, ClassLabel, FrameDetections};

    fn record(frame_id: u64, detection_id: u64) -> DetectionRecord {
        DetectionRecord {
            detection_id,
            frame_id,
            bounding_box: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            confidence: 0.5,
            class_label: ClassLabel::Pothole,
        }
    }

    #[test]
    fn omits_frames_without_detections() {
        let dataset = DetectionDataset::from_frames(vec![
            FrameDetections { frame_id: 0, detections: vec![] },
            FrameDetections { frame_id: 5, detections: vec![record(5, 1)] },
            FrameDetections { frame_id: 6, detections: vec![] },
        ]);
        let lookup = FrameLookup::build(&dataset);
        assert_eq!(lookup.frame_count(), 1);
        assert!(!lookup.contains(0));
        assert!(lookup.detections_at(0).is_empty());
        assert!(lookup.detections_at(999).is_empty());
        assert_eq!(lookup.detections_at(5).len(), 1);
    }

    #[test]
    fn duplicate_frames_append_in_order() {
        let dataset = DetectionDataset::from_frames(vec![
            FrameDetections { frame_id: 9, detections: vec![record(9, 4), record(9, 2)] },
            FrameDetections { frame_id: 3, detections: vec![record(3, 1)] },
            FrameDetections { frame_id: 9, detections: vec![record(9, 7)] },
        ]);
        let lookup = FrameLookup::build(&dataset);
        let ids: Vec<u64> = lookup.detections_at(9).iter().map(|d| d.detection_id).collect();
        assert_eq!(ids, vec![4, 2, 7]);
        assert_eq!(lookup.detection_count(), 4);
        assert_eq!(lookup.first_frame(), Some(3));
        assert_eq!(lookup.last_frame(), Some(9));
        let order: Vec<u64> = lookup.frames().map(|(frame, _)| frame).collect();
        assert_eq!(order, vec![3, 9]);
    }

    #[test]
    fn clones_share_the_same_frames() {
        let lookup = FrameLookup::from_records(vec![record(1, 1)]);
        let reader = lookup.clone();
        let handle = std::thread::spawn(move || reader.detections_at(1).len());
        assert_eq!(handle.join().unwrap(), 1);
        assert_eq!(lookup.detections_at(1).len(), 1);
    }

    #[test]
    fn default_lookup_is_empty() {
        let lookup = FrameLookup::default();
        assert!(lookup.is_empty());
        assert_eq!(lookup.detection_count(), 0);
        assert_eq!(lookup.first_frame(), None);
    }
}
