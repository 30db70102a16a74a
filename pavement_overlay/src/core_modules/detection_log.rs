// THEORY:
// The `DetectionLog` is the running narrative shown beside the video: one
// entry per frame that had detections, newest first. It is pure in-memory UI
// state and is rebuilt from scratch for every session.
//
// Key architectural principles:
// 1.  **Bounded**: The log never grows past its capacity. Appending to a full
//     log evicts the oldest entry.
// 2.  **Once Per Play-Through**: A visited set remembers every frame already
//     logged since playback last started from the beginning. A repeated frame
//     is rejected even if its entry has since been evicted.
// 3.  **Explicit Resets**: Only a restart from the beginning clears entries.
//     Finishing a seek forgets the visited set but keeps the entries.

use crate::core_modules::detection::DetectionRecord;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};

pub const DEFAULT_LOG_CAPACITY: usize = 50;

/// One logged frame event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionLogEntry {
    pub frame: u64,
    pub detections: Vec<DetectionRecord>,
    pub timestamp_display: String,
}

#[derive(Debug, Clone)]
pub struct DetectionLog {
    /// Most recent entry at the front.
    entries: VecDeque<DetectionLogEntry>,
    /// Frames logged during the current play-through.
    visited: HashSet<u64>,
    capacity: usize,
}

impl DetectionLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            visited: HashSet::new(),
            capacity,
        }
    }

    /// Prepends `entry` unless its frame was already logged in this
    /// play-through. Returns whether the entry was accepted.
    pub fn append(&mut self, entry: DetectionLogEntry) -> bool {
        if !self.visited.insert(entry.frame) {
            return false;
        }
        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);
        true
    }

    pub fn has_logged(&self, frame: u64) -> bool {
        self.visited.contains(&frame)
    }

    /// Starts a fresh play-through: drops every entry and the visited set.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.visited.clear();
    }

    /// Lets every frame be logged again without dropping existing entries.
    pub fn forget_visited(&mut self) {
        self.visited.clear();
    }

    /// Entries from most recent to oldest.
    pub fn entries(&self) -> impl Iterator<Item = &DetectionLogEntry> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&DetectionLogEntry> {
        self.entries.front()
    }

    pub fn to_vec(&self) -> Vec<DetectionLogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for DetectionLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
