// src/dedup.rs
//
// Sliding time window of recently admitted violations.
//
// Tracker identity churn (occlusion, a missed detection longer than
// max_lost) can hand the same physical vehicle a fresh id right after it
// was recorded. A candidate that sits close to, and overlaps, a violation
// admitted within the last few seconds is treated as the same event.

use crate::geometry::iou;
use crate::types::DedupConfig;
use crate::violation_rules::{ViolationCandidate, ViolationLatch};
use std::collections::VecDeque;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct RecentViolation {
    pub track_id: u32,
    pub cx: f32,
    pub bottom_y: f32,
    pub bbox: [f32; 4],
    pub timestamp_ms: f64,
}

pub struct DeduplicationWindow {
    entries: VecDeque<RecentViolation>,
    config: DedupConfig,
}

impl DeduplicationWindow {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            entries: VecDeque::new(),
            config,
        }
    }

    /// Drop entries that are `max_age_secs` old or older.
    pub fn purge(&mut self, now_ms: f64) {
        let max_age_ms = self.config.max_age_secs * 1000.0;
        let before = self.entries.len();
        self.entries
            .retain(|entry| now_ms - entry.timestamp_ms < max_age_ms);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("Purged {} expired recent violation(s)", removed);
        }
    }

    /// The live entry this candidate duplicates, if any.
    pub fn find_duplicate(&self, candidate: &ViolationCandidate) -> Option<&RecentViolation> {
        let pos = self.config.position_threshold;
        self.entries.iter().find(|entry| {
            (candidate.cx - entry.cx).abs() < pos
                && (candidate.bottom_y - entry.bottom_y).abs() < pos
                && iou(&candidate.bbox, &entry.bbox) > self.config.iou_threshold
        })
    }

    /// Decide whether `candidate` is a new violation. The track id is latched
    /// either way; only an admitted candidate enters the window.
    pub fn admit(
        &mut self,
        candidate: &ViolationCandidate,
        now_ms: f64,
        latch: &mut ViolationLatch,
    ) -> bool {
        self.purge(now_ms);
        latch.latch(candidate.track_id);

        if let Some(prior) = self.find_duplicate(candidate) {
            info!(
                "♻️  Track #{} duplicates recent violation of track #{} ({:.1}s ago), not recording",
                candidate.track_id,
                prior.track_id,
                (now_ms - prior.timestamp_ms) / 1000.0
            );
            return false;
        }

        self.entries.push_back(RecentViolation {
            track_id: candidate.track_id,
            cx: candidate.cx,
            bottom_y: candidate.bottom_y,
            bbox: candidate.bbox,
            timestamp_ms: now_ms,
        });
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
