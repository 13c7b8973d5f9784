// src/pipeline/frame_report.rs
//
// Everything one processing cycle produced for a frame. Read by the overlay,
// the display loop and the logs; never fed back into the pipeline.

use crate::recorder::ViolationRecord;
use crate::tracker::Track;
use crate::types::LightStates;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    Normal,
    /// Produced a violation decision on this frame
    Violating,
    /// Decided on an earlier frame
    Latched,
}

#[derive(Debug, Clone)]
pub struct TrackView {
    pub track: Track,
    pub status: TrackStatus,
}

#[derive(Debug, Clone)]
pub struct FrameReport {
    pub frame_index: u64,
    pub timestamp_ms: f64,
    pub lights: LightStates,
    pub detections: usize,
    pub tracks: Vec<TrackView>,
    /// Admitted and recorded this frame
    pub violations: Vec<ViolationRecord>,
    /// Track ids rejected as duplicates this frame
    pub duplicates: Vec<u32>,
    pub failures: Vec<String>,
    /// Admitted so far by this pipeline
    pub total_violations: u64,
}

impl FrameReport {
    /// One-line operator status: light states and cumulative violation count.
    pub fn status(&self) -> String {
        format!(
            "Left light: {} | Right light: {} | Violations recorded: {}",
            self.lights.left, self.lights.right, self.total_violations
        )
    }

    pub fn has_violation(&self) -> bool {
        !self.violations.is_empty()
    }

    pub fn active_tracks(&self) -> impl Iterator<Item = &TrackView> {
        self.tracks.iter().filter(|v| v.track.is_active())
    }
}
