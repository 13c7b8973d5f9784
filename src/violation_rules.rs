// src/violation_rules.rs
//
// Red-light rule evaluation over a single frame snapshot.
//
// A track is a candidate when all of the following hold in the same frame:
//   - its id is not latched
//   - it was matched this frame
//   - its cx falls inside a lane span (x_min, x_max]
//   - the light controlling that lane is RED
//   - its bottom edge is above the stop line (bottom_y < line_y)
//
// There is no "was behind the line last frame" check; a single frame past the
// line is enough.

use crate::tracker::Track;
use crate::types::{LaneConfig, LightSide, LightState, LightStates, StopLineConfig};
use std::collections::HashSet;
use tracing::debug;

// ============================================================================
// GEOMETRY
// ============================================================================

#[derive(Debug, Clone)]
pub struct LaneSpan {
    pub name: String,
    pub x_min: f32,
    pub x_max: f32,
    pub light: LightSide,
}

impl LaneSpan {
    pub fn contains(&self, x: f32) -> bool {
        x > self.x_min && x <= self.x_max
    }
}

impl From<&LaneConfig> for LaneSpan {
    fn from(cfg: &LaneConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            x_min: cfg.x_min,
            x_max: cfg.x_max,
            light: cfg.light,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StopLineGeometry {
    pub line_y: f32,
    pub lanes: Vec<LaneSpan>,
}

impl StopLineGeometry {
    pub fn from_config(cfg: &StopLineConfig) -> Self {
        Self {
            line_y: cfg.y,
            lanes: cfg.lanes.iter().map(LaneSpan::from).collect(),
        }
    }

    /// First lane whose span contains `x`.
    pub fn lane_at(&self, x: f32) -> Option<&LaneSpan> {
        self.lanes.iter().find(|lane| lane.contains(x))
    }
}

// ============================================================================
// LATCH
// ============================================================================

/// Track ids that already produced a violation decision. Membership is
/// permanent for the lifetime of the pipeline.
#[derive(Debug, Clone, Default)]
pub struct ViolationLatch {
    ids: HashSet<u32>,
}

impl ViolationLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, track_id: u32) -> bool {
        self.ids.contains(&track_id)
    }

    /// Returns false if the id was already latched.
    pub fn latch(&mut self, track_id: u32) -> bool {
        self.ids.insert(track_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

// ============================================================================
// ENGINE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ViolationCandidate {
    pub track_id: u32,
    pub bbox: [f32; 4],
    pub cx: f32,
    pub bottom_y: f32,
    pub class_id: u32,
    pub lane: String,
    pub lights: LightStates,
}

pub struct ViolationRuleEngine {
    geometry: StopLineGeometry,
}

impl ViolationRuleEngine {
    pub fn new(geometry: StopLineGeometry) -> Self {
        Self { geometry }
    }

    pub fn evaluate(
        &self,
        track: &Track,
        lights: LightStates,
        latch: &ViolationLatch,
    ) -> Option<ViolationCandidate> {
        if latch.contains(track.id) || !track.is_active() {
            return None;
        }

        let lane = self.geometry.lane_at(track.cx)?;
        if lights.get(lane.light) != LightState::Red {
            return None;
        }
        if track.bottom_y >= self.geometry.line_y {
            return None;
        }

        debug!(
            "🚦 Track #{} past stop line in {} (bottom_y={:.0} < {:.0}) on {} RED",
            track.id,
            lane.name,
            track.bottom_y,
            self.geometry.line_y,
            lane.light.as_str()
        );

        Some(ViolationCandidate {
            track_id: track.id,
            bbox: track.bbox,
            cx: track.cx,
            bottom_y: track.bottom_y,
            class_id: track.class_id,
            lane: lane.name.clone(),
            lights,
        })
    }
}
