// src/tracker.rs
//
// Greedy nearest-centroid tracker.
//
// Anchor point is (cx, bottom_y): the bottom edge is what crosses the stop
// line. Each detection, in arrival order, claims the closest track that has
// not been claimed yet this frame, provided it is within the distance
// threshold. First claim wins; there is no global assignment.

use crate::geometry::distance;
use crate::types::{Detection, TrackerConfig};
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: u32,
    pub bbox: [f32; 4],
    pub cx: f32,
    pub bottom_y: f32,
    pub class_id: u32,
    /// Consecutive frames without a match; 0 means matched this frame
    pub lost: u32,
}

impl Track {
    fn new(id: u32, det: &Detection) -> Self {
        let (cx, bottom_y) = det.anchor();
        Self {
            id,
            bbox: det.bbox,
            cx,
            bottom_y,
            class_id: det.class_id,
            lost: 0,
        }
    }

    fn apply(&mut self, det: &Detection) {
        let (cx, bottom_y) = det.anchor();
        self.bbox = det.bbox;
        self.cx = cx;
        self.bottom_y = bottom_y;
        self.class_id = det.class_id;
        self.lost = 0;
    }

    /// Matched in the most recent update; only active tracks are evaluated.
    pub fn is_active(&self) -> bool {
        self.lost == 0
    }

    pub fn anchor(&self) -> (f32, f32) {
        (self.cx, self.bottom_y)
    }
}

pub struct CentroidTracker {
    config: TrackerConfig,
    next_id: u32,
    tracks: BTreeMap<u32, Track>,
}

impl CentroidTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            next_id: 1,
            tracks: BTreeMap::new(),
        }
    }

    /// Consume one frame of detections and return every live track, matched
    /// or not, ordered by id.
    pub fn update(&mut self, detections: &[Detection]) -> Vec<Track> {
        let mut claimed: Vec<u32> = Vec::with_capacity(detections.len());

        for det in detections {
            let anchor = det.anchor();
            let mut best: Option<(u32, f32)> = None;

            for (id, track) in &self.tracks {
                if claimed.contains(id) {
                    continue;
                }
                let d = distance(anchor, track.anchor());
                if d > self.config.distance_threshold {
                    continue;
                }
                if best.map_or(true, |(_, best_d)| d < best_d) {
                    best = Some((*id, d));
                }
            }

            match best {
                Some((id, d)) => {
                    if let Some(track) = self.tracks.get_mut(&id) {
                        track.apply(det);
                        debug!("Track #{} matched ({:.1}px)", id, d);
                    }
                    claimed.push(id);
                }
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.tracks.insert(id, Track::new(id, det));
                    claimed.push(id);
                    info!(
                        "🆕 New vehicle tracked: ID #{}, type: {}",
                        id,
                        det.class_name()
                    );
                }
            }
        }

        let max_lost = self.config.max_lost;
        self.tracks.retain(|id, track| {
            if claimed.contains(id) {
                return true;
            }
            track.lost += 1;
            let keep = track.lost <= max_lost;
            if !keep {
                debug!("🗑️  Dropping track #{} after {} lost frames", id, track.lost);
            }
            keep
        });

        self.tracks.values().cloned().collect()
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    /// Number of identities ever issued.
    pub fn total_issued(&self) -> u32 {
        self.next_id - 1
    }
}
