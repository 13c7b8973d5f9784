// src/pipeline/orchestrator.rs
//
// One pipeline per video source. Owns all per-source state (tracker, latch,
// dedup window, counters); only the recorder is shared.
//
// Per frame, in order:
//   1. purge expired recent violations
//   2. classify both lights
//   3. detect + filter to vehicles (a detector error means no detections)
//   4. update tracks
//   5. evaluate rules -> dedup -> record

use super::frame_report::{FrameReport, TrackStatus, TrackView};
use super::metrics::PipelineMetrics;
use crate::dedup::DeduplicationWindow;
use crate::detector::{retain_vehicles, Detector};
use crate::light_classifier::LightClassifier;
use crate::recorder::{evidence_crop, ViolationRecorder};
use crate::tracker::CentroidTracker;
use crate::types::{Config, Frame, LightStates, LightsConfig};
use crate::violation_rules::{StopLineGeometry, ViolationLatch, ViolationRuleEngine};
use chrono::Local;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

pub struct ViolationPipeline {
    lights_config: LightsConfig,
    classifier: LightClassifier,
    tracker: CentroidTracker,
    rules: ViolationRuleEngine,
    latch: ViolationLatch,
    dedup: DeduplicationWindow,
    recorder: Arc<ViolationRecorder>,
    vehicle_classes: Vec<u32>,
    crop_padding: f32,
    metrics: PipelineMetrics,
    last_lights: LightStates,
}

impl ViolationPipeline {
    pub fn new(config: &Config, recorder: Arc<ViolationRecorder>) -> Self {
        Self {
            lights_config: config.lights.clone(),
            classifier: LightClassifier::new(config.lights.thresholds),
            tracker: CentroidTracker::new(config.tracker.clone()),
            rules: ViolationRuleEngine::new(StopLineGeometry::from_config(&config.stop_line)),
            latch: ViolationLatch::new(),
            dedup: DeduplicationWindow::new(config.dedup.clone()),
            recorder,
            vehicle_classes: config.detector.vehicle_classes.clone(),
            crop_padding: config.recorder.crop_padding,
            metrics: PipelineMetrics::new(),
            last_lights: LightStates::unknown(),
        }
    }

    pub fn process_frame(&mut self, frame: &Frame, detector: &mut dyn Detector) -> FrameReport {
        self.metrics.inc(&self.metrics.total_frames);
        let now_ms = frame.timestamp_ms;
        let mut failures = Vec::new();

        // 1. Expire recent violations before anything is evaluated
        self.dedup.purge(now_ms);

        // 2. Lights
        let lights = LightStates {
            left: self.classifier.classify_roi(frame, &self.lights_config.left),
            right: self.classifier.classify_roi(frame, &self.lights_config.right),
        };
        if lights != self.last_lights {
            debug!(
                "🚥 Lights changed at frame {}: left={} right={}",
                frame.index, lights.left, lights.right
            );
            self.last_lights = lights;
        }

        // 3. Detection
        let detect_start = Instant::now();
        let mut detections = match detector.detect(frame) {
            Ok(dets) => dets,
            Err(e) => {
                warn!(
                    "⚠️  Detector '{}' failed on frame {}: {:#}",
                    detector.name(),
                    frame.index,
                    e
                );
                self.metrics.inc(&self.metrics.detector_failures);
                failures.push(format!("detector failed: {:#}", e));
                Vec::new()
            }
        };
        self.metrics.set_timing(
            &self.metrics.detect_time_us,
            detect_start.elapsed().as_micros() as u64,
        );
        retain_vehicles(&mut detections, &self.vehicle_classes);
        if !detections.is_empty() {
            self.metrics.inc(&self.metrics.frames_with_vehicles);
        }

        // 4. Tracking
        let tracks = self.tracker.update(&detections);

        // 5. Rules, dedup, record
        let mut violating: HashSet<u32> = HashSet::new();
        let mut violations = Vec::new();
        let mut duplicates = Vec::new();

        for track in &tracks {
            let Some(candidate) = self.rules.evaluate(track, lights, &self.latch) else {
                continue;
            };
            self.metrics.inc(&self.metrics.candidates);
            violating.insert(track.id);

            if !self.dedup.admit(&candidate, now_ms, &mut self.latch) {
                self.metrics.inc(&self.metrics.duplicates);
                duplicates.push(candidate.track_id);
                continue;
            }

            let crop = evidence_crop(frame, &candidate.bbox, self.crop_padding);
            let outcome = self.recorder.record(&candidate, crop.as_ref(), Local::now());

            // Counted even when the write failed
            self.metrics.inc(&self.metrics.violations);
            if !outcome.failures.is_empty() {
                self.metrics.add(
                    &self.metrics.persistence_failures,
                    outcome.failures.len() as u64,
                );
                failures.extend(outcome.failures);
            }
            violations.push(outcome.record);
        }

        let tracks = tracks
            .into_iter()
            .map(|track| {
                let status = if violating.contains(&track.id) {
                    TrackStatus::Violating
                } else if self.latch.contains(track.id) {
                    TrackStatus::Latched
                } else {
                    TrackStatus::Normal
                };
                TrackView { track, status }
            })
            .collect();

        FrameReport {
            frame_index: frame.index,
            timestamp_ms: now_ms,
            lights,
            detections: detections.len(),
            tracks,
            violations,
            duplicates,
            failures,
            total_violations: self.total_violations(),
        }
    }

    pub fn total_violations(&self) -> u64 {
        self.metrics
            .violations
            .load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn latch(&self) -> &ViolationLatch {
        &self.latch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::ReplayDetector;
    use crate::types::{Detection, Rect, RecorderConfig, TrackerConfig};
    use anyhow::{bail, Result};
    use std::io::Cursor;
    use std::path::Path;

    const W: usize = 1280;
    const H: usize = 720;

    fn paint(data: &mut [u8], rect: Rect, rgb: [u8; 3]) {
        for y in rect.y1..rect.y2 {
            for x in rect.x1..rect.x2 {
                let i = (y as usize * W + x as usize) * 3;
                data[i..i + 3].copy_from_slice(&rgb);
            }
        }
    }

    fn frame(index: u64, timestamp_ms: f64, right: [u8; 3]) -> Frame {
        let config = Config::default();
        let mut data = vec![30u8; W * H * 3];
        paint(&mut data, config.lights.left.roi, [0, 255, 0]);
        paint(&mut data, config.lights.right.roi, right);
        Frame {
            index,
            data,
            width: W,
            height: H,
            timestamp_ms,
        }
    }

    const RED: [u8; 3] = [255, 0, 0];
    const GREEN: [u8; 3] = [0, 255, 0];

    fn setup(dir: &Path, tracker: TrackerConfig) -> ViolationPipeline {
        let mut config = Config::default();
        config.tracker = tracker;
        config.recorder = RecorderConfig {
            output_dir: dir.to_string_lossy().into_owned(),
            ..RecorderConfig::default()
        };
        let recorder = Arc::new(ViolationRecorder::open(&config.recorder).unwrap());
        ViolationPipeline::new(&config, recorder)
    }

    fn replay(jsonl: &str) -> ReplayDetector {
        ReplayDetector::from_reader(Cursor::new(jsonl.to_string())).unwrap()
    }

    struct FailingDetector;

    impl Detector for FailingDetector {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            bail!("model crashed")
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[test]
    fn test_red_light_runner_is_recorded_once() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = setup(tmp.path(), TrackerConfig::default());
        let mut det = replay(
            r#"{"frame": 1, "detections": [{"bbox": [650, 300, 750, 390], "class_id": 2}]}
{"frame": 2, "detections": [{"bbox": [655, 295, 755, 385], "class_id": 2}]}"#,
        );

        let r1 = p.process_frame(&frame(1, 0.0, RED), &mut det);
        assert_eq!(r1.lights.right, crate::types::LightState::Red);
        assert_eq!(r1.violations.len(), 1);
        assert_eq!(r1.violations[0].id, 1);
        assert_eq!(r1.violations[0].lane, "lane_2");
        assert_eq!(r1.tracks[0].status, TrackStatus::Violating);
        assert!(p.latch().contains(1));
        assert!(r1.status().ends_with("Violations recorded: 1"));

        let r2 = p.process_frame(&frame(2, 40.0, RED), &mut det);
        assert!(r2.violations.is_empty());
        assert_eq!(r2.tracks[0].track.id, 1);
        assert_eq!(r2.tracks[0].status, TrackStatus::Latched);
        assert_eq!(p.total_violations(), 1);
    }

    #[test]
    fn test_green_light_records_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = setup(tmp.path(), TrackerConfig::default());
        let mut det =
            replay(r#"{"frame": 1, "detections": [{"bbox": [650, 300, 750, 390], "class_id": 2}]}"#);

        let r = p.process_frame(&frame(1, 0.0, GREEN), &mut det);
        assert_eq!(r.lights.right, crate::types::LightState::Green);
        assert!(r.violations.is_empty());
        assert!(p.latch().is_empty());
        assert_eq!(r.tracks[0].status, TrackStatus::Normal);
    }

    #[test]
    fn test_reacquired_vehicle_is_duplicate() {
        let tmp = tempfile::tempdir().unwrap();
        // max_lost 0 so the first identity is gone after one missed frame
        let mut p = setup(
            tmp.path(),
            TrackerConfig {
                distance_threshold: 80.0,
                max_lost: 0,
            },
        );
        let mut det = replay(
            r#"{"frame": 1, "detections": [{"bbox": [600, 300, 700, 390], "class_id": 2}]}
{"frame": 3, "detections": [{"bbox": [630, 300, 730, 390], "class_id": 2}]}"#,
        );

        let r1 = p.process_frame(&frame(1, 0.0, RED), &mut det);
        assert_eq!(r1.violations.len(), 1);

        let r2 = p.process_frame(&frame(2, 250.0, RED), &mut det);
        assert!(r2.tracks.is_empty());

        let r3 = p.process_frame(&frame(3, 500.0, RED), &mut det);
        assert!(r3.violations.is_empty());
        assert_eq!(r3.duplicates, vec![2]);
        assert!(p.latch().contains(2));
        assert_eq!(p.metrics().summary().duplicates, 1);
        assert_eq!(p.total_violations(), 1);
    }

    #[test]
    fn test_detector_failure_continues_with_no_detections() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = setup(tmp.path(), TrackerConfig::default());
        let mut det = FailingDetector;

        let r = p.process_frame(&frame(1, 0.0, RED), &mut det);
        assert_eq!(r.detections, 0);
        assert_eq!(r.failures.len(), 1);
        assert!(r.failures[0].contains("model crashed"));
        assert_eq!(p.metrics().summary().detector_failures, 1);
    }

    #[test]
    fn test_persistence_failure_reaches_frame_report() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = setup(tmp.path(), TrackerConfig::default());
        let report = tmp.path().join("report.csv");
        std::fs::remove_file(&report).unwrap();
        std::fs::create_dir(&report).unwrap();
        let mut det =
            replay(r#"{"frame": 1, "detections": [{"bbox": [650, 300, 750, 390], "class_id": 2}]}"#);

        let r = p.process_frame(&frame(1, 0.0, RED), &mut det);
        assert_eq!(r.violations.len(), 1);
        assert_eq!(r.failures.len(), 1);
        assert!(r.failures[0].starts_with("report write failed"));
        let summary = p.metrics().summary();
        assert_eq!(summary.violations, 1);
        assert_eq!(summary.persistence_failures, 1);
    }

    #[test]
    fn test_non_vehicle_classes_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = setup(tmp.path(), TrackerConfig::default());
        let mut det =
            replay(r#"{"frame": 1, "detections": [{"bbox": [650, 300, 750, 390], "class_id": 0}]}"#);

        let r = p.process_frame(&frame(1, 0.0, RED), &mut det);
        assert_eq!(r.detections, 0);
        assert!(r.tracks.is_empty());
        assert!(r.violations.is_empty());
    }

    #[test]
    fn test_shared_recorder_numbers_across_pipelines() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.recorder.output_dir = tmp.path().to_string_lossy().into_owned();
        let recorder = Arc::new(ViolationRecorder::open(&config.recorder).unwrap());
        let mut a = ViolationPipeline::new(&config, Arc::clone(&recorder));
        let mut b = ViolationPipeline::new(&config, Arc::clone(&recorder));

        let jsonl = r#"{"frame": 1, "detections": [{"bbox": [650, 300, 750, 390], "class_id": 2}]}"#;
        let ra = a.process_frame(&frame(1, 0.0, RED), &mut replay(jsonl));
        let rb = b.process_frame(&frame(1, 0.0, RED), &mut replay(jsonl));

        assert_eq!(ra.violations[0].id, 1);
        assert_eq!(rb.violations[0].id, 2);
        // Each pipeline keeps its own count and latch
        assert_eq!(a.total_violations(), 1);
        assert_eq!(b.total_violations(), 1);
        assert_eq!(recorder.last_id(), 2);
    }
}
