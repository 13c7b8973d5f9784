// src/detector.rs
//
// Detector seam. The pipeline only needs per-frame vehicle boxes; where they
// come from (ONNX model, precomputed file) is behind the `Detector` trait.

use crate::geometry::iou;
use crate::types::{Detection, DetectorConfig, DetectorKind, Frame};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info};

pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    fn name(&self) -> &str;
}

/// Keep only detections whose class is in the vehicle allow-list.
pub fn retain_vehicles(detections: &mut Vec<Detection>, vehicle_classes: &[u32]) {
    detections.retain(|d| vehicle_classes.contains(&d.class_id));
}

/// Greedy non-maximum suppression, highest confidence first.
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        if keep.iter().all(|k| iou(&k.bbox, &det.bbox) < iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

// ============================================================================
// REPLAY
// ============================================================================

#[derive(Debug, Deserialize)]
struct ReplayLine {
    frame: u64,
    #[serde(default)]
    detections: Vec<Detection>,
}

/// Serves precomputed detections from a JSON Lines file, one
/// `{"frame": n, "detections": [...]}` object per line. Frames with no entry
/// have no detections.
pub struct ReplayDetector {
    by_frame: HashMap<u64, Vec<Detection>>,
    name: String,
}

impl ReplayDetector {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open replay file {}", path.display()))?;
        let detector = Self::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse replay file {}", path.display()))?;
        info!(
            "📼 Replay detector loaded {} frame(s) from {}",
            detector.by_frame.len(),
            path.display()
        );
        Ok(detector)
    }

    pub fn from_reader(reader: impl BufRead) -> Result<Self> {
        let mut by_frame: HashMap<u64, Vec<Detection>> = HashMap::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let entry: ReplayLine = serde_json::from_str(trimmed)
                .with_context(|| format!("line {}", lineno + 1))?;
            by_frame
                .entry(entry.frame)
                .or_default()
                .extend(entry.detections);
        }
        Ok(Self {
            by_frame,
            name: "replay".to_string(),
        })
    }
}

impl Detector for ReplayDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let dets = self.by_frame.get(&frame.index).cloned().unwrap_or_default();
        debug!("Replay frame {}: {} detection(s)", frame.index, dets.len());
        Ok(dets)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Construct the detector selected in the configuration.
pub fn build_detector(config: &DetectorConfig) -> Result<Box<dyn Detector>> {
    match config.kind {
        DetectorKind::Replay => {
            if config.replay_path.is_empty() {
                bail!("detector.kind is replay but detector.replay_path is empty");
            }
            Ok(Box::new(ReplayDetector::load(&config.replay_path)?))
        }
        DetectorKind::Onnx => build_onnx(config),
    }
}

#[cfg(feature = "onnx")]
fn build_onnx(config: &DetectorConfig) -> Result<Box<dyn Detector>> {
    Ok(Box::new(crate::yolo::YoloDetector::new(config)?))
}

#[cfg(not(feature = "onnx"))]
fn build_onnx(config: &DetectorConfig) -> Result<Box<dyn Detector>> {
    tracing::warn!(
        "ONNX detector requested for {} but the `onnx` feature is disabled",
        config.model_path
    );
    bail!("detector.kind onnx requires building with --features onnx")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn det(bbox: [f32; 4], class_id: u32, confidence: f32) -> Detection {
        Detection {
            bbox,
            class_id,
            confidence,
        }
    }

    fn frame(index: u64) -> Frame {
        Frame {
            index,
            data: Vec::new(),
            width: 0,
            height: 0,
            timestamp_ms: 0.0,
        }
    }

    #[test]
    fn test_retain_vehicles_filters_classes() {
        let mut dets = vec![
            det([0.0, 0.0, 1.0, 1.0], 0, 0.9), // person
            det([0.0, 0.0, 1.0, 1.0], 2, 0.9),
            det([0.0, 0.0, 1.0, 1.0], 7, 0.9),
            det([0.0, 0.0, 1.0, 1.0], 9, 0.9), // traffic light
        ];
        retain_vehicles(&mut dets, &[2, 3, 5, 7]);
        assert_eq!(dets.iter().map(|d| d.class_id).collect::<Vec<_>>(), vec![2, 7]);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let dets = vec![
            det([0.0, 0.0, 100.0, 100.0], 2, 0.6),
            det([5.0, 5.0, 105.0, 105.0], 2, 0.9),
            det([300.0, 0.0, 400.0, 100.0], 2, 0.5),
        ];
        let kept = nms(dets, 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].bbox[0], 300.0);
    }

    #[test]
    fn test_replay_serves_by_frame_index() {
        let jsonl = r#"
{"frame": 1, "detections": [{"bbox": [600, 300, 700, 390], "class_id": 2, "confidence": 0.8}]}
{"frame": 3, "detections": [{"bbox": [10, 10, 50, 50], "class_id": 7}]}
{"frame": 3, "detections": [{"bbox": [60, 10, 90, 50], "class_id": 3}]}
"#;
        let mut r = ReplayDetector::from_reader(Cursor::new(jsonl)).unwrap();
        assert_eq!(r.detect(&frame(1)).unwrap().len(), 1);
        assert!(r.detect(&frame(2)).unwrap().is_empty());

        let third = r.detect(&frame(3)).unwrap();
        assert_eq!(third.len(), 2);
        assert_eq!(third[0].confidence, 1.0);
    }

    #[test]
    fn test_replay_reports_bad_line() {
        let err = ReplayDetector::from_reader(Cursor::new("{\"frame\": 1}\nnot json\n"))
            .err()
            .unwrap();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[test]
    fn test_replay_kind_requires_path() {
        let cfg = DetectorConfig {
            kind: DetectorKind::Replay,
            ..DetectorConfig::default()
        };
        assert!(build_detector(&cfg).is_err());
    }
}
