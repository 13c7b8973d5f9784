// src/yolo.rs

use crate::detector::{nms, Detector};
use crate::preprocessing::{letterbox, Letterbox};
use crate::types::{Detection, DetectorConfig, Frame};
use anyhow::{Context, Result};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
};
use tracing::{debug, info};

const YOLO_INPUT_SIZE: usize = 640;
const YOLO_CLASSES: usize = 80;

pub struct YoloDetector {
    session: Session,
    confidence_threshold: f32,
    nms_iou_threshold: f32,
    vehicle_classes: Vec<u32>,
}

impl YoloDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self> {
        info!("Loading YOLO model: {}", config.model_path);

        let session = Session::builder()?
            .with_execution_providers([CUDAExecutionProvider::default().with_device_id(0).build()])?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(&config.model_path)
            .with_context(|| format!("Failed to load model {}", config.model_path))?;

        info!("✓ YOLO detector initialized");
        Ok(Self {
            session,
            confidence_threshold: config.confidence_threshold,
            nms_iou_threshold: config.nms_iou_threshold,
            vehicle_classes: config.vehicle_classes.clone(),
        })
    }

    fn infer(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let shape = [1, 3, YOLO_INPUT_SIZE, YOLO_INPUT_SIZE];
        let input_value =
            ort::value::Value::from_array((shape.as_slice(), input.to_vec().into_boxed_slice()))?;

        let outputs = self.session.run(ort::inputs!["images" => input_value])?;
        let output = &outputs[0];
        let (_, data) = output.try_extract_tensor::<f32>()?;

        Ok(data.to_vec())
    }
}

impl Detector for YoloDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let lb = letterbox(&frame.data, frame.width, frame.height, YOLO_INPUT_SIZE);
        let output = self.infer(&lb.input)?;
        let detections = decode_output(
            &output,
            &lb,
            self.confidence_threshold,
            &self.vehicle_classes,
        );
        let detections = nms(detections, self.nms_iou_threshold);
        debug!("Detected {} vehicles", detections.len());
        Ok(detections)
    }

    fn name(&self) -> &str {
        "yolo"
    }
}

/// Decode a YOLOv8 `[1, 4 + classes, anchors]` output into frame-space
/// detections, keeping vehicle classes above the confidence threshold.
fn decode_output(
    output: &[f32],
    lb: &Letterbox,
    conf_thresh: f32,
    vehicle_classes: &[u32],
) -> Vec<Detection> {
    let rows = 4 + YOLO_CLASSES;
    let anchors = output.len() / rows;
    let mut detections = Vec::new();

    for i in 0..anchors {
        let cx = output[i];
        let cy = output[anchors + i];
        let w = output[anchors * 2 + i];
        let h = output[anchors * 3 + i];

        let mut max_conf = 0.0f32;
        let mut best_class = 0u32;
        for c in 0..YOLO_CLASSES {
            let conf = output[anchors * (4 + c) + i];
            if conf > max_conf {
                max_conf = conf;
                best_class = c as u32;
            }
        }

        if max_conf < conf_thresh || !vehicle_classes.contains(&best_class) {
            continue;
        }

        let bbox = lb.unmap([cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]);
        detections.push(Detection {
            bbox,
            class_id: best_class,
            confidence: max_conf,
        });
    }

    detections
}
