// src/types.rs

use serde::{Deserialize, Serialize};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub video: VideoConfig,
    pub lights: LightsConfig,
    pub stop_line: StopLineConfig,
    pub tracker: TrackerConfig,
    pub dedup: DedupConfig,
    pub recorder: RecorderConfig,
    pub detector: DetectorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Video files, directories of videos, or camera indices ("0").
    pub sources: Vec<String>,
    /// Every decoded frame is resized to this size before processing.
    pub target_width: usize,
    pub target_height: usize,
    pub display: bool,
    pub save_annotated: bool,
    pub output_dir: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            sources: vec!["0".to_string()],
            target_width: 1280,
            target_height: 720,
            display: true,
            save_annotated: false,
            output_dir: "output".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LightsConfig {
    pub left: LightRoiConfig,
    pub right: LightRoiConfig,
    pub thresholds: LightThresholds,
}

impl Default for LightsConfig {
    fn default() -> Self {
        Self {
            left: LightRoiConfig {
                roi: Rect::new(6, 93, 36, 185),
                mode: LightMode::RedGreen,
            },
            right: LightRoiConfig {
                roi: Rect::new(1242, 30, 1272, 125),
                mode: LightMode::Full,
            },
            thresholds: LightThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightRoiConfig {
    pub roi: Rect,
    pub mode: LightMode,
}

/// Output alphabet of one physical light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightMode {
    /// RED / YELLOW / GREEN / UNKNOWN
    Full,
    /// Two-aspect light: anything that is not clearly green reads as RED.
    RedGreen,
}

/// HSV bands for light classification.
/// Hue in degrees [0, 360), saturation in percent [0, 100], value in [0, 255].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LightThresholds {
    /// Red wraps around 0°: hue <= red_hue_low OR hue >= red_hue_high
    pub red_hue_low: f32,
    pub red_hue_high: f32,
    pub yellow_hue: (f32, f32),
    pub green_hue: (f32, f32),
    /// Pixels must be strictly above both to vote
    pub min_saturation: f32,
    pub min_value: f32,
    /// Fraction of ROI pixels the winning band must reach
    pub min_area_ratio: f32,
}

impl Default for LightThresholds {
    fn default() -> Self {
        Self {
            red_hue_low: 20.0,
            red_hue_high: 320.0,
            yellow_hue: (30.0, 70.0),
            green_hue: (80.0, 170.0),
            min_saturation: 80.0 / 255.0 * 100.0,
            min_value: 80.0,
            min_area_ratio: 0.01,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StopLineConfig {
    /// Pixel row of the stop line; smaller y is further into the intersection.
    pub y: f32,
    /// Horizontal extent drawn on the overlay
    pub draw_x1: f32,
    pub draw_x2: f32,
    pub thickness: i32,
    pub lanes: Vec<LaneConfig>,
    pub guide_lines: Vec<GuideLineConfig>,
}

impl Default for StopLineConfig {
    fn default() -> Self {
        Self {
            y: 400.0,
            draw_x1: 89.0,
            draw_x2: 1086.0,
            thickness: 12,
            lanes: vec![LaneConfig {
                name: "lane_2".to_string(),
                x_min: 459.0,
                x_max: 1086.0,
                light: LightSide::Right,
            }],
            guide_lines: vec![
                GuideLineConfig {
                    label: "Line 3".to_string(),
                    from: (73, 401),
                    to: (352, 83),
                    light: LightSide::Left,
                },
                GuideLineConfig {
                    label: "Line S4".to_string(),
                    from: (1123, 370),
                    to: (1005, 81),
                    light: LightSide::Right,
                },
            ],
        }
    }
}

/// Horizontal span (x_min, x_max] controlled by one light.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneConfig {
    pub name: String,
    pub x_min: f32,
    pub x_max: f32,
    pub light: LightSide,
}

/// Decorative line on the overlay, coloured by the state of `light`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuideLineConfig {
    pub label: String,
    pub from: (i32, i32),
    pub to: (i32, i32),
    pub light: LightSide,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Max centroid distance (px, inclusive) to match a detection to a track
    pub distance_threshold: f32,
    /// A track is evicted once `lost` exceeds this
    pub max_lost: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            distance_threshold: 80.0,
            max_lost: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub max_age_secs: f64,
    pub position_threshold: f32,
    pub iou_threshold: f32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 5.0,
            position_threshold: 80.0,
            iou_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub output_dir: String,
    pub report_file: String,
    pub status_file: String,
    pub violation_type: String,
    pub initial_status: String,
    /// Evidence crop grows by this fraction of the bbox size on each side
    pub crop_padding: f32,
    pub jpeg_quality: u8,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_dir: "violations".to_string(),
            report_file: "report.csv".to_string(),
            status_file: "status.csv".to_string(),
            violation_type: "red_light".to_string(),
            initial_status: "pending".to_string(),
            crop_padding: 0.1,
            jpeg_quality: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub kind: DetectorKind,
    pub model_path: String,
    /// JSON Lines file with precomputed detections, for `kind: replay`
    pub replay_path: String,
    pub confidence_threshold: f32,
    pub nms_iou_threshold: f32,
    /// COCO class ids kept as vehicles: car, motorcycle, bus, truck
    pub vehicle_classes: Vec<u32>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            kind: DetectorKind::Onnx,
            model_path: "models/yolov8m.onnx".to_string(),
            replay_path: String::new(),
            confidence_threshold: 0.25,
            nms_iou_threshold: 0.45,
            vehicle_classes: vec![2, 3, 5, 7],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Onnx,
    Replay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "redlight_enforcer=info,ort=warn".to_string(),
        }
    }
}

// ============================================================================
// CORE TYPES
// ============================================================================

/// One RGB frame, row-major, 3 bytes per pixel.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub timestamp_ms: f64,
}

impl Frame {
    /// Copy the pixels of an already-clamped rectangle into a packed RGB buffer.
    pub fn region_pixels(&self, rect: &Rect) -> Vec<u8> {
        let x1 = rect.x1.max(0) as usize;
        let y1 = rect.y1.max(0) as usize;
        let x2 = (rect.x2.max(0) as usize).min(self.width);
        let y2 = (rect.y2.max(0) as usize).min(self.height);
        if x2 <= x1 || y2 <= y1 {
            return Vec::new();
        }

        let mut out = Vec::with_capacity((x2 - x1) * (y2 - y1) * 3);
        for y in y1..y2 {
            let start = (y * self.width + x1) * 3;
            let end = (y * self.width + x2) * 3;
            if end > self.data.len() {
                break;
            }
            out.extend_from_slice(&self.data[start..end]);
        }
        out
    }
}

/// Integer rectangle (x1, y1, x2, y2), exclusive on x2/y2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Rect {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Clamp to a `width` x `height` frame. `None` when nothing is left.
    pub fn clamp_to(&self, width: usize, height: usize) -> Option<Rect> {
        let w = width as i32;
        let h = height as i32;
        if w <= 0 || h <= 0 {
            return None;
        }
        // Entirely off-frame must not collapse onto the border column/row
        if self.x1 >= w || self.y1 >= h || self.x2 <= 0 || self.y2 <= 0 {
            return None;
        }
        let x1 = self.x1.clamp(0, w - 1);
        let y1 = self.y1.clamp(0, h - 1);
        let x2 = self.x2.clamp(0, w);
        let y2 = self.y2.clamp(0, h);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(Rect { x1, y1, x2, y2 })
    }
}

/// Per-frame object proposal from the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: [f32; 4], // [x1, y1, x2, y2] in frame coordinates
    pub class_id: u32,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

impl Detection {
    /// Tracking anchor: horizontal centre and bottom edge.
    pub fn anchor(&self) -> (f32, f32) {
        ((self.bbox[0] + self.bbox[2]) * 0.5, self.bbox[3])
    }

    pub fn class_name(&self) -> &'static str {
        class_id_to_name(self.class_id)
    }
}

pub fn class_id_to_name(class_id: u32) -> &'static str {
    match class_id {
        2 => "car",
        3 => "motorcycle",
        5 => "bus",
        7 => "truck",
        _ => "unknown",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LightState {
    Red,
    Yellow,
    Green,
    Unknown,
}

impl LightState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LightState::Red => "RED",
            LightState::Yellow => "YELLOW",
            LightState::Green => "GREEN",
            LightState::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for LightState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightSide {
    Left,
    Right,
}

impl LightSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            LightSide::Left => "LEFT",
            LightSide::Right => "RIGHT",
        }
    }
}

/// Latest reading of both lights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightStates {
    pub left: LightState,
    pub right: LightState,
}

impl LightStates {
    pub fn unknown() -> Self {
        Self {
            left: LightState::Unknown,
            right: LightState::Unknown,
        }
    }

    pub fn get(&self, side: LightSide) -> LightState {
        match side {
            LightSide::Left => self.left,
            LightSide::Right => self.right,
        }
    }
}
