// src/light_classifier.rs
//
// HSV-based traffic light state from a fixed ROI.
//
// Each pixel votes for at most one of three disjoint hue bands (red, yellow,
// green) and only when it is saturated and bright enough. The band with the
// most votes wins if it covers at least `min_area_ratio` of the ROI. Exact
// ties go to the more restrictive colour: red > yellow > green.

use crate::types::{Frame, LightMode, LightRoiConfig, LightState, LightThresholds};
use tracing::debug;

// ============================================================================
// HSV CONVERSION
// ============================================================================

/// Convert RGB to HSV.
/// Returns (H: 0-360, S: 0-100, V: 0-255).
#[inline]
pub fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let r_n = r / 255.0;
    let g_n = g / 255.0;
    let b_n = b / 255.0;

    let max = r_n.max(g_n).max(b_n);
    let min = r_n.min(g_n).min(b_n);
    let delta = max - min;

    let h = if delta < 1e-6 {
        0.0
    } else if (max - r_n).abs() < 1e-6 {
        60.0 * (((g_n - b_n) / delta) % 6.0)
    } else if (max - g_n).abs() < 1e-6 {
        60.0 * (((b_n - r_n) / delta) + 2.0)
    } else {
        60.0 * (((r_n - g_n) / delta) + 4.0)
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    let s = if max < 1e-6 {
        0.0
    } else {
        (delta / max) * 100.0
    };

    let v = max * 255.0;

    (h, s, v)
}

// ============================================================================
// BAND COUNTING
// ============================================================================

/// Per-band vote counts over one ROI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColorCounts {
    pub red: u32,
    pub yellow: u32,
    pub green: u32,
    /// All pixels in the ROI, voting or not
    pub total: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Band {
    Red,
    Yellow,
    Green,
}

fn band_of(h: f32, s: f32, v: f32, t: &LightThresholds) -> Option<Band> {
    if s <= t.min_saturation || v <= t.min_value {
        return None;
    }
    if h <= t.red_hue_low || h >= t.red_hue_high {
        Some(Band::Red)
    } else if h >= t.yellow_hue.0 && h <= t.yellow_hue.1 {
        Some(Band::Yellow)
    } else if h >= t.green_hue.0 && h <= t.green_hue.1 {
        Some(Band::Green)
    } else {
        None
    }
}

/// Count band votes over packed RGB pixels. Trailing bytes that do not form
/// a whole pixel are ignored.
pub fn count_bands(rgb: &[u8], thresholds: &LightThresholds) -> ColorCounts {
    let mut counts = ColorCounts::default();
    for px in rgb.chunks_exact(3) {
        counts.total += 1;
        let (h, s, v) = rgb_to_hsv(px[0] as f32, px[1] as f32, px[2] as f32);
        match band_of(h, s, v, thresholds) {
            Some(Band::Red) => counts.red += 1,
            Some(Band::Yellow) => counts.yellow += 1,
            Some(Band::Green) => counts.green += 1,
            None => {}
        }
    }
    counts
}

/// Pick a state from vote counts, before any side-specific remapping.
pub fn state_from_counts(counts: &ColorCounts, thresholds: &LightThresholds) -> LightState {
    if counts.total == 0 {
        return LightState::Unknown;
    }

    let max_count = counts.red.max(counts.yellow).max(counts.green);
    if max_count == 0 || (max_count as f32) < counts.total as f32 * thresholds.min_area_ratio {
        return LightState::Unknown;
    }

    if counts.red == max_count {
        LightState::Red
    } else if counts.yellow == max_count {
        LightState::Yellow
    } else {
        LightState::Green
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

/// Classify packed RGB pixels of one ROI. An empty region is UNKNOWN in every
/// mode; a `RedGreen` light reports RED for anything that is not GREEN.
pub fn classify(roi_pixels: &[u8], mode: LightMode, thresholds: &LightThresholds) -> LightState {
    if roi_pixels.len() < 3 {
        return LightState::Unknown;
    }

    let counts = count_bands(roi_pixels, thresholds);
    let base = state_from_counts(&counts, thresholds);

    match mode {
        LightMode::Full => base,
        LightMode::RedGreen => match base {
            LightState::Green => LightState::Green,
            _ => LightState::Red,
        },
    }
}

#[derive(Debug, Clone)]
pub struct LightClassifier {
    thresholds: LightThresholds,
}

impl LightClassifier {
    pub fn new(thresholds: LightThresholds) -> Self {
        Self { thresholds }
    }

    /// Clamp the ROI to the frame, sample it, and classify.
    pub fn classify_roi(&self, frame: &Frame, light: &LightRoiConfig) -> LightState {
        let Some(rect) = light.roi.clamp_to(frame.width, frame.height) else {
            debug!(
                "Light ROI {:?} outside {}x{} frame",
                light.roi, frame.width, frame.height
            );
            return LightState::Unknown;
        };

        let pixels = frame.region_pixels(&rect);
        classify(&pixels, light.mode, &self.thresholds)
    }
}
