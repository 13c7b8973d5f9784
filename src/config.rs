// src/config.rs

use crate::types::Config;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::from_yaml(&contents)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with. Degenerate light ROIs are
    /// allowed on purpose: they classify as UNKNOWN at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.video.target_width == 0 || self.video.target_height == 0 {
            bail!(
                "video.target size must be non-zero, got {}x{}",
                self.video.target_width,
                self.video.target_height
            );
        }

        let t = &self.lights.thresholds;
        if !(0.0..=1.0).contains(&t.min_area_ratio) {
            bail!(
                "lights.thresholds.min_area_ratio must be in [0, 1], got {}",
                t.min_area_ratio
            );
        }
        for (name, (lo, hi)) in [("yellow_hue", t.yellow_hue), ("green_hue", t.green_hue)] {
            if lo > hi {
                bail!("lights.thresholds.{} is inverted: {} > {}", name, lo, hi);
            }
        }

        if self.stop_line.lanes.is_empty() {
            bail!("stop_line.lanes must contain at least one lane");
        }
        for lane in &self.stop_line.lanes {
            if lane.x_max <= lane.x_min {
                bail!(
                    "lane '{}' has an empty span ({}, {}]",
                    lane.name,
                    lane.x_min,
                    lane.x_max
                );
            }
        }

        if self.tracker.distance_threshold <= 0.0 {
            bail!(
                "tracker.distance_threshold must be positive, got {}",
                self.tracker.distance_threshold
            );
        }

        if self.dedup.max_age_secs <= 0.0 {
            bail!(
                "dedup.max_age_secs must be positive, got {}",
                self.dedup.max_age_secs
            );
        }
        if !(0.0..=1.0).contains(&self.dedup.iou_threshold) {
            bail!(
                "dedup.iou_threshold must be in [0, 1], got {}",
                self.dedup.iou_threshold
            );
        }

        if self.recorder.crop_padding < 0.0 {
            bail!(
                "recorder.crop_padding must not be negative, got {}",
                self.recorder.crop_padding
            );
        }
        if self.recorder.jpeg_quality == 0 || self.recorder.jpeg_quality > 100 {
            bail!(
                "recorder.jpeg_quality must be in 1..=100, got {}",
                self.recorder.jpeg_quality
            );
        }

        if self.detector.vehicle_classes.is_empty() {
            bail!("detector.vehicle_classes must not be empty");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LightMode, LightSide};

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.video.target_width, 1280);
        assert_eq!(config.video.target_height, 720);
        assert_eq!(config.stop_line.y, 400.0);
        assert_eq!(config.stop_line.lanes.len(), 1);
        assert_eq!(config.stop_line.lanes[0].light, LightSide::Right);
        assert_eq!(config.lights.left.mode, LightMode::RedGreen);
        assert_eq!(config.lights.right.mode, LightMode::Full);
        assert_eq!(config.tracker.max_lost, 10);
        assert_eq!(config.detector.vehicle_classes, vec![2, 3, 5, 7]);
    }

    #[test]
    fn test_partial_override() {
        let yaml = r#"
tracker:
  distance_threshold: 50
stop_line:
  y: 380
  lanes:
    - { name: lane_1, x_min: 89, x_max: 459, light: left }
    - { name: lane_2, x_min: 459, x_max: 1086, light: right }
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.tracker.distance_threshold, 50.0);
        assert_eq!(config.tracker.max_lost, 10);
        assert_eq!(config.stop_line.y, 380.0);
        assert_eq!(config.stop_line.lanes.len(), 2);
        assert_eq!(config.stop_line.lanes[0].light, LightSide::Left);
        // Untouched fields keep their defaults
        assert_eq!(config.stop_line.thickness, 12);
    }

    #[test]
    fn test_rejects_empty_lane_span() {
        let yaml = r#"
stop_line:
  lanes:
    - { name: bad, x_min: 500, x_max: 500, light: right }
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_no_lanes() {
        let yaml = "stop_line:\n  lanes: []\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_bad_iou() {
        let yaml = "dedup:\n  iou_threshold: 1.5\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_degenerate_roi_is_accepted() {
        let yaml = r#"
lights:
  right:
    roi: { x1: 5000, y1: 10, x2: 5010, y2: 20 }
    mode: full
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.lights.right.roi.x1, 5000);
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let config = Config::from_yaml(include_str!("../config.yaml")).unwrap();
        let defaults = Config::default();
        assert_eq!(config.lights.left.roi, defaults.lights.left.roi);
        assert_eq!(config.lights.right.roi, defaults.lights.right.roi);
        assert_eq!(config.stop_line.guide_lines.len(), 2);
        assert_eq!(config.stop_line.lanes[0].x_min, 459.0);
        assert_eq!(config.recorder.initial_status, "pending");
    }

    #[test]
    fn test_load_missing_file_errors() {
        assert!(Config::load("/nonexistent/redlight/config.yaml").is_err());
    }
}
