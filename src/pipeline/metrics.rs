// src/pipeline/metrics.rs
//
// Per-source run counters. Logged when a source finishes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug)]
pub struct PipelineMetrics {
    pub total_frames: AtomicU64,
    pub frames_with_vehicles: AtomicU64,
    pub detector_failures: AtomicU64,
    pub candidates: AtomicU64,
    pub duplicates: AtomicU64,
    pub violations: AtomicU64,
    pub persistence_failures: AtomicU64,
    pub detect_time_us: AtomicU64,
    pub started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            total_frames: AtomicU64::new(0),
            frames_with_vehicles: AtomicU64::new(0),
            detector_failures: AtomicU64::new(0),
            candidates: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            violations: AtomicU64::new(0),
            persistence_failures: AtomicU64::new(0),
            detect_time_us: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_timing(&self, counter: &AtomicU64, duration_us: u64) {
        counter.store(duration_us, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            fps: self.fps(),
            frames_with_vehicles: self.frames_with_vehicles.load(Ordering::Relaxed),
            detector_failures: self.detector_failures.load(Ordering::Relaxed),
            candidates: self.candidates.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            violations: self.violations.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            last_detect_us: self.detect_time_us.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub fps: f64,
    pub frames_with_vehicles: u64,
    pub detector_failures: u64,
    pub candidates: u64,
    pub duplicates: u64,
    pub violations: u64,
    pub persistence_failures: u64,
    pub last_detect_us: u64,
    pub elapsed_secs: f64,
}

impl fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames in {:.1}s ({:.1} FPS) | candidates: {} | duplicates: {} | violations: {} | detector failures: {} | write failures: {}",
            self.total_frames,
            self.elapsed_secs,
            self.fps,
            self.candidates,
            self.duplicates,
            self.violations,
            self.detector_failures,
            self.persistence_failures
        )
    }
}
