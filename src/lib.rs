// src/lib.rs

pub mod config;
pub mod dedup;
pub mod detector;
pub mod geometry;
pub mod light_classifier;
pub mod pipeline;
pub mod preprocessing;
pub mod recorder;
pub mod review;
pub mod runner;
pub mod sources;
pub mod tracker;
pub mod types;
pub mod violation_rules;

#[cfg(feature = "video")]
pub mod overlay;
#[cfg(feature = "video")]
pub mod video_processor;
#[cfg(feature = "onnx")]
pub mod yolo;

pub use types::Config;
