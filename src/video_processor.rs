// src/video_processor.rs

use crate::runner::FrameSource;
use crate::sources::SourceSpec;
use crate::types::{Frame, VideoConfig};
use anyhow::{bail, Context, Result};
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTraitConst, VideoWriter},
};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

pub struct VideoReader {
    cap: VideoCapture,
    name: String,
    pub fps: f64,
    pub total_frames: i32,
    pub current_frame: u64,
    target_width: i32,
    target_height: i32,
    live: bool,
    started_at: Instant,
}

impl VideoReader {
    /// Open a file or camera. Failure here is the only fatal input error.
    pub fn open(spec: &SourceSpec, video: &VideoConfig) -> Result<Self> {
        info!("Opening video: {}", spec);

        let (cap, live) = match spec {
            SourceSpec::Camera(idx) => (VideoCapture::new(*idx, videoio::CAP_ANY)?, true),
            SourceSpec::File(path) => {
                let path_str = path
                    .to_str()
                    .with_context(|| format!("Non UTF-8 path: {}", path.display()))?;
                (VideoCapture::from_file(path_str, videoio::CAP_ANY)?, false)
            }
        };

        if !cap.is_opened()? {
            bail!("Failed to open video source: {}", spec);
        }

        let fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
        let total_frames = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_COUNT)? as i32;
        let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)? as i32;

        info!(
            "Video properties: {}x{} @ {:.1} FPS, {} frames (resized to {}x{})",
            width, height, fps, total_frames, video.target_width, video.target_height
        );

        Ok(Self {
            cap,
            name: spec.to_string(),
            fps,
            total_frames,
            current_frame: 0,
            target_width: video.target_width as i32,
            target_height: video.target_height as i32,
            live,
            started_at: Instant::now(),
        })
    }

    pub fn progress(&self) -> f32 {
        if self.total_frames <= 0 {
            return 0.0;
        }
        (self.current_frame as f32 / self.total_frames as f32) * 100.0
    }

    /// Video time for files, wall time since open for cameras or when the
    /// container reports no frame rate.
    fn timestamp_ms(&self) -> f64 {
        if self.live || self.fps <= 0.0 {
            self.started_at.elapsed().as_secs_f64() * 1000.0
        } else {
            (self.current_frame as f64 / self.fps) * 1000.0
        }
    }
}

impl FrameSource for VideoReader {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        use opencv::videoio::VideoCaptureTrait;

        let mut mat = Mat::default();
        if !VideoCaptureTrait::read(&mut self.cap, &mut mat)? || mat.empty() {
            return Ok(None);
        }

        self.current_frame += 1;
        let timestamp_ms = self.timestamp_ms();

        let mut resized = Mat::default();
        imgproc::resize(
            &mat,
            &mut resized,
            core::Size::new(self.target_width, self.target_height),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;

        let mut rgb_mat = Mat::default();
        imgproc::cvt_color(&resized, &mut rgb_mat, imgproc::COLOR_BGR2RGB, 0)?;
        let data = rgb_mat.data_bytes()?.to_vec();

        Ok(Some(Frame {
            index: self.current_frame,
            data,
            width: self.target_width as usize,
            height: self.target_height as usize,
            timestamp_ms,
        }))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Annotated output writer, one file per source.
pub fn create_writer(
    spec: &SourceSpec,
    video: &VideoConfig,
    fps: f64,
) -> Result<Option<VideoWriter>> {
    if !video.save_annotated {
        return Ok(None);
    }

    std::fs::create_dir_all(&video.output_dir)
        .with_context(|| format!("Failed to create {}", video.output_dir))?;

    let stem = match spec {
        SourceSpec::Camera(idx) => format!("camera_{}", idx),
        SourceSpec::File(path) => path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("video")
            .to_string(),
    };
    let output_path = PathBuf::from(&video.output_dir).join(format!("{}_annotated.mp4", stem));
    info!("Output video: {}", output_path.display());

    let fps = if fps > 0.0 { fps } else { 25.0 };
    let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
    let writer = VideoWriter::new(
        &output_path.to_string_lossy(),
        fourcc,
        fps,
        core::Size::new(video.target_width as i32, video.target_height as i32),
        true,
    )?;

    Ok(Some(writer))
}
