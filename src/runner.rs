// src/runner.rs
//
// Sequential frame loop for one source. The stop flag is checked once per
// frame boundary; a frame that has started is always finished.

use crate::detector::Detector;
use crate::pipeline::{FrameReport, MetricsSummary, ViolationPipeline};
use crate::types::Frame;
use anyhow::Result;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

/// Anything that yields frames in order. `Ok(None)` is end of stream.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn name(&self) -> &str;
}

/// Drive `pipeline` over every frame of `source` until the source ends, the
/// stop flag is raised, or `on_frame` breaks.
pub fn run_source<S, F>(
    source: &mut S,
    detector: &mut dyn Detector,
    pipeline: &mut ViolationPipeline,
    stop: &AtomicBool,
    mut on_frame: F,
) -> MetricsSummary
where
    S: FrameSource + ?Sized,
    F: FnMut(&Frame, &FrameReport) -> ControlFlow<()>,
{
    info!("▶️  Processing source: {}", source.name());

    loop {
        if stop.load(Ordering::Relaxed) {
            warn!("⏹️  Stop requested, leaving {}", source.name());
            break;
        }

        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("✅ End of stream: {}", source.name());
                break;
            }
            Err(e) => {
                error!("❌ Failed to read frame from {}: {:#}", source.name(), e);
                break;
            }
        };

        let report = pipeline.process_frame(&frame, detector);
        for failure in &report.failures {
            warn!("⚠️  Frame {}: {}", report.frame_index, failure);
        }

        if frame.index % 100 == 0 {
            info!(
                "Frame {} | {} | tracks: {}",
                frame.index,
                report.status(),
                report.tracks.len()
            );
        }

        if on_frame(&frame, &report).is_break() {
            info!("⏹️  Stopped by frame callback: {}", source.name());
            break;
        }
    }

    let summary = pipeline.metrics().summary();
    info!("📊 {}: {}", source.name(), summary);
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::ReplayDetector;
    use crate::recorder::ViolationRecorder;
    use crate::types::Config;
    use anyhow::bail;
    use std::io::Cursor;
    use std::sync::Arc;

    struct MemorySource {
        frames: Vec<Frame>,
        fail_at: Option<usize>,
        pos: usize,
    }

    impl MemorySource {
        fn blank(count: usize) -> Self {
            let frames = (0..count)
                .map(|i| Frame {
                    index: i as u64 + 1,
                    data: vec![0u8; 64 * 48 * 3],
                    width: 64,
                    height: 48,
                    timestamp_ms: i as f64 * 40.0,
                })
                .collect();
            Self {
                frames,
                fail_at: None,
                pos: 0,
            }
        }
    }

    impl FrameSource for MemorySource {
        fn next_frame(&mut self) -> Result<Option<Frame>> {
            if self.fail_at == Some(self.pos) {
                bail!("decoder error");
            }
            let frame = self.frames.get(self.pos).cloned();
            self.pos += 1;
            Ok(frame)
        }

        fn name(&self) -> &str {
            "memory"
        }
    }

    fn pipeline(dir: &std::path::Path) -> ViolationPipeline {
        let mut config = Config::default();
        config.recorder.output_dir = dir.to_string_lossy().into_owned();
        let recorder = Arc::new(ViolationRecorder::open(&config.recorder).unwrap());
        ViolationPipeline::new(&config, recorder)
    }

    fn no_detections() -> ReplayDetector {
        ReplayDetector::from_reader(Cursor::new("")).unwrap()
    }

    #[test]
    fn test_runs_until_end_of_stream() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = pipeline(tmp.path());
        let mut src = MemorySource::blank(5);
        let stop = AtomicBool::new(false);
        let mut seen = Vec::new();

        let summary = run_source(&mut src, &mut no_detections(), &mut p, &stop, |f, r| {
            seen.push((f.index, r.status()));
            ControlFlow::Continue(())
        });

        assert_eq!(summary.total_frames, 5);
        assert_eq!(seen.len(), 5);
        // 64x48 frame: both light ROIs fall off-frame
        assert_eq!(
            seen[0].1,
            "Left light: UNKNOWN | Right light: UNKNOWN | Violations recorded: 0"
        );
    }

    #[test]
    fn test_stop_flag_checked_at_frame_boundary() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = pipeline(tmp.path());
        let mut src = MemorySource::blank(10);
        let stop = AtomicBool::new(false);

        let summary = run_source(&mut src, &mut no_detections(), &mut p, &stop, |f, _| {
            if f.index == 3 {
                stop.store(true, Ordering::Relaxed);
            }
            ControlFlow::Continue(())
        });

        assert_eq!(summary.total_frames, 3);
    }

    #[test]
    fn test_callback_break_ends_loop() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = pipeline(tmp.path());
        let mut src = MemorySource::blank(10);
        let stop = AtomicBool::new(false);

        let summary = run_source(&mut src, &mut no_detections(), &mut p, &stop, |f, _| {
            if f.index == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        assert_eq!(summary.total_frames, 2);
    }

    #[test]
    fn test_read_error_ends_stream() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = pipeline(tmp.path());
        let mut src = MemorySource::blank(10);
        src.fail_at = Some(4);
        let stop = AtomicBool::new(false);

        let summary = run_source(&mut src, &mut no_detections(), &mut p, &stop, |_, _| {
            ControlFlow::Continue(())
        });

        assert_eq!(summary.total_frames, 4);
    }
}
