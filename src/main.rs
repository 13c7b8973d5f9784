// src/main.rs

use anyhow::{Context, Result};
use clap::Parser;
use opencv::{core::Mat, highgui, prelude::*};
use redlight_enforcer::detector::build_detector;
use redlight_enforcer::overlay::draw_overlay;
use redlight_enforcer::pipeline::{MetricsSummary, ViolationPipeline};
use redlight_enforcer::recorder::ViolationRecorder;
use redlight_enforcer::runner::run_source;
use redlight_enforcer::sources::{resolve_sources, SourceSpec};
use redlight_enforcer::types::DetectorKind;
use redlight_enforcer::video_processor::{create_writer, VideoReader};
use redlight_enforcer::Config;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "redlight-enforcer", about = "Detect vehicles running a red light")]
struct Args {
    /// YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Video file, directory or camera index; repeat for several sources
    #[arg(short, long = "source")]
    sources: Vec<String>,

    /// Use precomputed detections (JSON Lines) instead of the ONNX model
    #[arg(long)]
    replay: Option<PathBuf>,

    /// No display window
    #[arg(long)]
    headless: bool,
}

/// Frames waiting for the display thread, per source
const DISPLAY_QUEUE: usize = 4;

enum DisplayMessage {
    Frame { window: String, image: Mat },
    Closed { window: String },
}

/// Returns the config and whether it came from the file.
fn load_config(args: &Args) -> Result<(Config, bool)> {
    let found = args.config.exists();
    let mut config = if found {
        Config::load(&args.config)?
    } else {
        Config::default()
    };

    if !args.sources.is_empty() {
        config.video.sources = args.sources.clone();
    }
    if let Some(replay) = &args.replay {
        config.detector.kind = DetectorKind::Replay;
        config.detector.replay_path = replay.to_string_lossy().into_owned();
    }
    if args.headless {
        config.video.display = false;
    }

    config.validate()?;
    Ok((config, found))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (config, found) = load_config(&args)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚦 Red Light Violation Detection Starting");
    if !found {
        warn!(
            "Config {} not found, using built-in defaults",
            args.config.display()
        );
    }
    info!(
        "Stop line y={} | lanes: {} | frame {}x{}",
        config.stop_line.y,
        config.stop_line.lanes.len(),
        config.video.target_width,
        config.video.target_height
    );

    let specs = resolve_sources(&config.video.sources)?;
    let recorder = Arc::new(ViolationRecorder::open(&config.recorder)?);
    let stop = Arc::new(AtomicBool::new(false));

    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("🛑 Ctrl-C received, finishing current frames");
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    // HighGUI only runs on this thread; workers send it annotated frames
    let (display_tx, display_rx) = if config.video.display {
        let (tx, rx) = mpsc::sync_channel(DISPLAY_QUEUE * specs.len().max(1));
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };

    let mut handles = Vec::with_capacity(specs.len());
    for spec in specs {
        let config = config.clone();
        let recorder = Arc::clone(&recorder);
        let stop = Arc::clone(&stop);
        let display = display_tx.clone();
        let label = spec.to_string();
        let handle = tokio::task::spawn_blocking(move || {
            process_source(&spec, &config, recorder, &stop, display)
        });
        handles.push((label, handle));
    }
    drop(display_tx);

    if let Some(rx) = display_rx {
        tokio::task::block_in_place(|| run_display(rx, &stop));
    }

    let mut failed = 0usize;
    let mut total_violations = 0u64;
    for (label, handle) in handles {
        match handle.await {
            Ok(Ok(summary)) => {
                total_violations += summary.violations;
            }
            Ok(Err(e)) => {
                error!("❌ Source {} failed: {:#}", label, e);
                failed += 1;
            }
            Err(e) => {
                error!("❌ Worker for {} panicked: {}", label, e);
                failed += 1;
            }
        }
    }

    info!(
        "🏁 Done. Violations this run: {} | last id: {} | log: {}",
        total_violations,
        recorder.last_id(),
        recorder.report_path().display()
    );

    if failed > 0 {
        anyhow::bail!("{} source(s) could not be processed", failed);
    }
    Ok(())
}

/// Show frames from every source until all of them have finished.
/// 'q' or ESC stops all sources.
fn run_display(rx: Receiver<DisplayMessage>, stop: &AtomicBool) {
    let mut windows: HashSet<String> = HashSet::new();
    loop {
        match rx.recv_timeout(Duration::from_millis(30)) {
            Ok(DisplayMessage::Frame { window, image }) => {
                if windows.insert(window.clone()) {
                    if let Err(e) = highgui::named_window(&window, highgui::WINDOW_NORMAL) {
                        warn!("Failed to open window {}: {}", window, e);
                    }
                }
                if let Err(e) = highgui::imshow(&window, &image) {
                    warn!("Display failed: {}", e);
                }
            }
            Ok(DisplayMessage::Closed { window }) => {
                if windows.remove(&window) {
                    let _ = highgui::destroy_window(&window);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if windows.is_empty() {
            continue;
        }
        match highgui::wait_key(1) {
            Ok(key) if key == 'q' as i32 || key == 27 => {
                if !stop.swap(true, Ordering::Relaxed) {
                    info!("🛑 Display closed, stopping all sources");
                }
            }
            _ => {}
        }
    }
    let _ = highgui::destroy_all_windows();
}

fn process_source(
    spec: &SourceSpec,
    config: &Config,
    recorder: Arc<ViolationRecorder>,
    stop: &AtomicBool,
    display: Option<SyncSender<DisplayMessage>>,
) -> Result<MetricsSummary> {
    let mut reader = VideoReader::open(spec, &config.video)?;
    let mut detector = build_detector(&config.detector)
        .with_context(|| format!("Failed to build detector for {}", spec))?;
    let mut writer = create_writer(spec, &config.video, reader.fps)?;
    let mut pipeline = ViolationPipeline::new(config, recorder);

    let window = format!("Red Light Detection - {}", spec);

    let summary = run_source(
        &mut reader,
        detector.as_mut(),
        &mut pipeline,
        stop,
        |frame, report| {
            for record in &report.violations {
                info!(
                    "📸 Evidence #{} saved: {}",
                    record.id,
                    if record.image_path.is_empty() {
                        "<no image>"
                    } else {
                        record.image_path.as_str()
                    }
                );
            }

            if display.is_none() && writer.is_none() {
                return ControlFlow::Continue(());
            }

            let annotated = match draw_overlay(frame, report, config) {
                Ok(mat) => mat,
                Err(e) => {
                    warn!("Overlay failed on frame {}: {:#}", frame.index, e);
                    return ControlFlow::Continue(());
                }
            };

            if let Some(w) = writer.as_mut() {
                if let Err(e) = w.write(&annotated) {
                    warn!("Failed to write annotated frame {}: {}", frame.index, e);
                }
            }

            if let Some(tx) = display.as_ref() {
                let msg = DisplayMessage::Frame {
                    window: window.clone(),
                    image: annotated,
                };
                match tx.try_send(msg) {
                    // Display is behind; skip showing this frame
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => return ControlFlow::Break(()),
                }
            }

            ControlFlow::Continue(())
        },
    );

    if let Some(tx) = display {
        let _ = tx.send(DisplayMessage::Closed { window });
    }
    if let Some(mut w) = writer {
        w.release()?;
    }

    info!(
        "Finished {} at {:.0}% of {} frames",
        spec,
        reader.progress(),
        reader.total_frames
    );
    Ok(summary)
}
