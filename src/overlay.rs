// src/overlay.rs
//
// Annotated frame for display and the optional output video. Purely
// informational; nothing here feeds back into the pipeline.

use crate::pipeline::{FrameReport, TrackStatus};
use crate::types::{Config, Frame, LightRoiConfig, LightState};
use anyhow::Result;
use opencv::{core, imgproc, prelude::*};

fn light_color(state: LightState) -> core::Scalar {
    // BGR
    match state {
        LightState::Red => core::Scalar::new(0.0, 0.0, 255.0, 0.0),
        LightState::Green => core::Scalar::new(0.0, 255.0, 0.0, 0.0),
        LightState::Yellow => core::Scalar::new(0.0, 255.0, 255.0, 0.0),
        LightState::Unknown => core::Scalar::new(255.0, 255.0, 255.0, 0.0),
    }
}

fn put_label(
    img: &mut core::Mat,
    text: &str,
    x: i32,
    y: i32,
    scale: f64,
    color: core::Scalar,
) -> Result<()> {
    imgproc::put_text(
        img,
        text,
        core::Point::new(x, y),
        imgproc::FONT_HERSHEY_SIMPLEX,
        scale,
        color,
        2,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}

fn draw_roi(
    img: &mut core::Mat,
    frame: &Frame,
    light: &LightRoiConfig,
    label: &str,
    state: LightState,
    label_dx: i32,
) -> Result<()> {
    let Some(r) = light.roi.clamp_to(frame.width, frame.height) else {
        return Ok(());
    };
    let color = light_color(state);
    imgproc::rectangle(
        img,
        core::Rect::new(r.x1, r.y1, r.x2 - r.x1, r.y2 - r.y1),
        color,
        2,
        imgproc::LINE_8,
        0,
    )?;
    put_label(
        img,
        &format!("{}: {}", label, state),
        (r.x1 - label_dx).max(0),
        r.y1 - 8,
        0.5,
        color,
    )
}

/// Convert an RGB frame to BGR and draw ROIs, stop line, guide lines,
/// tracked vehicles and the status bar.
pub fn draw_overlay(frame: &Frame, report: &FrameReport, config: &Config) -> Result<core::Mat> {
    let mat = core::Mat::from_slice(&frame.data)?;
    let mat = mat.reshape(3, frame.height as i32)?;
    let mut output = core::Mat::default();
    imgproc::cvt_color(&mat, &mut output, imgproc::COLOR_RGB2BGR, 0)?;

    let lights = report.lights;

    // Light ROIs
    draw_roi(&mut output, frame, &config.lights.left, "LEFT", lights.left, 0)?;
    draw_roi(&mut output, frame, &config.lights.right, "RIGHT", lights.right, 50)?;

    // Stop line: full extent first, then each lane in its own light's colour
    let stop = &config.stop_line;
    let line_y = stop.y as i32;
    let base = stop
        .lanes
        .first()
        .map(|lane| lights.get(lane.light))
        .unwrap_or(LightState::Unknown);
    imgproc::line(
        &mut output,
        core::Point::new(stop.draw_x1 as i32, line_y),
        core::Point::new(stop.draw_x2 as i32, line_y),
        light_color(base),
        stop.thickness,
        imgproc::LINE_8,
        0,
    )?;
    for lane in &stop.lanes {
        imgproc::line(
            &mut output,
            core::Point::new(lane.x_min as i32 + 1, line_y),
            core::Point::new(lane.x_max as i32, line_y),
            light_color(lights.get(lane.light)),
            stop.thickness,
            imgproc::LINE_8,
            0,
        )?;
    }

    for guide in &stop.guide_lines {
        let color = light_color(lights.get(guide.light));
        imgproc::line(
            &mut output,
            core::Point::new(guide.from.0, guide.from.1),
            core::Point::new(guide.to.0, guide.to.1),
            color,
            3,
            imgproc::LINE_8,
            0,
        )?;
        put_label(&mut output, &guide.label, guide.from.0 + 5, guide.from.1 - 5, 0.5, color)?;
    }

    // Tracked vehicles; latched ones are no longer drawn
    for view in report.active_tracks() {
        let (label, color) = match view.status {
            TrackStatus::Latched => continue,
            TrackStatus::Violating => (
                format!("VIOLATION ID {}", view.track.id),
                core::Scalar::new(0.0, 0.0, 255.0, 0.0),
            ),
            TrackStatus::Normal => (
                format!("ID {}", view.track.id),
                core::Scalar::new(0.0, 255.0, 0.0, 0.0),
            ),
        };
        let [x1, y1, x2, y2] = view.track.bbox;
        imgproc::rectangle(
            &mut output,
            core::Rect::new(x1 as i32, y1 as i32, (x2 - x1) as i32, (y2 - y1) as i32),
            color,
            2,
            imgproc::LINE_8,
            0,
        )?;
        put_label(&mut output, &label, x1 as i32, (y1 as i32 - 12).max(0), 0.6, color)?;
    }

    // Status bar
    imgproc::rectangle(
        &mut output,
        core::Rect::new(5, frame.height as i32 - 40, 620, 32),
        core::Scalar::new(40.0, 40.0, 40.0, 0.0),
        -1,
        imgproc::LINE_8,
        0,
    )?;
    put_label(
        &mut output,
        &report.status(),
        15,
        frame.height as i32 - 18,
        0.6,
        core::Scalar::new(255.0, 255.0, 255.0, 0.0),
    )?;

    Ok(output)
}
