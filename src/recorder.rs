// src/recorder.rs
//
// Durable violation evidence: one JPEG crop per admitted violation, one row
// in the append-only evidence log (report.csv) and one row in the
// disposition table (status.csv).
//
// The recorder is the only state shared across sources. Identifier
// allocation and both appends happen under one lock so rows never
// interleave and ids are never handed out twice.

use crate::types::{Frame, LightState, Rect, RecorderConfig};
use crate::violation_rules::ViolationCandidate;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use image::{ImageBuffer, RgbImage};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

pub const REPORT_HEADER: [&str; 13] = [
    "id",
    "timestamp",
    "image_path",
    "x1",
    "y1",
    "x2",
    "y2",
    "cx",
    "bottom_y",
    "lane",
    "light_right",
    "light_left",
    "track_id",
];

pub const STATUS_HEADER: [&str; 4] = ["id", "date", "violation_type", "status"];

/// One row of report.csv. Field order is the column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub id: u64,
    pub timestamp: String,
    pub image_path: String,
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub cx: i32,
    pub bottom_y: i32,
    pub lane: String,
    pub light_right: LightState,
    pub light_left: LightState,
    /// Absent in logs written before the column existed
    #[serde(default)]
    pub track_id: Option<u32>,
}

/// One row of status.csv. Only the review tool edits `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRow {
    pub id: u64,
    pub date: String,
    pub violation_type: String,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub record: ViolationRecord,
    /// Persistence problems for this record; the id is consumed regardless
    pub failures: Vec<String>,
}

struct RecorderState {
    last_id: u64,
}

pub struct ViolationRecorder {
    config: RecorderConfig,
    dir: PathBuf,
    report_path: PathBuf,
    status_path: PathBuf,
    state: Mutex<RecorderState>,
}

impl ViolationRecorder {
    /// Create the output directory and both tables if missing, then recover
    /// the last issued id from the evidence log.
    pub fn open(config: &RecorderConfig) -> Result<Self> {
        let dir = PathBuf::from(&config.output_dir);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create violation dir {}", dir.display()))?;

        let report_path = dir.join(&config.report_file);
        let status_path = dir.join(&config.status_file);

        ensure_table(&report_path, &REPORT_HEADER)?;
        ensure_table(&status_path, &STATUS_HEADER)?;

        let last_id = recover_last_id(&report_path)?;
        info!(
            "📁 Violation recorder ready: {} (last id: {})",
            dir.display(),
            last_id
        );

        Ok(Self {
            config: config.clone(),
            dir,
            report_path,
            status_path,
            state: Mutex::new(RecorderState { last_id }),
        })
    }

    pub fn last_id(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .last_id
    }

    pub fn report_path(&self) -> &Path {
        &self.report_path
    }

    pub fn status_path(&self) -> &Path {
        &self.status_path
    }

    pub fn record(
        &self,
        candidate: &ViolationCandidate,
        crop: Option<&RgbImage>,
        now: DateTime<Local>,
    ) -> RecordOutcome {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.last_id += 1;
        let id = state.last_id;

        let mut failures = Vec::new();

        let image_path = match crop {
            Some(img) => {
                let filename = format!("violation_{}_{}.jpg", now.format("%Y%m%d_%H%M%S"), id);
                let path = self.dir.join(filename);
                match write_jpeg(&path, img, self.config.jpeg_quality) {
                    Ok(()) => path.to_string_lossy().into_owned(),
                    Err(e) => {
                        warn!("⚠️  Evidence image for violation #{} not saved: {:#}", id, e);
                        failures.push(format!("evidence image write failed: {:#}", e));
                        String::new()
                    }
                }
            }
            None => {
                debug!("No evidence crop for violation #{}", id);
                String::new()
            }
        };

        let [x1, y1, x2, y2] = candidate.bbox;
        let record = ViolationRecord {
            id,
            timestamp: now.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            image_path,
            x1: x1.round() as i32,
            y1: y1.round() as i32,
            x2: x2.round() as i32,
            y2: y2.round() as i32,
            cx: candidate.cx.round() as i32,
            bottom_y: candidate.bottom_y.round() as i32,
            lane: candidate.lane.clone(),
            light_right: candidate.lights.right,
            light_left: candidate.lights.left,
            track_id: Some(candidate.track_id),
        };

        if let Err(e) = append_row(&self.report_path, &record) {
            error!("❌ Failed to append violation #{} to evidence log: {:#}", id, e);
            failures.push(format!("report write failed: {:#}", e));
        }

        let status = StatusRow {
            id,
            date: now.format("%d/%m/%Y").to_string(),
            violation_type: self.config.violation_type.clone(),
            status: self.config.initial_status.clone(),
        };
        if let Err(e) = append_row(&self.status_path, &status) {
            error!("❌ Failed to append violation #{} to status table: {:#}", id, e);
            failures.push(format!("status write failed: {:#}", e));
        }

        info!(
            "🚨 RED LIGHT VIOLATION #{}: track #{} in {} (right={}, left={})",
            id, candidate.track_id, record.lane, record.light_right, record.light_left
        );

        RecordOutcome { record, failures }
    }
}

/// Evidence crop around `bbox`, grown by `padding` of its size on each side
/// and clamped to the frame. `None` when nothing of the box is on screen.
pub fn evidence_crop(frame: &Frame, bbox: &[f32; 4], padding: f32) -> Option<RgbImage> {
    let [x1, y1, x2, y2] = *bbox;
    let pad_x = (x2 - x1) * padding;
    let pad_y = (y2 - y1) * padding;

    let padded = Rect::new(
        (x1 - pad_x) as i32,
        (y1 - pad_y) as i32,
        (x2 + pad_x) as i32,
        (y2 + pad_y) as i32,
    );
    let rect = padded.clamp_to(frame.width, frame.height)?;

    let pixels = frame.region_pixels(&rect);
    let width = (rect.x2 - rect.x1) as u32;
    let height = (rect.y2 - rect.y1) as u32;
    ImageBuffer::from_raw(width, height, pixels)
}

/// Write the header when the table is missing or empty.
fn ensure_table(path: &Path, header: &[&str]) -> Result<()> {
    let has_content = fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
    if has_content {
        return Ok(());
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(header)?;
    writer.flush()?;
    Ok(())
}

/// Largest parseable id in column 0. The header and unparseable rows are
/// skipped; an unreadable file is an error.
fn recover_last_id(path: &Path) -> Result<u64> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let mut last_id = 0u64;
    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!("Skipping malformed row in {}: {}", path.display(), e);
                continue;
            }
        };
        if let Some(id) = row.get(0).and_then(|v| v.trim().parse::<u64>().ok()) {
            last_id = last_id.max(id);
        }
    }
    Ok(last_id)
}

fn append_row<T: Serialize>(path: &Path, row: &T) -> Result<()> {
    let file = OpenOptions::new()
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    writer.serialize(row)?;
    writer.flush()?;
    Ok(())
}

fn write_jpeg(path: &Path, img: &RgbImage, quality: u8) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
    img.write_with_encoder(encoder)
        .with_context(|| format!("Failed to encode {}", path.display()))?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LightStates;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn config_in(dir: &Path) -> RecorderConfig {
        RecorderConfig {
            output_dir: dir.to_string_lossy().into_owned(),
            ..RecorderConfig::default()
        }
    }

    fn candidate(track_id: u32) -> ViolationCandidate {
        ViolationCandidate {
            track_id,
            bbox: [600.0, 300.0, 700.0, 390.0],
            cx: 650.0,
            bottom_y: 390.0,
            class_id: 2,
            lane: "lane_2".to_string(),
            lights: LightStates {
                left: LightState::Green,
                right: LightState::Red,
            },
        }
    }

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap()
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_open_creates_tables_with_headers() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = ViolationRecorder::open(&config_in(tmp.path())).unwrap();
        assert_eq!(rec.last_id(), 0);
        assert_eq!(read_lines(rec.report_path()), vec![REPORT_HEADER.join(",")]);
        assert_eq!(read_lines(rec.status_path()), vec![STATUS_HEADER.join(",")]);
    }

    #[test]
    fn test_record_appends_both_tables() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = ViolationRecorder::open(&config_in(tmp.path())).unwrap();

        let out = rec.record(&candidate(4), None, fixed_now());
        assert!(out.failures.is_empty());
        assert_eq!(out.record.id, 1);
        assert_eq!(out.record.image_path, "");

        let report = read_lines(rec.report_path());
        assert_eq!(report.len(), 2);
        assert!(report[1].starts_with("1,2024-03-05T14:07:09"));
        assert!(report[1].ends_with(",600,300,700,390,650,390,lane_2,RED,GREEN,4"));

        let status = read_lines(rec.status_path());
        assert_eq!(status[1], "1,05/03/2024,red_light,pending");
    }

    #[test]
    fn test_evidence_image_is_written() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = ViolationRecorder::open(&config_in(tmp.path())).unwrap();
        let crop: RgbImage = ImageBuffer::from_pixel(20, 10, image::Rgb([200, 10, 10]));

        let out = rec.record(&candidate(1), Some(&crop), fixed_now());
        assert!(out.record.image_path.ends_with("violation_20240305_140709_1.jpg"));
        assert!(Path::new(&out.record.image_path).exists());
    }

    #[test]
    fn test_restart_resumes_numbering() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config_in(tmp.path());
        {
            let rec = ViolationRecorder::open(&cfg).unwrap();
            rec.record(&candidate(1), None, fixed_now());
            rec.record(&candidate(2), None, fixed_now());
        }
        let rec = ViolationRecorder::open(&cfg).unwrap();
        assert_eq!(rec.last_id(), 2);
        assert_eq!(rec.record(&candidate(3), None, fixed_now()).record.id, 3);
    }

    #[test]
    fn test_recovery_takes_max_and_tolerates_legacy_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config_in(tmp.path());
        fs::write(
            tmp.path().join("report.csv"),
            "id,timestamp,image_path,x1,y1,x2,y2,cx,bottom_y,lane,light_right,light_left\n\
             7,2024-01-01T00:00:00,,1,2,3,4,2,4,lane_2,RED,GREEN\n\
             garbage\n\
             3,2024-01-01T00:00:01,,1,2,3,4,2,4,lane_2,RED,GREEN,9\n",
        )
        .unwrap();
        let rec = ViolationRecorder::open(&cfg).unwrap();
        assert_eq!(rec.last_id(), 7);
    }

    #[test]
    fn test_empty_report_gets_header_and_ids_keep_rising() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config_in(tmp.path());
        fs::write(tmp.path().join("report.csv"), "").unwrap();
        {
            let rec = ViolationRecorder::open(&cfg).unwrap();
            assert_eq!(read_lines(rec.report_path()), vec![REPORT_HEADER.join(",")]);
            assert_eq!(rec.record(&candidate(1), None, fixed_now()).record.id, 1);
        }
        let rec = ViolationRecorder::open(&cfg).unwrap();
        assert_eq!(rec.last_id(), 1);
        assert_eq!(rec.record(&candidate(2), None, fixed_now()).record.id, 2);
    }

    #[test]
    fn test_headerless_report_still_recovers_first_row() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config_in(tmp.path());
        fs::write(
            tmp.path().join("report.csv"),
            "4,2024-01-01T00:00:00,,1,2,3,4,2,4,lane_2,RED,GREEN,9\n",
        )
        .unwrap();
        let rec = ViolationRecorder::open(&cfg).unwrap();
        assert_eq!(rec.last_id(), 4);
    }

    #[test]
    fn test_image_write_failure_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = ViolationRecorder::open(&config_in(tmp.path())).unwrap();
        fs::create_dir(tmp.path().join("violation_20240305_140709_1.jpg")).unwrap();
        let crop: RgbImage = ImageBuffer::from_pixel(20, 10, image::Rgb([200, 10, 10]));

        let out = rec.record(&candidate(1), Some(&crop), fixed_now());
        assert_eq!(out.record.id, 1);
        assert_eq!(out.record.image_path, "");
        assert_eq!(out.failures.len(), 1);
        assert!(out.failures[0].starts_with("evidence image write failed"));
        // Both rows are still written
        assert_eq!(read_lines(rec.report_path()).len(), 2);
        assert_eq!(read_lines(rec.status_path()).len(), 2);
    }

    #[test]
    fn test_append_failure_still_consumes_id() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = ViolationRecorder::open(&config_in(tmp.path())).unwrap();
        fs::remove_file(rec.report_path()).unwrap();
        fs::create_dir(rec.report_path()).unwrap();

        let out = rec.record(&candidate(1), None, fixed_now());
        assert_eq!(out.record.id, 1);
        assert_eq!(out.failures.len(), 1);
        assert!(out.failures[0].contains("report"));
        assert_eq!(rec.record(&candidate(2), None, fixed_now()).record.id, 2);
    }

    #[test]
    fn test_concurrent_records_get_unique_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = Arc::new(ViolationRecorder::open(&config_in(tmp.path())).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let rec = Arc::clone(&rec);
                std::thread::spawn(move || {
                    (0..5)
                        .map(|i| rec.record(&candidate(t * 10 + i), None, fixed_now()).record.id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=20).collect::<Vec<u64>>());
        assert_eq!(read_lines(rec.report_path()).len(), 21);
    }

    fn frame(width: usize, height: usize) -> Frame {
        Frame {
            index: 0,
            data: vec![128; width * height * 3],
            width,
            height,
            timestamp_ms: 0.0,
        }
    }

    #[test]
    fn test_evidence_crop_padding() {
        let f = frame(200, 100);
        let img = evidence_crop(&f, &[50.0, 20.0, 150.0, 70.0], 0.1).unwrap();
        // 100x50 box grows by 10x5 each side
        assert_eq!(img.dimensions(), (120, 60));
    }

    #[test]
    fn test_evidence_crop_clamps_to_frame() {
        let f = frame(200, 100);
        let img = evidence_crop(&f, &[150.0, 50.0, 210.0, 110.0], 0.1).unwrap();
        assert_eq!(img.dimensions(), (56, 56));
    }

    #[test]
    fn test_evidence_crop_off_frame_is_none() {
        let f = frame(200, 100);
        assert!(evidence_crop(&f, &[300.0, 300.0, 400.0, 400.0], 0.1).is_none());
    }
}
