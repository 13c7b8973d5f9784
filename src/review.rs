// src/review.rs
//
// Offline triage over the two violation tables. The disposition table
// (status.csv) is the only file this module ever writes; the evidence log
// (report.csv) is read-only here.

use crate::recorder::{StatusRow, ViolationRecord};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct DispositionTable {
    path: PathBuf,
    rows: Vec<StatusRow>,
}

impl DispositionTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        let mut rows = Vec::new();
        for (i, row) in reader.deserialize::<StatusRow>().enumerate() {
            match row {
                Ok(row) => rows.push(row),
                Err(e) => warn!("Skipping row {} of {}: {}", i + 2, path.display(), e),
            }
        }
        Ok(Self { path, rows })
    }

    pub fn rows(&self) -> &[StatusRow] {
        &self.rows
    }

    pub fn get(&self, id: u64) -> Option<&StatusRow> {
        self.rows.iter().find(|r| r.id == id)
    }

    pub fn set_status(&mut self, id: u64, status: &str) -> Result<()> {
        let Some(row) = self.rows.iter_mut().find(|r| r.id == id) else {
            bail!("No violation with id {}", id);
        };
        info!("✏️  Violation #{}: {} -> {}", id, row.status, status);
        row.status = status.to_string();
        Ok(())
    }

    /// Rewrite the table through a sibling temp file and rename.
    pub fn save(&self) -> Result<()> {
        let tmp = self.path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp)
                .with_context(|| format!("Failed to create {}", tmp.display()))?;
            for row in &self.rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// Every parseable row of the evidence log, keyed by id.
pub fn load_evidence(path: impl AsRef<Path>) -> Result<HashMap<u64, ViolationRecord>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut by_id = HashMap::new();
    for row in reader.deserialize::<ViolationRecord>() {
        match row {
            Ok(rec) => {
                by_id.insert(rec.id, rec);
            }
            Err(e) => warn!("Skipping evidence row in {}: {}", path.display(), e),
        }
    }
    Ok(by_id)
}

/// One joined row for export.
#[derive(Debug, Clone, Serialize)]
pub struct ExportRow {
    pub id: u64,
    pub date: String,
    pub violation_type: String,
    pub status: String,
    pub timestamp: String,
    pub image_path: String,
    pub lane: String,
    pub light_right: String,
    pub light_left: String,
    pub track_id: String,
}

pub fn join(status: &StatusRow, evidence: Option<&ViolationRecord>) -> ExportRow {
    ExportRow {
        id: status.id,
        date: status.date.clone(),
        violation_type: status.violation_type.clone(),
        status: status.status.clone(),
        timestamp: evidence.map(|e| e.timestamp.clone()).unwrap_or_default(),
        image_path: evidence.map(|e| e.image_path.clone()).unwrap_or_default(),
        lane: evidence.map(|e| e.lane.clone()).unwrap_or_default(),
        light_right: evidence
            .map(|e| e.light_right.to_string())
            .unwrap_or_default(),
        light_left: evidence
            .map(|e| e.light_left.to_string())
            .unwrap_or_default(),
        track_id: evidence
            .and_then(|e| e.track_id)
            .map(|t| t.to_string())
            .unwrap_or_default(),
    }
}

/// Write the joined tables to `out`, optionally only rows with `status`.
pub fn export(
    table: &DispositionTable,
    evidence: &HashMap<u64, ViolationRecord>,
    status: Option<&str>,
    out: impl AsRef<Path>,
) -> Result<usize> {
    let out = out.as_ref();
    let mut writer =
        csv::Writer::from_path(out).with_context(|| format!("Failed to create {}", out.display()))?;
    let mut written = 0;
    for row in table
        .rows()
        .iter()
        .filter(|r| status.map_or(true, |s| r.status == s))
    {
        writer.serialize(join(row, evidence.get(&row.id)))?;
        written += 1;
    }
    writer.flush()?;
    info!("📤 Exported {} violation(s) to {}", written, out.display());
    Ok(written)
}
