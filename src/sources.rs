// src/sources.rs
//
// Turn configured source strings into concrete inputs. A plain integer is a
// camera index, a directory is expanded to the video files inside it, and
// anything else is a file path.

use anyhow::{bail, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "avi", "mov", "mkv"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Camera(i32),
    File(PathBuf),
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::Camera(idx) => write!(f, "camera {}", idx),
            SourceSpec::File(path) => write!(f, "{}", path.display()),
        }
    }
}

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

pub fn find_video_files(dir: &Path) -> Vec<PathBuf> {
    let mut videos: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_video_file(e.path()))
        .map(|e| e.into_path())
        .collect();
    videos.sort();
    info!("Found {} video files in {}", videos.len(), dir.display());
    videos
}

pub fn resolve_sources(sources: &[String]) -> Result<Vec<SourceSpec>> {
    let mut resolved = Vec::new();

    for raw in sources {
        let raw = raw.trim();
        if let Ok(idx) = raw.parse::<i32>() {
            resolved.push(SourceSpec::Camera(idx));
            continue;
        }

        let path = Path::new(raw);
        if path.is_dir() {
            let videos = find_video_files(path);
            if videos.is_empty() {
                warn!("No video files in {}", path.display());
            }
            resolved.extend(videos.into_iter().map(SourceSpec::File));
        } else if path.is_file() {
            resolved.push(SourceSpec::File(path.to_path_buf()));
        } else {
            bail!("Video source not found: {}", raw);
        }
    }

    if resolved.is_empty() {
        bail!("No video sources to process");
    }
    Ok(resolved)
}
