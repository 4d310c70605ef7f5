use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};

use crate::wink::PresenceSample;

use super::marker::{MarkerDetection, MarkerDetector};
use super::source::{PresenceSource, Reading};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const FRAME_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "pgm"];

/// Runs the marker detector over IR frames stored on disk, in file name
/// order, stamping each one with `index / frames_per_second`.
pub struct FrameDirSource {
    frames: Vec<PathBuf>,
    cursor: usize,
    frames_per_second: f64,
    detector: MarkerDetector,
    last_detection: Option<MarkerDetection>,
}

impl FrameDirSource {
    pub fn open(dir: &Path, frames_per_second: f64, detector: MarkerDetector) -> Result<Self> {
        let mut frames: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("Failed to list frames in {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_frame(path))
            .collect();
        frames.sort();

        if frames.is_empty() {
            bail!("no image frames found in {}", dir.display());
        }
        log_info!("replaying {} frames from {}", frames.len(), dir.display());

        Ok(Self {
            frames,
            cursor: 0,
            frames_per_second,
            detector,
            last_detection: None,
        })
    }

    pub fn last_detection(&self) -> Option<MarkerDetection> {
        self.last_detection
    }
}

impl PresenceSource for FrameDirSource {
    fn read(&mut self) -> Reading {
        let Some(path) = self.frames.get(self.cursor) else {
            return Reading::Finished;
        };
        let timestamp = self.cursor as f64 / self.frames_per_second;
        self.cursor += 1;

        let frame = match image::open(path) {
            Ok(img) => img.to_luma8(),
            Err(err) => {
                log_warn!("frame {} unreadable: {err}", path.display());
                self.last_detection = None;
                return Reading::Missing {
                    at: Some(timestamp),
                };
            }
        };

        self.last_detection = self.detector.detect(&frame);
        Reading::Sample(PresenceSample {
            visible: self.last_detection.is_some(),
            timestamp,
        })
    }
}

fn is_frame(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
