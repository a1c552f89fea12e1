use super::Detector;
use crate::capture::{PixelBuffer, VideoOrientation};
use crate::overlay::Detection;
use anyhow::{Context, Result};
use std::path::Path;

/// Replays recorded detection lists, one per frame, looping at the end.
///
/// The file is a JSON array of frames, each an array of detections.
pub struct ReplayDetector {
    frames: Vec<Vec<Detection>>,
    next: usize,
}

impl ReplayDetector {
    pub fn new(frames: Vec<Vec<Detection>>) -> Self {
        Self { frames, next: 0 }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read detections from {}", path.display()))?;
        let frames: Vec<Vec<Detection>> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse detections in {}", path.display()))?;
        tracing::info!("Loaded {} recorded frames from {}", frames.len(), path.display());
        Ok(Self::new(frames))
    }
}

impl Detector for ReplayDetector {
    fn detect(
        &mut self,
        _frame: &PixelBuffer,
        _orientation: VideoOrientation,
    ) -> Result<Vec<Detection>> {
        if self.frames.is_empty() {
            return Ok(Vec::new());
        }
        let detections = self.frames[self.next].clone();
        self.next = (self.next + 1) % self.frames.len();
        Ok(detections)
    }
}
