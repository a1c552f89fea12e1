mod replay;

pub use replay::ReplayDetector;

use crate::capture::latest::{self, LatestSender};
use crate::capture::{PixelBuffer, VideoOrientation};
use crate::events::{EventBus, SessionEvent};
use crate::overlay::Detection;
use anyhow::{Context, Result};
use std::thread;

/// Object detector run on captured frames.
///
/// Allows swapping the model behind the overlay without touching the
/// capture or render paths.
pub trait Detector: Send {
    /// Detect objects in `frame`. Coordinates are normalized to the frame.
    fn detect(&mut self, frame: &PixelBuffer, orientation: VideoOrientation)
        -> Result<Vec<Detection>>;
}

/// Runs a [`Detector`] on its own thread.
///
/// Frames submitted while the detector is busy replace each other, so it
/// always works on the newest one. Results are emitted as
/// [`SessionEvent::PredictionsUpdated`].
pub struct InferenceWorker {
    frames: LatestSender<(PixelBuffer, VideoOrientation)>,
}

impl InferenceWorker {
    pub fn spawn(mut detector: Box<dyn Detector>, events: EventBus) -> Result<Self> {
        let (frames, pending) = latest::channel::<(PixelBuffer, VideoOrientation)>();

        thread::Builder::new()
            .name("inference".to_string())
            .spawn(move || {
                while let Some((frame, orientation)) = pending.recv() {
                    let _span = tracing::debug_span!("detect").entered();
                    match detector.detect(&frame, orientation) {
                        Ok(detections) => {
                            tracing::debug!(count = detections.len(), "predictions updated");
                            events.emit(SessionEvent::PredictionsUpdated(detections));
                        }
                        Err(e) => tracing::warn!("Failed to run detector: {:#}", e),
                    }
                }
                tracing::debug!(skipped = pending.dropped(), "inference finished");
            })
            .context("Failed to spawn inference thread")?;

        Ok(Self { frames })
    }

    /// Hand a frame to the detector without waiting.
    pub fn submit(&self, frame: PixelBuffer, orientation: VideoOrientation) {
        if self.frames.send((frame, orientation)).is_err() {
            tracing::warn!("inference thread is gone, frame discarded");
        }
    }
}
