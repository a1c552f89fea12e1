mod device;
mod frame;
pub mod latest;
mod nokhwa_backend;
pub mod orientation;
mod session;

pub use device::{select_device, DeviceDescriptor, DeviceKind, DevicePosition, DEVICE_PREFERENCE};
pub use frame::{PixelBuffer, PixelFormat};
pub use nokhwa_backend::{NokhwaBackend, NokhwaPermission};
pub use orientation::{OrientationCell, VideoOrientation};
pub use session::{CaptureSessionController, SetupOutcome};

use std::sync::Arc;

/// Where a capture output writes frames. Unreceived frames are overwritten.
pub type FrameWriter = latest::LatestSender<PixelBuffer>;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("could not open device {device}: {reason}")]
    DeviceOpen { device: String, reason: String },

    #[error("session rejected input from {0}")]
    InputRejected(String),

    #[error("session rejected the video output")]
    OutputRejected,
}

/// Errors a running session reports asynchronously.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// The media service restarted underneath the session; transient.
    #[error("media services were reset")]
    MediaServicesReset,

    #[error("{0}")]
    Other(String),
}

/// Camera-use authorization as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Authorized,
    NotDetermined,
    Denied,
    Restricted,
}

/// Resolution preset of the capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPreset {
    /// Highest quality the device offers.
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSettings {
    pub pixel_format: PixelFormat,
    pub discard_late_frames: bool,
    pub preset: SessionPreset,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            pixel_format: PixelFormat::Bgra32,
            discard_late_frames: true,
            preset: SessionPreset::High,
        }
    }
}

/// What the backend reports about an attached output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputConnection {
    pub stabilization_supported: bool,
}

/// Callback through which a running backend reports runtime errors.
#[derive(Clone)]
pub struct RuntimeErrorSink {
    report: Arc<dyn Fn(RuntimeError) + Send + Sync>,
}

impl RuntimeErrorSink {
    pub fn new(report: impl Fn(RuntimeError) + Send + Sync + 'static) -> Self {
        Self {
            report: Arc::new(report),
        }
    }

    pub fn report(&self, error: RuntimeError) {
        (self.report)(error)
    }
}

/// Platform camera-permission API.
pub trait CameraPermission: Send + Sync {
    fn status(&self) -> AuthorizationStatus;

    /// Ask the user for access. `on_complete` may run on any thread.
    fn request_access(&self, on_complete: Box<dyn FnOnce(bool) + Send>);
}

/// Platform capture session.
///
/// Implementations are owned by the session queue and only ever called from
/// it.
pub trait CaptureBackend: Send + 'static {
    /// Video devices currently present.
    fn devices(&mut self) -> Vec<DeviceDescriptor>;

    /// Open `device` and attach it as the session input.
    fn attach_input(&mut self, device: &DeviceDescriptor) -> Result<(), CaptureError>;

    /// Attach a video output delivering frames into `writer`.
    fn attach_output(
        &mut self,
        settings: &OutputSettings,
        writer: FrameWriter,
    ) -> Result<OutputConnection, CaptureError>;

    fn enable_stabilization(&mut self) {}

    /// Start capture. Returns whether the session is running afterwards.
    fn start_running(&mut self, errors: RuntimeErrorSink) -> bool;

    fn stop_running(&mut self);
}

/// Receives captured frames on the frame-delivery thread.
pub trait FrameConsumer: Send + Sync {
    fn on_frame(&self, frame: PixelBuffer, orientation: VideoOrientation);
}
