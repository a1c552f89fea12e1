use super::{
    AuthorizationStatus, CameraPermission, CaptureBackend, CaptureError, DeviceDescriptor,
    DeviceKind, DevicePosition, FrameWriter, OutputConnection, OutputSettings, PixelBuffer,
    RuntimeError, RuntimeErrorSink, SessionPreset,
};
use anyhow::{Context, Result};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, CameraInfo, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Camera permission through nokhwa's platform initialisation.
///
/// Platforms without a permission prompt report access as granted.
pub struct NokhwaPermission;

impl CameraPermission for NokhwaPermission {
    fn status(&self) -> AuthorizationStatus {
        if nokhwa::nokhwa_check() {
            AuthorizationStatus::Authorized
        } else {
            AuthorizationStatus::NotDetermined
        }
    }

    fn request_access(&self, on_complete: Box<dyn FnOnce(bool) + Send>) {
        let pending = Mutex::new(Some(on_complete));
        nokhwa::nokhwa_initialize(move |granted| {
            let done = pending.lock().unwrap_or_else(|e| e.into_inner()).take();
            if let Some(done) = done {
                done(granted);
            }
        });
    }
}

struct Running {
    stop: Arc<AtomicBool>,
    /// Set by the capture thread before it reports a lost stream.
    failed: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Running {
    fn is_live(&self) -> bool {
        !self.failed.load(Ordering::Acquire) && !self.handle.is_finished()
    }
}

/// Capture session over nokhwa cameras.
///
/// The camera is opened on a dedicated capture thread while the session
/// runs; frames are decoded to RGB and handed to the output as BGRA.
pub struct NokhwaBackend {
    only_index: Option<u32>,
    cameras: Vec<(DeviceDescriptor, CameraIndex)>,
    input: Option<CameraIndex>,
    output: Option<(FrameWriter, SessionPreset)>,
    running: Option<Running>,
}

impl NokhwaBackend {
    /// `only_index` restricts discovery to a single camera index.
    pub fn new(only_index: Option<u32>) -> Self {
        Self {
            only_index,
            cameras: Vec::new(),
            input: None,
            output: None,
            running: None,
        }
    }

    fn index_of(&self, device: &DeviceDescriptor) -> Option<CameraIndex> {
        self.cameras
            .iter()
            .find(|(d, _)| d.id == device.id)
            .map(|(_, index)| index.clone())
    }
}

impl CaptureBackend for NokhwaBackend {
    fn devices(&mut self) -> Vec<DeviceDescriptor> {
        let cameras = match nokhwa::query(ApiBackend::Auto) {
            Ok(cameras) => cameras,
            Err(e) => {
                tracing::warn!("Failed to query cameras: {}", e);
                Vec::new()
            }
        };

        self.cameras = cameras
            .iter()
            .filter(|info| match self.only_index {
                Some(wanted) => info.index().as_index().ok() == Some(wanted),
                None => true,
            })
            .map(|info| (describe(info), info.index().clone()))
            .collect();

        self.cameras.iter().map(|(d, _)| d.clone()).collect()
    }

    fn attach_input(&mut self, device: &DeviceDescriptor) -> Result<(), CaptureError> {
        let index = self
            .index_of(device)
            .ok_or_else(|| CaptureError::InputRejected(device.id.clone()))?;

        tracing::info!("Initializing webcam {} ({})", index, device.name);

        // Opening proves the device is usable; the capture thread reopens it.
        Camera::new(index.clone(), requested_format(SessionPreset::High)).map_err(|e| {
            CaptureError::DeviceOpen {
                device: device.name.clone(),
                reason: e.to_string(),
            }
        })?;

        self.input = Some(index);
        Ok(())
    }

    fn attach_output(
        &mut self,
        settings: &OutputSettings,
        writer: FrameWriter,
    ) -> Result<OutputConnection, CaptureError> {
        if self.input.is_none() {
            return Err(CaptureError::OutputRejected);
        }
        tracing::debug!(?settings, "video output attached");
        self.output = Some((writer, settings.preset));
        Ok(OutputConnection {
            stabilization_supported: false,
        })
    }

    fn start_running(&mut self, errors: RuntimeErrorSink) -> bool {
        if self.running.as_ref().is_some_and(Running::is_live) {
            return true;
        }
        // A failed capture thread may still be winding down; wait for it
        // before reopening the camera.
        self.stop_running();

        let (Some(index), Some((writer, preset))) = (self.input.clone(), self.output.clone())
        else {
            tracing::warn!("Capture session has no input or output");
            return false;
        };

        let stop = Arc::new(AtomicBool::new(false));
        let failed = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let flags = CaptureFlags {
            stop: stop.clone(),
            failed: failed.clone(),
        };

        let spawned = thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || capture_loop(index, preset, writer, errors, flags, ready_tx));

        match spawned {
            Ok(handle) => {
                let started = ready_rx.recv().unwrap_or(false);
                self.running = Some(Running {
                    stop,
                    failed,
                    handle,
                });
                started
            }
            Err(e) => {
                tracing::error!("Failed to spawn capture thread: {}", e);
                false
            }
        }
    }

    fn stop_running(&mut self) {
        if let Some(running) = self.running.take() {
            running.stop.store(true, Ordering::Relaxed);
            if running.handle.join().is_err() {
                tracing::error!("capture thread panicked");
            }
        }
    }
}

impl Drop for NokhwaBackend {
    fn drop(&mut self) {
        self.stop_running();
    }
}

fn requested_format(preset: SessionPreset) -> RequestedFormat<'static> {
    let kind = match preset {
        SessionPreset::High => RequestedFormatType::AbsoluteHighestResolution,
    };
    RequestedFormat::new::<RgbFormat>(kind)
}

fn open_camera(index: CameraIndex, preset: SessionPreset) -> Result<Camera> {
    let mut camera = Camera::new(index, requested_format(preset)).context("Failed to open camera")?;
    camera
        .open_stream()
        .context("Failed to open camera stream")?;
    Ok(camera)
}

struct CaptureFlags {
    stop: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
}

fn capture_loop(
    index: CameraIndex,
    preset: SessionPreset,
    writer: FrameWriter,
    errors: RuntimeErrorSink,
    flags: CaptureFlags,
    ready: SyncSender<bool>,
) {
    let CaptureFlags { stop, failed } = flags;
    let mut camera = match open_camera(index, preset) {
        Ok(camera) => camera,
        Err(e) => {
            tracing::warn!("{:#}", e);
            let _ = ready.send(false);
            return;
        }
    };
    let _ = ready.send(true);
    tracing::info!("Webcam streaming");

    while !stop.load(Ordering::Relaxed) {
        let frame = camera
            .frame()
            .context("Failed to capture frame")
            .and_then(|buffer| {
                buffer
                    .decode_image::<RgbFormat>()
                    .context("Failed to decode frame")
            });

        match frame {
            Ok(image) => {
                if writer.send(PixelBuffer::from_rgb(&image)).is_err() {
                    tracing::debug!("frame receiver gone, stopping capture");
                    break;
                }
            }
            Err(e) if stop.load(Ordering::Relaxed) => {
                tracing::debug!("capture error during stop: {:#}", e);
                break;
            }
            Err(e) => {
                // The stream is gone; let the session decide whether to reopen.
                tracing::warn!("{:#}", e);
                failed.store(true, Ordering::Release);
                errors.report(RuntimeError::MediaServicesReset);
                break;
            }
        }
    }

    if let Err(e) = camera.stop_stream() {
        tracing::debug!("Failed to stop camera stream: {}", e);
    }
}

fn describe(info: &CameraInfo) -> DeviceDescriptor {
    let name = info.human_name();
    let (kind, position) = classify(&name);
    DeviceDescriptor::new(info.index().to_string(), name, kind, position)
}

/// V4L exposes no lens or facing metadata, so both come from the name.
fn classify(name: &str) -> (DeviceKind, DevicePosition) {
    let lower = name.to_lowercase();
    let kind = if lower.contains("dual") {
        DeviceKind::DualCamera
    } else {
        DeviceKind::WideAngle
    };
    let position = if ["front", "facetime", "user"]
        .iter()
        .any(|hint| lower.contains(hint))
    {
        DevicePosition::Front
    } else {
        DevicePosition::Back
    };
    (kind, position)
}
