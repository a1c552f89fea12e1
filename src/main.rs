mod capture;
mod events;
mod executor;
mod inference;
mod output;
mod overlay;

use anyhow::{bail, Context, Result};
use capture::latest::{self, LatestSender};
use capture::orientation::{DeviceOrientation, InterfaceOrientation};
use capture::{
    CaptureSessionController, FrameConsumer, NokhwaBackend, NokhwaPermission, OrientationCell,
    PixelBuffer, VideoOrientation,
};
use clap::Parser;
use events::{EventBus, SessionEvent};
use inference::{InferenceWorker, ReplayDetector};
use output::{OutputSink, V4L2Output};
use overlay::{DetectionOverlayRenderer, EraseMode, RenderContext, RenderHandle, RenderState};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Only consider the webcam with this index
    #[arg(short, long)]
    input_device: Option<u32>,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Output resolution width
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// Display refresh rate
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Recorded detections to replay (JSON array of per-frame detection lists)
    /// If not provided, runs in passthrough mode without boxes
    #[arg(long)]
    detections: Option<String>,

    /// How boxes from the previous pass are removed
    #[arg(long, value_enum, default_value_t = EraseMode::Clear)]
    erase_mode: EraseMode,

    /// Device orientation; only landscape orientations rotate the video
    #[arg(long, value_enum, default_value_t = DeviceOrientation::LandscapeLeft)]
    orientation: DeviceOrientation,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("boxcam starting");
    tracing::info!("Output: {}x{}", args.output_width, args.output_height);
    tracing::info!("Target FPS: {}", args.fps);
    tracing::info!("Erase mode: {:?}", args.erase_mode);

    let events = EventBus::new();
    let session_events = events.subscribe();

    // Display side
    let output = V4L2Output::new(&args.output_device, args.output_width, args.output_height)
        .context("Failed to initialize v4l2loopback output")?;
    let view_size = output.resolution();
    let (preview_tx, preview_rx) = latest::channel();
    let render = RenderContext::spawn(
        RenderState::new(
            DetectionOverlayRenderer::new(view_size, args.erase_mode),
            preview_rx,
            Box::new(output),
        ),
        args.fps,
    )?;

    // Inference collaborator
    let inference = if let Some(path) = &args.detections {
        let detector = ReplayDetector::from_file(path).context("Failed to load detections")?;
        Some(InferenceWorker::spawn(Box::new(detector), events.clone())?)
    } else {
        tracing::info!("Running in passthrough mode (no detections)");
        None
    };

    // Capture side
    let orientation = OrientationCell::new(InterfaceOrientation::Unknown);
    let session = CaptureSessionController::new(
        NokhwaBackend::new(args.input_device),
        Arc::new(NokhwaPermission),
        events,
        orientation,
    )?;
    session.set_device_orientation(args.orientation);
    session.configure_session(Arc::new(PreviewPipeline {
        preview: preview_tx,
        inference,
    }));
    session.start_session();

    let result = run_pipeline(&session_events, &render.handle());

    session.stop_session();
    session.shutdown();
    if let Ok(presented) = render.handle().sync(|state| state.presented()) {
        tracing::info!("Presented {} frames", presented);
    }
    render.join();

    result
}

/// Receives frames on the frame-delivery thread: every frame goes to the
/// preview, and to the detector when one is configured.
struct PreviewPipeline {
    preview: LatestSender<PixelBuffer>,
    inference: Option<InferenceWorker>,
}

impl FrameConsumer for PreviewPipeline {
    fn on_frame(&self, frame: PixelBuffer, orientation: VideoOrientation) {
        if let Some(inference) = &self.inference {
            inference.submit(frame.clone(), orientation);
        }
        let _ = self.preview.send(frame);
    }
}

/// React to session events until the session can no longer run.
fn run_pipeline(events: &Receiver<SessionEvent>, render: &RenderHandle) -> Result<()> {
    tracing::info!("Press Ctrl+C to stop");

    for event in events {
        match event {
            SessionEvent::Started => {
                tracing::info!("Capture session running, boxes will follow detections");
            }
            SessionEvent::NotAuthorized => {
                bail!("Please grant permission to use the camera in Settings");
            }
            SessionEvent::ConfigurationFailed => {
                bail!("Unable to capture media: capture session configuration failed");
            }
            SessionEvent::PredictionsUpdated(detections) => {
                render
                    .update_detections(detections)
                    .context("Render context stopped")?;
            }
            SessionEvent::RuntimeError(message) => {
                tracing::error!("Capture interrupted: {}", message);
            }
        }
    }

    Ok(())
}
