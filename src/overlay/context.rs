use super::{Canvas, Compositor, Detection, DetectionOverlayRenderer};
use crate::capture::latest::LatestReceiver;
use crate::capture::PixelBuffer;
use crate::executor::{QueueClosed, SerialQueue, Tick};
use crate::output::OutputSink;
use anyhow::{Context, Result};
use std::thread::JoinHandle;
use std::time::Duration;

/// Everything owned by the render context thread.
pub struct RenderState {
    pub renderer: DetectionOverlayRenderer,
    canvas: Canvas,
    compositor: Compositor,
    preview: LatestReceiver<PixelBuffer>,
    last_preview: Option<PixelBuffer>,
    sink: Box<dyn OutputSink>,
    presented: u64,
    write_failures: u64,
}

impl RenderState {
    pub fn new(
        renderer: DetectionOverlayRenderer,
        preview: LatestReceiver<PixelBuffer>,
        sink: Box<dyn OutputSink>,
    ) -> Self {
        let (width, height) = renderer.view_size();
        Self {
            renderer,
            canvas: Canvas::new(width, height),
            compositor: Compositor::new(width, height),
            preview,
            last_preview: None,
            sink,
            presented: 0,
            write_failures: 0,
        }
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    /// One display refresh: redraw the overlay if it is dirty, then present
    /// the newest preview frame under it.
    fn refresh(&mut self) {
        if self.renderer.needs_display() {
            self.renderer.render_pass(&mut self.canvas);
        }

        if let Some(frame) = self.preview.try_recv() {
            self.last_preview = Some(frame);
        }

        let composed = self.compositor.compose(
            self.last_preview.as_ref(),
            &self.canvas,
            self.renderer.active_labels(),
        );

        match self.sink.write_frame(&composed) {
            Ok(()) => {
                self.presented += 1;
                if self.presented % 300 == 0 {
                    tracing::debug!(
                        presented = self.presented,
                        preview_dropped = self.preview.dropped(),
                        "render context"
                    );
                }
            }
            Err(e) => {
                self.write_failures += 1;
                if self.write_failures == 1 || self.write_failures % 100 == 0 {
                    tracing::warn!(failures = self.write_failures, "{:#}", e);
                }
            }
        }
    }
}

/// The display context: a single thread that owns the renderer and
/// refreshes at a fixed rate.
pub struct RenderContext {
    handle: RenderHandle,
    worker: JoinHandle<()>,
}

impl RenderContext {
    pub fn spawn(state: RenderState, fps: u32) -> Result<Self> {
        let interval = Duration::from_secs_f32(1.0 / fps.max(1) as f32);
        let tick = Tick {
            interval,
            on_tick: Box::new(RenderState::refresh),
        };
        let (queue, worker) = SerialQueue::spawn_with_tick("render-context", state, tick)
            .context("Failed to spawn render context")?;
        Ok(Self {
            handle: RenderHandle { queue },
            worker,
        })
    }

    pub fn handle(&self) -> RenderHandle {
        self.handle.clone()
    }

    /// Stop refreshing once every [`RenderHandle`] is dropped.
    pub fn join(self) {
        let Self { handle, worker } = self;
        drop(handle);
        if worker.join().is_err() {
            tracing::error!("render context panicked");
        }
    }
}

/// Posts work to the render context from any thread.
#[derive(Clone)]
pub struct RenderHandle {
    queue: SerialQueue<RenderState>,
}

impl RenderHandle {
    /// Run `job` on the render context.
    pub fn post<F>(&self, job: F) -> Result<(), QueueClosed>
    where
        F: FnOnce(&mut RenderState) + Send + 'static,
    {
        self.queue.dispatch(job)
    }

    /// Run `job` on the render context and wait for its result.
    pub fn sync<F, R>(&self, job: F) -> Result<R, QueueClosed>
    where
        F: FnOnce(&mut RenderState) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.queue.sync(job)
    }

    /// Replace the detections; they are drawn on the next refresh.
    pub fn update_detections(&self, detections: Vec<Detection>) -> Result<(), QueueClosed> {
        self.post(move |state| state.renderer.update_detections(detections))
    }
}
