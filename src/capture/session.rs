use super::latest::{self, LatestReceiver};
use super::orientation::{DeviceOrientation, OrientationCell};
use super::{
    select_device, AuthorizationStatus, CameraPermission, CaptureBackend, DeviceDescriptor,
    FrameConsumer, OutputSettings, PixelBuffer, RuntimeError, RuntimeErrorSink, DEVICE_PREFERENCE,
};
use crate::events::{EventBus, SessionEvent};
use crate::executor::{QueueClosed, SerialQueue};
use anyhow::{Context, Result};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

/// Result of session setup. Decided once; later steps only read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupOutcome {
    Success,
    NotAuthorized,
    ConfigurationFailed,
}

type SessionQueue<B> = SerialQueue<SessionCore<B>>;

/// State confined to the session queue.
struct SessionCore<B> {
    backend: B,
    events: EventBus,
    setup_outcome: SetupOutcome,
    is_running: bool,
    observing_runtime_errors: bool,
    runtime_errors: Option<RuntimeErrorSink>,
    active_device: Option<DeviceDescriptor>,
    frame_delivery: Vec<JoinHandle<()>>,
}

/// Owns a capture session and drives its lifecycle.
///
/// Setup, configuration, start, stop and runtime-error recovery all run on a
/// private serial queue, so they never interleave. Frames are handed to the
/// registered [`FrameConsumer`] on a separate frame-delivery thread.
pub struct CaptureSessionController<B: CaptureBackend> {
    queue: Arc<SessionQueue<B>>,
    worker: JoinHandle<()>,
    permission: Arc<dyn CameraPermission>,
    orientation: OrientationCell,
}

impl<B: CaptureBackend> CaptureSessionController<B> {
    /// Create the controller and run [`setup_session`](Self::setup_session).
    pub fn new(
        backend: B,
        permission: Arc<dyn CameraPermission>,
        events: EventBus,
        orientation: OrientationCell,
    ) -> Result<Self> {
        let core = SessionCore {
            backend,
            events,
            setup_outcome: SetupOutcome::Success,
            is_running: false,
            observing_runtime_errors: false,
            runtime_errors: None,
            active_device: None,
            frame_delivery: Vec::new(),
        };
        let (queue, worker) =
            SerialQueue::spawn("session-queue", core).context("Failed to spawn session queue")?;

        let controller = Self {
            queue: Arc::new(queue),
            worker,
            permission,
            orientation,
        };
        controller.setup_session();
        Ok(controller)
    }

    /// Resolve camera authorization.
    ///
    /// When the user has not been asked yet, the session queue is suspended
    /// until they answer, so configuration waits for the decision.
    pub fn setup_session(&self) {
        match self.permission.status() {
            AuthorizationStatus::Authorized => {
                tracing::debug!("Camera access previously granted");
            }
            AuthorizationStatus::NotDetermined => {
                let Ok(resumer) = self.queue.suspend() else {
                    return;
                };
                tracing::info!("Requesting camera access");
                self.permission.request_access(Box::new(move |granted| {
                    if granted {
                        tracing::info!("Camera access granted");
                        resumer.resume();
                    } else {
                        tracing::warn!("Camera access denied");
                        resumer.resume_with(|core| core.setup_outcome = SetupOutcome::NotAuthorized);
                    }
                }));
            }
            AuthorizationStatus::Denied | AuthorizationStatus::Restricted => {
                tracing::warn!("Camera access previously denied");
                self.post(|core| core.setup_outcome = SetupOutcome::NotAuthorized);
            }
        }
    }

    /// Select a device and attach input and output. Frames go to `consumer`.
    pub fn configure_session(&self, consumer: Arc<dyn FrameConsumer>) {
        let orientation = self.orientation.clone();
        self.post(move |core| core.configure(consumer, orientation));
    }

    pub fn start_session(&self) {
        let queue = Arc::downgrade(&self.queue);
        self.post(move |core| core.start(queue));
    }

    pub fn stop_session(&self) {
        self.post(SessionCore::stop);
    }

    pub fn setup_outcome(&self) -> Result<SetupOutcome, QueueClosed> {
        self.queue.sync(|core| core.setup_outcome)
    }

    pub fn is_running(&self) -> Result<bool, QueueClosed> {
        self.queue.sync(|core| core.is_running)
    }

    pub fn active_device(&self) -> Result<Option<DeviceDescriptor>, QueueClosed> {
        self.queue.sync(|core| core.active_device.clone())
    }

    /// Follow a device rotation for frames delivered from now on.
    pub fn set_device_orientation(&self, device: DeviceOrientation) {
        if self.orientation.rotate_to(device) {
            tracing::debug!(orientation = ?self.orientation.get(), "video orientation changed");
        }
    }

    /// Close the session queue and wait for queued work to finish, then for
    /// frame delivery to drain.
    ///
    /// Frame delivery ends once the backend has released its frame writer,
    /// which happens at the latest when the backend is dropped with the queue.
    pub fn shutdown(self) {
        let Self { queue, worker, .. } = self;
        let delivery = queue
            .sync(|core| std::mem::take(&mut core.frame_delivery))
            .unwrap_or_default();
        drop(queue);
        if worker.join().is_err() {
            tracing::error!("session queue panicked");
        }
        for handle in delivery {
            if handle.join().is_err() {
                tracing::error!("frame delivery panicked");
            }
        }
    }

    fn post<F>(&self, job: F)
    where
        F: FnOnce(&mut SessionCore<B>) + Send + 'static,
    {
        if self.queue.dispatch(job).is_err() {
            tracing::error!("session queue is gone, dropping session work");
        }
    }
}

impl<B: CaptureBackend> SessionCore<B> {
    fn configure(&mut self, consumer: Arc<dyn FrameConsumer>, orientation: OrientationCell) {
        if self.setup_outcome != SetupOutcome::Success {
            tracing::debug!(outcome = ?self.setup_outcome, "skipping session configuration");
            return;
        }

        let devices = self.backend.devices();
        tracing::debug!(count = devices.len(), "video devices found");

        let Some(device) = select_device(DEVICE_PREFERENCE, &devices).cloned() else {
            tracing::warn!("Could not find a video capture device");
            self.setup_outcome = SetupOutcome::ConfigurationFailed;
            return;
        };

        if let Err(e) = self.backend.attach_input(&device) {
            tracing::warn!("Could not add video device input to the session: {}", e);
            self.setup_outcome = SetupOutcome::ConfigurationFailed;
            return;
        }
        tracing::info!("Video input: {} ({:?}, {:?})", device.name, device.kind, device.position);
        self.active_device = Some(device);

        self.add_video_output(consumer, orientation);
    }

    fn add_video_output(&mut self, consumer: Arc<dyn FrameConsumer>, orientation: OrientationCell) {
        let (writer, frames) = latest::channel();
        let settings = OutputSettings::default();

        match self.backend.attach_output(&settings, writer) {
            Ok(connection) => {
                if connection.stabilization_supported {
                    self.backend.enable_stabilization();
                    tracing::debug!("video stabilization enabled");
                }
                match spawn_frame_delivery(frames, consumer, orientation) {
                    Ok(handle) => {
                        // Finished threads belong to outputs that were replaced.
                        self.frame_delivery.retain(|h| !h.is_finished());
                        self.frame_delivery.push(handle);
                    }
                    Err(e) => tracing::error!("Failed to spawn frame delivery thread: {}", e),
                }
            }
            Err(e) => tracing::warn!("Could not add video output to the session: {}", e),
        }
    }

    fn start(&mut self, queue: Weak<SessionQueue<B>>) {
        match self.setup_outcome {
            SetupOutcome::Success => {
                self.observing_runtime_errors = true;
                let errors = runtime_error_sink(queue);
                self.runtime_errors = Some(errors.clone());

                self.is_running = self.backend.start_running(errors);
                tracing::info!(running = self.is_running, "Capture session started");
                self.events.emit(SessionEvent::Started);
            }
            SetupOutcome::NotAuthorized => self.events.emit(SessionEvent::NotAuthorized),
            SetupOutcome::ConfigurationFailed => {
                self.events.emit(SessionEvent::ConfigurationFailed)
            }
        }
    }

    fn stop(&mut self) {
        if self.setup_outcome != SetupOutcome::Success {
            return;
        }
        self.backend.stop_running();
        self.is_running = false;
        self.observing_runtime_errors = false;
        self.runtime_errors = None;
        tracing::info!("Capture session stopped");
    }

    /// Restart once after a media-service reset if capture was running;
    /// surface anything else.
    fn handle_runtime_error(&mut self, error: RuntimeError) {
        if !self.observing_runtime_errors {
            tracing::debug!("ignoring runtime error after stop: {}", error);
            return;
        }

        if error == RuntimeError::MediaServicesReset && self.is_running {
            if let Some(errors) = self.runtime_errors.clone() {
                tracing::warn!("Media services were reset, restarting capture");
                self.is_running = self.backend.start_running(errors);
                tracing::info!(running = self.is_running, "Capture restart attempted");
                return;
            }
        }

        self.events.emit(SessionEvent::RuntimeError(error.to_string()));
    }
}

/// Runtime errors hop onto the session queue. The sink holds the queue
/// weakly so a backend storing it does not keep the queue alive.
fn runtime_error_sink<B: CaptureBackend>(queue: Weak<SessionQueue<B>>) -> RuntimeErrorSink {
    RuntimeErrorSink::new(move |error| {
        tracing::error!("Capture session runtime error: {}", error);
        if let Some(queue) = queue.upgrade() {
            let _ = queue.dispatch(move |core| core.handle_runtime_error(error));
        }
    })
}

fn spawn_frame_delivery(
    frames: LatestReceiver<PixelBuffer>,
    consumer: Arc<dyn FrameConsumer>,
    orientation: OrientationCell,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("frame-delivery".to_string())
        .spawn(move || {
            let mut delivered = 0u64;
            while let Some(frame) = frames.recv() {
                consumer.on_frame(frame, orientation.get());
                delivered += 1;
                if delivered % 300 == 0 {
                    tracing::debug!(delivered, dropped = frames.dropped(), "frame delivery");
                }
            }
            tracing::debug!(delivered, dropped = frames.dropped(), "frame delivery finished");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::orientation::{InterfaceOrientation, VideoOrientation};
    use crate::capture::{
        CaptureError, DeviceKind, DevicePosition, FrameWriter, OutputConnection,
    };
    use std::sync::mpsc::{self, Receiver};
    use std::sync::Mutex;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    #[derive(Default)]
    struct Calls {
        inputs: Vec<String>,
        outputs: usize,
        starts: usize,
        stops: usize,
        stabilized: bool,
    }

    #[derive(Clone, Default)]
    struct Probe {
        calls: Arc<Mutex<Calls>>,
        writer: Arc<Mutex<Option<FrameWriter>>>,
        errors: Arc<Mutex<Option<RuntimeErrorSink>>>,
    }

    impl Probe {
        fn with<R>(&self, f: impl FnOnce(&Calls) -> R) -> R {
            f(&self.calls.lock().unwrap())
        }

        fn report(&self, error: RuntimeError) {
            let sink = self.errors.lock().unwrap().clone().expect("session never started");
            sink.report(error);
        }
    }

    struct MockBackend {
        devices: Vec<DeviceDescriptor>,
        fail_input: bool,
        stabilization: bool,
        starts_ok: bool,
        probe: Probe,
    }

    impl MockBackend {
        fn new(devices: Vec<DeviceDescriptor>) -> (Self, Probe) {
            let probe = Probe::default();
            let backend = Self {
                devices,
                fail_input: false,
                stabilization: false,
                starts_ok: true,
                probe: probe.clone(),
            };
            (backend, probe)
        }
    }

    impl CaptureBackend for MockBackend {
        fn devices(&mut self) -> Vec<DeviceDescriptor> {
            self.devices.clone()
        }

        fn attach_input(&mut self, device: &DeviceDescriptor) -> Result<(), CaptureError> {
            if self.fail_input {
                return Err(CaptureError::DeviceOpen {
                    device: device.id.clone(),
                    reason: "busy".into(),
                });
            }
            self.probe.calls.lock().unwrap().inputs.push(device.id.clone());
            Ok(())
        }

        fn attach_output(
            &mut self,
            settings: &OutputSettings,
            writer: FrameWriter,
        ) -> Result<OutputConnection, CaptureError> {
            assert!(settings.discard_late_frames);
            self.probe.calls.lock().unwrap().outputs += 1;
            *self.probe.writer.lock().unwrap() = Some(writer);
            Ok(OutputConnection {
                stabilization_supported: self.stabilization,
            })
        }

        fn enable_stabilization(&mut self) {
            self.probe.calls.lock().unwrap().stabilized = true;
        }

        fn start_running(&mut self, errors: RuntimeErrorSink) -> bool {
            self.probe.calls.lock().unwrap().starts += 1;
            *self.probe.errors.lock().unwrap() = Some(errors);
            self.starts_ok
        }

        fn stop_running(&mut self) {
            self.probe.calls.lock().unwrap().stops += 1;
        }
    }

    struct MockPermission {
        status: AuthorizationStatus,
        answer: bool,
    }

    impl MockPermission {
        fn new(status: AuthorizationStatus) -> Arc<Self> {
            Arc::new(Self {
                status,
                answer: true,
            })
        }

        fn asking(answer: bool) -> Arc<Self> {
            Arc::new(Self {
                status: AuthorizationStatus::NotDetermined,
                answer,
            })
        }
    }

    impl CameraPermission for MockPermission {
        fn status(&self) -> AuthorizationStatus {
            self.status
        }

        fn request_access(&self, on_complete: Box<dyn FnOnce(bool) + Send>) {
            let answer = self.answer;
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                on_complete(answer);
            });
        }
    }

    struct ChannelConsumer {
        frames: Mutex<mpsc::Sender<(PixelBuffer, VideoOrientation)>>,
    }

    impl FrameConsumer for ChannelConsumer {
        fn on_frame(&self, frame: PixelBuffer, orientation: VideoOrientation) {
            let _ = self.frames.lock().unwrap().send((frame, orientation));
        }
    }

    fn consumer() -> (Arc<ChannelConsumer>, Receiver<(PixelBuffer, VideoOrientation)>) {
        let (tx, rx) = mpsc::channel();
        (
            Arc::new(ChannelConsumer {
                frames: Mutex::new(tx),
            }),
            rx,
        )
    }

    fn back_dual() -> DeviceDescriptor {
        DeviceDescriptor::new("0", "Back Dual Camera", DeviceKind::DualCamera, DevicePosition::Back)
    }

    fn controller(
        backend: MockBackend,
        permission: Arc<MockPermission>,
    ) -> (CaptureSessionController<MockBackend>, Receiver<SessionEvent>) {
        let bus = EventBus::new();
        let events = bus.subscribe();
        let controller = CaptureSessionController::new(
            backend,
            permission,
            bus,
            OrientationCell::new(InterfaceOrientation::LandscapeRight),
        )
        .unwrap();
        (controller, events)
    }

    #[test]
    fn configures_back_dual_camera() {
        let (backend, probe) = MockBackend::new(vec![back_dual()]);
        let (ctl, _events) = controller(backend, MockPermission::new(AuthorizationStatus::Authorized));
        let (consumer, _frames) = consumer();

        ctl.configure_session(consumer);

        assert_eq!(ctl.setup_outcome().unwrap(), SetupOutcome::Success);
        assert_eq!(ctl.active_device().unwrap(), Some(back_dual()));
        probe.with(|c| {
            assert_eq!(c.inputs, vec!["0".to_string()]);
            assert_eq!(c.outputs, 1);
        });
    }

    #[test]
    fn no_devices_fails_configuration() {
        let (backend, probe) = MockBackend::new(Vec::new());
        let (ctl, events) = controller(backend, MockPermission::new(AuthorizationStatus::Authorized));
        let (consumer, frames) = consumer();

        ctl.configure_session(consumer);
        assert_eq!(ctl.setup_outcome().unwrap(), SetupOutcome::ConfigurationFailed);
        assert_eq!(ctl.active_device().unwrap(), None);

        ctl.start_session();
        assert_eq!(events.recv_timeout(WAIT).unwrap(), SessionEvent::ConfigurationFailed);

        probe.with(|c| {
            assert_eq!(c.outputs, 0);
            assert_eq!(c.starts, 0);
        });
        assert!(probe.writer.lock().unwrap().is_none());
        assert!(frames.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn input_error_aborts_configuration() {
        let (mut backend, probe) = MockBackend::new(vec![back_dual()]);
        backend.fail_input = true;
        let (ctl, _events) = controller(backend, MockPermission::new(AuthorizationStatus::Authorized));
        let (consumer, _frames) = consumer();

        ctl.configure_session(consumer);
        assert_eq!(ctl.setup_outcome().unwrap(), SetupOutcome::ConfigurationFailed);
        probe.with(|c| assert_eq!(c.outputs, 0));
    }

    #[test]
    fn denied_access_skips_configuration() {
        let (backend, probe) = MockBackend::new(vec![back_dual()]);
        let (ctl, events) = controller(backend, MockPermission::new(AuthorizationStatus::Denied));
        let (consumer, _frames) = consumer();

        ctl.configure_session(consumer);
        ctl.start_session();

        assert_eq!(events.recv_timeout(WAIT).unwrap(), SessionEvent::NotAuthorized);
        assert_eq!(ctl.setup_outcome().unwrap(), SetupOutcome::NotAuthorized);
        probe.with(|c| {
            assert!(c.inputs.is_empty());
            assert_eq!(c.starts, 0);
        });

        ctl.stop_session();
        assert!(!ctl.is_running().unwrap());
        probe.with(|c| assert_eq!(c.stops, 0));
    }

    #[test]
    fn configuration_waits_for_permission_answer() {
        let (backend, probe) = MockBackend::new(vec![back_dual()]);
        let (ctl, _events) = controller(backend, MockPermission::asking(true));
        let (consumer, _frames) = consumer();

        ctl.configure_session(consumer);
        assert_eq!(ctl.setup_outcome().unwrap(), SetupOutcome::Success);
        probe.with(|c| assert_eq!(c.inputs.len(), 1));
    }

    #[test]
    fn refused_permission_request_is_not_authorized() {
        let (backend, probe) = MockBackend::new(vec![back_dual()]);
        let (ctl, events) = controller(backend, MockPermission::asking(false));
        let (consumer, _frames) = consumer();

        ctl.configure_session(consumer);
        ctl.start_session();

        assert_eq!(events.recv_timeout(WAIT).unwrap(), SessionEvent::NotAuthorized);
        probe.with(|c| assert!(c.inputs.is_empty()));
    }

    #[test]
    fn start_and_stop_running_session() {
        let (backend, probe) = MockBackend::new(vec![back_dual()]);
        let (ctl, events) = controller(backend, MockPermission::new(AuthorizationStatus::Authorized));
        let (consumer, _frames) = consumer();

        ctl.configure_session(consumer);
        ctl.start_session();
        assert_eq!(events.recv_timeout(WAIT).unwrap(), SessionEvent::Started);
        assert!(ctl.is_running().unwrap());

        ctl.stop_session();
        assert!(!ctl.is_running().unwrap());
        probe.with(|c| {
            assert_eq!(c.starts, 1);
            assert_eq!(c.stops, 1);
        });
        assert!(events.try_recv().is_err());

        probe.writer.lock().unwrap().take();
        ctl.shutdown();
    }

    #[test]
    fn shutdown_waits_for_frame_delivery() {
        let (backend, probe) = MockBackend::new(vec![back_dual()]);
        let (ctl, _events) = controller(backend, MockPermission::new(AuthorizationStatus::Authorized));
        let (consumer, frames) = consumer();

        ctl.configure_session(consumer.clone());
        ctl.start_session();
        ctl.is_running().unwrap();

        let writer = probe.writer.lock().unwrap().take().expect("output attached");
        writer.send(PixelBuffer::from_bgra(1, 1, vec![0, 0, 0, 255]).unwrap()).unwrap();
        drop(writer);
        ctl.stop_session();
        ctl.shutdown();

        // The delivery thread has exited and released its consumer.
        assert_eq!(Arc::strong_count(&consumer), 1);
        assert!(frames.try_recv().is_ok());
    }

    #[test]
    fn frames_reach_consumer_in_order_with_orientation() {
        let (backend, probe) = MockBackend::new(vec![back_dual()]);
        let (ctl, _events) = controller(backend, MockPermission::new(AuthorizationStatus::Authorized));
        let (consumer, frames) = consumer();

        ctl.configure_session(consumer);
        ctl.start_session();
        ctl.is_running().unwrap();

        let writer = probe.writer.lock().unwrap().take().expect("output attached");
        let first = PixelBuffer::from_bgra(1, 1, vec![1, 2, 3, 255]).unwrap();
        writer.send(first.clone()).unwrap();
        let (frame, orientation) = frames.recv_timeout(WAIT).unwrap();
        assert_eq!(frame, first);
        assert_eq!(orientation, VideoOrientation::LandscapeRight);

        ctl.set_device_orientation(crate::capture::orientation::DeviceOrientation::LandscapeRight);
        let second = PixelBuffer::from_bgra(1, 1, vec![4, 5, 6, 255]).unwrap();
        writer.send(second.clone()).unwrap();
        let (frame, orientation) = frames.recv_timeout(WAIT).unwrap();
        assert_eq!(frame, second);
        assert_eq!(orientation, VideoOrientation::LandscapeLeft);
    }

    #[test]
    fn stabilization_enabled_when_supported() {
        let (mut backend, probe) = MockBackend::new(vec![back_dual()]);
        backend.stabilization = true;
        let (ctl, _events) = controller(backend, MockPermission::new(AuthorizationStatus::Authorized));
        let (consumer, _frames) = consumer();

        ctl.configure_session(consumer);
        ctl.is_running().unwrap();
        probe.with(|c| assert!(c.stabilized));
    }

    #[test]
    fn media_reset_while_running_restarts_once() {
        let (backend, probe) = MockBackend::new(vec![back_dual()]);
        let (ctl, events) = controller(backend, MockPermission::new(AuthorizationStatus::Authorized));
        let (consumer, _frames) = consumer();

        ctl.configure_session(consumer);
        ctl.start_session();
        assert_eq!(events.recv_timeout(WAIT).unwrap(), SessionEvent::Started);

        probe.report(RuntimeError::MediaServicesReset);
        assert!(ctl.is_running().unwrap());
        probe.with(|c| assert_eq!(c.starts, 2));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn media_reset_while_stopped_is_surfaced() {
        let (mut backend, probe) = MockBackend::new(vec![back_dual()]);
        backend.starts_ok = false;
        let (ctl, events) = controller(backend, MockPermission::new(AuthorizationStatus::Authorized));
        let (consumer, _frames) = consumer();

        ctl.configure_session(consumer);
        ctl.start_session();
        assert_eq!(events.recv_timeout(WAIT).unwrap(), SessionEvent::Started);
        assert!(!ctl.is_running().unwrap());

        probe.report(RuntimeError::MediaServicesReset);
        ctl.is_running().unwrap();
        probe.with(|c| assert_eq!(c.starts, 1));
        assert_eq!(
            events.recv_timeout(WAIT).unwrap(),
            SessionEvent::RuntimeError("media services were reset".into())
        );
    }

    #[test]
    fn runtime_errors_after_stop_are_ignored() {
        let (backend, probe) = MockBackend::new(vec![back_dual()]);
        let (ctl, events) = controller(backend, MockPermission::new(AuthorizationStatus::Authorized));
        let (consumer, _frames) = consumer();

        ctl.configure_session(consumer);
        ctl.start_session();
        assert_eq!(events.recv_timeout(WAIT).unwrap(), SessionEvent::Started);
        ctl.stop_session();

        probe.report(RuntimeError::Other("device unplugged".into()));
        ctl.is_running().unwrap();
        probe.with(|c| assert_eq!(c.starts, 1));
        assert!(events.try_recv().is_err());
    }
}
