//! Typed session events and their fan-out.

use crate::overlay::Detection;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Capture is running and frames will follow.
    Started,
    /// Camera access was denied.
    NotAuthorized,
    /// No usable device, or attaching it failed.
    ConfigurationFailed,
    /// The inference collaborator finished a frame.
    PredictionsUpdated(Vec<Detection>),
    /// A runtime error that was not recovered automatically.
    RuntimeError(String),
}

/// Delivers every emitted event to every live subscriber.
///
/// Events of one kind arrive in emission order; there is no ordering across
/// kinds emitted from different threads.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<SessionEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    /// Fire-and-forget. Subscribers whose receiver is gone are dropped.
    pub fn emit(&self, event: SessionEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        tracing::trace!(?event, listeners = subscribers.len(), "event emitted");
    }
}
