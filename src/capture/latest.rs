//! Capacity-1 channel that keeps only the newest value.
//!
//! Sending never blocks: a value that has not been received yet is replaced
//! and counted as dropped. The receiver sees values in send order, minus the
//! ones that were overwritten.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::sync::mpsc::SendError;

struct Slot<T> {
    value: Option<T>,
    senders: usize,
    receiver_alive: bool,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
    dropped: AtomicU64,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        // A panicking holder cannot leave the slot half-written.
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct LatestSender<T> {
    shared: Arc<Shared<T>>,
}

pub struct LatestReceiver<T> {
    shared: Arc<Shared<T>>,
}

pub fn channel<T>() -> (LatestSender<T>, LatestReceiver<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot {
            value: None,
            senders: 1,
            receiver_alive: true,
        }),
        ready: Condvar::new(),
        dropped: AtomicU64::new(0),
    });
    (
        LatestSender {
            shared: shared.clone(),
        },
        LatestReceiver { shared },
    )
}

impl<T> LatestSender<T> {
    /// Store `value`, discarding any value the receiver has not taken yet.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        let mut slot = self.shared.lock();
        if !slot.receiver_alive {
            return Err(SendError(value));
        }
        if slot.value.replace(value).is_some() {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        }
        drop(slot);
        self.shared.ready.notify_one();
        Ok(())
    }

    /// Number of values overwritten before they were received.
    #[cfg(test)]
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl<T> Clone for LatestSender<T> {
    fn clone(&self) -> Self {
        self.shared.lock().senders += 1;
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for LatestSender<T> {
    fn drop(&mut self) {
        let mut slot = self.shared.lock();
        slot.senders -= 1;
        if slot.senders == 0 {
            drop(slot);
            self.shared.ready.notify_all();
        }
    }
}

impl<T> LatestReceiver<T> {
    /// Block until a value is available.
    ///
    /// Returns `None` once every sender is gone and no value is pending.
    pub fn recv(&self) -> Option<T> {
        let mut slot = self.shared.lock();
        loop {
            if let Some(value) = slot.value.take() {
                return Some(value);
            }
            if slot.senders == 0 {
                return None;
            }
            slot = self
                .shared
                .ready
                .wait(slot)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Take the pending value, if any, without blocking.
    pub fn try_recv(&self) -> Option<T> {
        self.shared.lock().value.take()
    }

    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl<T> Drop for LatestReceiver<T> {
    fn drop(&mut self) {
        let mut slot = self.shared.lock();
        slot.receiver_alive = false;
        slot.value = None;
    }
}
