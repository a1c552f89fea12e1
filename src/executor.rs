//! Serial execution contexts.
//!
//! A [`SerialQueue`] is a named worker thread that exclusively owns a piece of
//! state. Every mutation of that state is a job posted to the queue, so jobs
//! never interleave and the state is never shared across threads.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A job run against the queue-owned state.
pub type Job<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

/// Returned when the worker thread is gone and a job could not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("serial queue is closed")]
pub struct QueueClosed;

/// Periodic callback run on the queue thread between jobs.
pub struct Tick<S> {
    pub interval: Duration,
    pub on_tick: Box<dyn FnMut(&mut S) + Send + 'static>,
}

/// Handle to a worker thread owning `S`.
///
/// Cloning the handle shares the same thread. The thread exits once every
/// handle is dropped and all queued jobs have run.
pub struct SerialQueue<S> {
    jobs: Sender<Job<S>>,
}

impl<S> Clone for SerialQueue<S> {
    fn clone(&self) -> Self {
        Self {
            jobs: self.jobs.clone(),
        }
    }
}

impl<S: Send + 'static> SerialQueue<S> {
    /// Spawn a queue that only runs posted jobs.
    pub fn spawn(name: &'static str, state: S) -> std::io::Result<(Self, JoinHandle<()>)> {
        Self::spawn_inner(name, state, None)
    }

    /// Spawn a queue that additionally runs `tick` at a fixed interval.
    ///
    /// Jobs posted before a tick is due always run before that tick.
    pub fn spawn_with_tick(
        name: &'static str,
        state: S,
        tick: Tick<S>,
    ) -> std::io::Result<(Self, JoinHandle<()>)> {
        Self::spawn_inner(name, state, Some(tick))
    }

    fn spawn_inner(
        name: &'static str,
        state: S,
        tick: Option<Tick<S>>,
    ) -> std::io::Result<(Self, JoinHandle<()>)> {
        let (tx, rx) = mpsc::channel::<Job<S>>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_queue(name, state, rx, tick))?;
        Ok((Self { jobs: tx }, handle))
    }
}

impl<S: 'static> SerialQueue<S> {
    /// Post a job without waiting for it.
    pub fn dispatch<F>(&self, job: F) -> Result<(), QueueClosed>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.jobs.send(Box::new(job)).map_err(|_| QueueClosed)
    }

    /// Post a job and block until it has run, returning its result.
    ///
    /// Blocks behind every job queued before it, including a suspension.
    pub fn sync<F, R>(&self, job: F) -> Result<R, QueueClosed>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        self.dispatch(move |state| {
            let _ = tx.send(job(state));
        })?;
        rx.recv().map_err(|_| QueueClosed)
    }

    /// Hold back every job posted after this call until the returned
    /// [`Resumer`] is resumed or dropped.
    pub fn suspend(&self) -> Result<Resumer<S>, QueueClosed> {
        let (tx, rx) = mpsc::sync_channel::<Job<S>>(1);
        self.dispatch(move |state| {
            // A dropped resumer releases the queue without touching state.
            if let Ok(job) = rx.recv() {
                job(state);
            }
        })?;
        Ok(Resumer { release: tx })
    }
}

/// Releases a suspended [`SerialQueue`].
pub struct Resumer<S> {
    release: mpsc::SyncSender<Job<S>>,
}

impl<S: 'static> Resumer<S> {
    pub fn resume(self) {
        let _ = self.release.send(Box::new(|_| {}));
    }

    /// Run `job` on the queue thread, ahead of everything held back, then
    /// release the queue.
    pub fn resume_with<F>(self, job: F)
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        let _ = self.release.send(Box::new(job));
    }
}

fn run_queue<S>(name: &'static str, mut state: S, rx: Receiver<Job<S>>, tick: Option<Tick<S>>) {
    tracing::debug!("{} started", name);

    match tick {
        None => {
            while let Ok(job) = rx.recv() {
                job(&mut state);
            }
        }
        Some(mut tick) => {
            let mut next = Instant::now() + tick.interval;
            loop {
                let now = Instant::now();
                if now >= next {
                    (tick.on_tick)(&mut state);
                    next += tick.interval;
                    // Skip ticks we fell behind on instead of bursting.
                    if next < now {
                        next = now + tick.interval;
                    }
                    continue;
                }
                match rx.recv_timeout(next - now) {
                    Ok(job) => job(&mut state),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }
    }

    tracing::debug!("{} stopped", name);
}
