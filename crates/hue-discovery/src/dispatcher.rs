//! FIFO delivery of caller-facing callbacks on a dedicated thread.

use hue_discovery_core::{DiscoveryError, Result};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, warn};

type Work = Box<dyn FnOnce() + Send + 'static>;

/// Runs posted closures one after another on its own thread.
///
/// Work never runs on the posting thread, so a callback can never re-enter
/// code that is still holding its own lock. Dropping the dispatcher drains
/// everything already posted.
pub struct SerializingDispatcher {
    tx: Option<flume::Sender<Work>>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
}

impl SerializingDispatcher {
    /// Spawns the delivery thread.
    pub fn new(name: &str) -> Result<Self> {
        let (tx, rx) = flume::unbounded::<Work>();

        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(work) = rx.recv() {
                    work();
                }
                debug!("Dispatcher thread exiting");
            })
            .map_err(|e| DiscoveryError::Runtime(format!("failed to spawn dispatcher: {}", e)))?;

        Ok(Self {
            tx: Some(tx),
            worker_id: worker.thread().id(),
            worker: Some(worker),
        })
    }

    /// Queues `work`. Returns false if the dispatcher is shutting down.
    pub fn post<F>(&self, work: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(tx) = &self.tx else {
            return false;
        };

        if tx.send(Box::new(work)).is_err() {
            warn!("Dispatcher thread is gone, dropping callback");
            return false;
        }
        true
    }

    /// True when called from the delivery thread
    pub fn is_dispatcher_thread(&self) -> bool {
        thread::current().id() == self.worker_id
    }
}

impl Drop for SerializingDispatcher {
    fn drop(&mut self) {
        self.tx.take();

        // Dropped from inside a callback: the loop ends on its own once the
        // current closure returns.
        if self.is_dispatcher_thread() {
            return;
        }

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Dispatcher thread panicked");
            }
        }
    }
}
