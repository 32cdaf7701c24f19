//! Single-worker execution queue
//!
//! Every coordinator submits its work here. Jobs run one at a time on a
//! dedicated thread in submission order, and callers block until their job
//! has finished, so stores never see two coordinator operations interleave.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use crate::error::StorageError;

/// Maximum number of jobs waiting for the worker.
const QUEUE_BOUND: usize = 64;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a serial worker thread. Clones share the same worker.
#[derive(Clone)]
pub struct SerialQueue {
    worker: Arc<Worker>,
}

struct Worker {
    label: String,
    sender: Option<SyncSender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl SerialQueue {
    /// Spawn the worker thread.
    pub fn spawn(label: &str) -> Result<Self, StorageError> {
        let (sender, receiver) = mpsc::sync_channel::<Job>(QUEUE_BOUND);
        let handle = thread::Builder::new()
            .name(label.to_string())
            .spawn(move || run_worker(receiver))
            .map_err(|e| StorageError::Internal(format!("spawn {}: {}", label, e)))?;

        debug!(queue = label, "serial queue started");
        Ok(Self {
            worker: Arc::new(Worker {
                label: label.to_string(),
                sender: Some(sender),
                handle: Some(handle),
            }),
        })
    }

    pub fn label(&self) -> &str {
        &self.worker.label
    }

    /// Run `job` on the worker and wait for its result.
    ///
    /// A panic inside the job is caught and reported as
    /// [`StorageError::Internal`]; the worker keeps serving later jobs.
    /// Must not be called from inside another job of the same queue.
    pub fn run<T, F>(&self, job: F) -> Result<T, StorageError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let sender = self
            .worker
            .sender
            .as_ref()
            .ok_or_else(|| StorageError::Internal("queue has shut down".into()))?;

        let (reply_tx, reply_rx) = mpsc::channel();
        let wrapped: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(job));
            let _ = reply_tx.send(outcome);
        });

        sender
            .send(wrapped)
            .map_err(|_| StorageError::Internal(format!("{} has shut down", self.label())))?;

        match reply_rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => {
                let message = panic_message(payload.as_ref());
                error!(queue = self.label(), panic = %message, "job panicked");
                Err(StorageError::Internal(message))
            }
            Err(_) => Err(StorageError::Internal(format!(
                "{} dropped the reply channel",
                self.label()
            ))),
        }
    }
}

fn run_worker(receiver: Receiver<Job>) {
    while let Ok(job) = receiver.recv() {
        job();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "job panicked".to_string()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        debug!(queue = %self.label, "serial queue stopped");
    }
}
