//! Dedicated background worker
//!
//! One named OS thread per unlock session runs key derivation and seed
//! decryption in submission order. Shutting the worker down closes its
//! queue: the job in progress finishes, queued and later jobs never run.

use parking_lot::Mutex;
use seedvault_core::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Single-thread executor owned by one session
pub struct BackgroundWorker {
    name: String,
    jobs: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    stopped: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundWorker {
    /// Spawn the worker thread
    pub fn spawn(name: &str) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let thread_name = name.to_string();
        let stopped = Arc::new(AtomicBool::new(false));
        let thread_stopped = Arc::clone(&stopped);

        let handle = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                debug!(worker = %thread_name, "Background worker started");
                while let Some(job) = rx.blocking_recv() {
                    if thread_stopped.load(Ordering::Acquire) {
                        break;
                    }
                    job();
                }
                debug!(worker = %thread_name, "Background worker stopped");
            })?;

        Ok(Self {
            name: name.to_string(),
            jobs: Mutex::new(Some(tx)),
            stopped,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a job; fails with [`Error::SessionEnded`] after shutdown
    pub fn execute<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let jobs = self.jobs.lock();
        let Some(tx) = jobs.as_ref() else {
            return Err(Error::SessionEnded);
        };
        tx.send(Box::new(job)).map_err(|_| Error::SessionEnded)
    }

    /// Whether jobs are still accepted
    pub fn is_running(&self) -> bool {
        self.jobs.lock().as_ref().map_or(false, |tx| !tx.is_closed())
    }

    /// Stop accepting jobs. Does not wait for the thread.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
        if self.jobs.lock().take().is_some() {
            debug!(worker = %self.name, "Background worker shutting down");
        }
    }

    /// Shut down and wait for the thread to exit
    pub fn join(&self) -> Result<()> {
        self.shutdown();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            handle.join().map_err(|_| {
                warn!(worker = %self.name, "Background worker panicked");
                Error::InvalidState(format!("Worker {} panicked", self.name))
            })?;
        }
        Ok(())
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
