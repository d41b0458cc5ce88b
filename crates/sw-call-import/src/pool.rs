//! Bounded worker pool.
//!
//! `N` tokio tasks pull jobs from one bounded `async_channel`. Producers
//! wait in [`WorkerPool::submit`] while the queue is full, so a large
//! source result set never sits in memory. [`WorkerPool::drain`] closes the
//! queue and waits for every worker to finish its last job.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::{ImportError, Result};

/// Smallest and largest accepted pool size.
pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 10;

/// Per-worker job handler. Each worker owns its state (API handle, buffers);
/// failures are handled inside `handle` and never stop the pool. A panicking
/// job is logged and the worker moves on to the next one.
#[async_trait]
pub trait Worker<J>: Send + 'static {
    async fn handle(&mut self, job: J);
}

pub struct WorkerPool<J> {
    tx: async_channel::Sender<J>,
    handles: Vec<JoinHandle<()>>,
}

impl<J: Send + 'static> WorkerPool<J> {
    /// Start one task per worker. The queue holds up to `capacity` jobs.
    pub fn spawn<W: Worker<J>>(workers: Vec<W>, capacity: usize) -> Self {
        let (tx, rx) = async_channel::bounded::<J>(capacity.max(1));
        let handles = workers
            .into_iter()
            .enumerate()
            .map(|(id, mut worker)| {
                let rx = rx.clone();
                tokio::spawn(async move {
                    let (mut handled, mut failed) = (0usize, 0usize);
                    while let Ok(job) = rx.recv().await {
                        if let Err(panic) = AssertUnwindSafe(worker.handle(job)).catch_unwind().await {
                            error!("Worker {} job failed: {}", id, panic_message(&*panic));
                            failed += 1;
                        }
                        handled += 1;
                    }
                    debug!("Worker {} finished after {} jobs ({} failed)", id, handled, failed);
                })
            })
            .collect();
        Self { tx, handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Queue a job, waiting while the queue is full.
    pub async fn submit(&self, job: J) -> Result<()> {
        self.tx
            .send(job)
            .await
            .map_err(|_| ImportError::pool("job queue closed", "submit"))
    }

    /// Close the queue and wait for all workers. A worker task that died is
    /// logged; the remaining workers are still awaited.
    pub async fn drain(self) -> Result<()> {
        self.tx.close();
        for (id, handle) in self.handles.into_iter().enumerate() {
            if let Err(e) = handle.await {
                error!("Worker {} stopped abnormally: {}", id, e);
            }
        }
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("panic")
}
