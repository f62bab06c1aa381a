//! Fixed-size worker pool that keeps service code off the I/O threads.
//!
//! Jobs are queued on an unbounded channel and run by a fixed set of named
//! worker threads. Each worker owns a [`ChainContext`] that it lends to every
//! job it runs; a job that panics is logged and the worker carries on.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use courier_protocol::ChainContext;
use crossbeam::channel::{self, Receiver, Sender};
use thiserror::Error;
use tracing::{debug, warn};

use super::DISPATCH_TARGET;

type Job = Box<dyn FnOnce(&mut ChainContext) + Send + 'static>;

/// Errors raised by the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A pool needs at least one worker.
    #[error("worker pool size must be at least one")]
    Empty,
    /// A worker thread could not be started.
    #[error("failed to spawn worker thread {index}: {source}")]
    Spawn {
        /// Index of the worker that failed to start.
        index: usize,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The pool has been shut down.
    #[error("worker pool is shut down")]
    Closed,
    /// A worker thread panicked outside a job.
    #[error("worker thread panicked")]
    ThreadPanic,
}

/// Pool of dispatch workers.
#[derive(Debug)]
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Starts `size` workers.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Empty`] for a zero size and
    /// [`PoolError::Spawn`] when a thread cannot be started.
    pub fn new(size: usize) -> Result<Self, PoolError> {
        if size == 0 {
            return Err(PoolError::Empty);
        }
        let (sender, receiver) = channel::unbounded::<Job>();
        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let receiver = receiver.clone();
            let worker = thread::Builder::new()
                .name(format!("courierd-worker-{index}"))
                .spawn(move || run_worker(index, &receiver))
                .map_err(|source| PoolError::Spawn { index, source })?;
            workers.push(worker);
        }
        debug!(target: DISPATCH_TARGET, size, "worker pool started");
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            size,
        })
    }

    /// Number of worker threads.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Queues `job` for the next free worker.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] once the pool has been shut down.
    pub fn execute<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce(&mut ChainContext) + Send + 'static,
    {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(PoolError::Closed)?;
        sender.send(Box::new(job)).map_err(|_| PoolError::Closed)
    }

    /// Stops accepting jobs. Queued jobs still run.
    pub fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Closes the pool and waits for every worker to drain the queue.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ThreadPanic`] if a worker died.
    pub fn join(&self) -> Result<(), PoolError> {
        self.close();
        let workers = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let mut result = Ok(());
        for worker in workers {
            if worker.join().is_err() {
                result = Err(PoolError::ThreadPanic);
            }
        }
        result
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_worker(index: usize, jobs: &Receiver<Job>) {
    let mut chain = ChainContext::new();
    while let Ok(job) = jobs.recv() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(&mut chain)));
        if let Err(payload) = outcome {
            warn!(
                target: DISPATCH_TARGET,
                worker = index,
                panic = %panic_message(payload.as_ref()),
                "dispatch job panicked"
            );
        }
        if !chain.is_clear() {
            warn!(
                target: DISPATCH_TARGET,
                worker = index,
                "job left chain state behind; clearing"
            );
            chain.clear();
        }
    }
    debug!(target: DISPATCH_TARGET, worker = index, "worker stopped");
}

/// Text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_owned())
}
