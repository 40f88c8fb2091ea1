//! Bounded background worker pool.
//!
//! A fixed number of tokio tasks drain one bounded queue. Submitting never
//! blocks: a full or closed queue hands the job back to the caller.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// Why a job was not queued; carries the job back
pub enum SubmitError<T> {
    Full(T),
    Closed(T),
}

impl<T> SubmitError<T> {
    pub fn into_inner(self) -> T {
        match self {
            SubmitError::Full(job) | SubmitError::Closed(job) => job,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            SubmitError::Full(_) => "queue full",
            SubmitError::Closed(_) => "pool closed",
        }
    }
}

impl<T> fmt::Debug for SubmitError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubmitError({})", self.reason())
    }
}

pub struct WorkerPool<T> {
    sender: Mutex<Option<mpsc::Sender<T>>>,
    workers: usize,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawn `workers` tasks on `runtime`, each running `handler` per job
    pub fn spawn<F, Fut>(runtime: &Handle, workers: usize, capacity: usize, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let workers = workers.max(1);
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let handler = Arc::new(handler);

        for worker_id in 0..workers {
            let receiver = Arc::clone(&receiver);
            let handler = Arc::clone(&handler);
            runtime.spawn(async move {
                loop {
                    let job = receiver.lock().await.recv().await;
                    match job {
                        Some(job) => handler(job).await,
                        None => break,
                    }
                }
                debug!("Worker {} exiting", worker_id);
            });
        }

        Self {
            sender: Mutex::new(Some(sender)),
            workers,
        }
    }

    pub fn try_submit(&self, job: T) -> Result<(), SubmitError<T>> {
        let Ok(guard) = self.sender.lock() else {
            return Err(SubmitError::Closed(job));
        };
        match guard.as_ref() {
            None => Err(SubmitError::Closed(job)),
            Some(sender) => sender.try_send(job).map_err(|e| match e {
                TrySendError::Full(job) => SubmitError::Full(job),
                TrySendError::Closed(job) => SubmitError::Closed(job),
            }),
        }
    }

    /// Stop intake. Jobs already queued still run.
    pub fn close(&self) {
        if let Ok(mut guard) = self.sender.lock() {
            if guard.take().is_some() {
                debug!("Worker pool closed");
            }
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}
