//! Background executors for snapshot writes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::error::RegistryError;

/// A unit of blocking I/O work.
pub type IoJob = Box<dyn FnOnce() + Send + 'static>;

/// Runs I/O jobs off the caller's thread, one at a time, in posting order.
#[async_trait]
pub trait BackgroundExecutor: Send + Sync {
    /// Enqueue a job. Never blocks.
    fn post(&self, job: IoJob) -> Result<(), RegistryError>;

    /// Wait until every job posted before this call has finished.
    async fn drain(&self);
}

enum IoCommand {
    Run(IoJob),
    Barrier(oneshot::Sender<()>),
}

/// Single tokio task that runs each job on the blocking pool, in sequence.
///
/// The worker stops once the `IoWorker` is dropped and the queue is empty.
pub struct IoWorker {
    name: String,
    tx: mpsc::UnboundedSender<IoCommand>,
    completed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl IoWorker {
    /// Spawn on the current tokio runtime.
    pub fn spawn(name: impl Into<String>) -> Result<Self, RegistryError> {
        let handle = Handle::try_current().map_err(|_| RegistryError::NoRuntime)?;
        Ok(Self::spawn_on(&handle, name))
    }

    /// Spawn on a specific runtime.
    pub fn spawn_on(handle: &Handle, name: impl Into<String>) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let completed = Arc::new(AtomicU64::new(0));
        let failed = Arc::new(AtomicU64::new(0));

        handle.spawn(run_loop(name.clone(), rx, completed.clone(), failed.clone()));

        Self {
            name,
            tx,
            completed,
            failed,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Jobs that ran to completion.
    pub fn jobs_completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Jobs that panicked.
    pub fn jobs_failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }
}

async fn run_loop(
    name: String,
    mut rx: mpsc::UnboundedReceiver<IoCommand>,
    completed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
) {
    info!("I/O worker '{}' started", name);

    while let Some(command) = rx.recv().await {
        match command {
            IoCommand::Run(job) => match tokio::task::spawn_blocking(job).await {
                Ok(()) => {
                    completed.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    failed.fetch_add(1, Ordering::SeqCst);
                    error!("I/O worker '{}' job failed: {}", name, e);
                }
            },
            IoCommand::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }

    info!("I/O worker '{}' stopped", name);
}

#[async_trait]
impl BackgroundExecutor for IoWorker {
    fn post(&self, job: IoJob) -> Result<(), RegistryError> {
        self.tx
            .send(IoCommand::Run(job))
            .map_err(|_| RegistryError::ExecutorClosed)
    }

    async fn drain(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(IoCommand::Barrier(done_tx)).is_err() {
            return;
        }
        let _ = done_rx.await;
    }
}

/// Executor that holds jobs until told to run them.
#[derive(Default)]
pub struct ManualExecutor {
    queue: Mutex<VecDeque<IoJob>>,
    closed: AtomicBool,
}

impl ManualExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs waiting.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run queued jobs, including any they post, until the queue is empty.
    /// Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        // The lock is released before each job runs; jobs may post more work.
        while self.run_one() {
            ran += 1;
        }
        if ran > 0 {
            debug!("Manual executor ran {} jobs", ran);
        }
        ran
    }

    /// Run only the oldest queued job.
    pub fn run_one(&self) -> bool {
        let job = self.queue.lock().pop_front();
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Reject all further posts.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BackgroundExecutor for ManualExecutor {
    fn post(&self, job: IoJob) -> Result<(), RegistryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RegistryError::ExecutorClosed);
        }
        self.queue.lock().push_back(job);
        Ok(())
    }

    async fn drain(&self) {
        self.run_pending();
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
