//! The authoritative in-memory job registry.

use std::path::Path;
use std::sync::Arc;

use jobstore_config::StoreConfig;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::codec::SnapshotCodec;
use crate::error::RegistryError;
use crate::executor::BackgroundExecutor;
use crate::extras::{ExtrasCodec, XmlExtrasCodec};
use crate::job::JobRecord;
use crate::loader::{LoadReport, StartupLoader};
use crate::partition::{PerUserRange, UidPartitioner};
use crate::writer::{DirtyState, FlushStats, SnapshotFile, SnapshotWriter};

/// External services the store depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub clock: Arc<dyn Clock>,
    pub extras: Arc<dyn ExtrasCodec>,
    pub executor: Arc<dyn BackgroundExecutor>,
    pub partitioner: Arc<dyn UidPartitioner>,
}

impl Collaborators {
    /// System clock, XML extras and the default uid range.
    pub fn new(executor: Arc<dyn BackgroundExecutor>) -> Self {
        Self {
            clock: Arc::new(SystemClock::new()),
            extras: Arc::new(XmlExtrasCodec),
            executor,
            partitioner: Arc::new(PerUserRange::default()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_extras(mut self, extras: Arc<dyn ExtrasCodec>) -> Self {
        self.extras = extras;
        self
    }

    pub fn with_partitioner(mut self, partitioner: Arc<dyn UidPartitioner>) -> Self {
        self.partitioner = partitioner;
        self
    }
}

struct StoreState {
    jobs: Vec<JobRecord>,
    dirty: DirtyState,
}

struct StoreInner {
    state: Mutex<StoreState>,
    writer: SnapshotWriter,
    executor: Arc<dyn BackgroundExecutor>,
    partitioner: Arc<dyn UidPartitioner>,
    max_ops_before_write: u32,
    load_report: LoadReport,
}

/// Persistent job registry.
///
/// Records are unique by `(owner_uid, job_id)`. Mutations never block on
/// disk: persisted changes are written behind by the background executor.
/// Cloning yields another handle to the same registry. Queries are linear
/// scans, O(n) in the number of records.
#[derive(Clone)]
pub struct JobStore {
    inner: Arc<StoreInner>,
}

impl JobStore {
    /// Open with default collaborators and the uid range from `config`.
    pub fn open(
        config: &StoreConfig,
        executor: Arc<dyn BackgroundExecutor>,
    ) -> Result<Self, RegistryError> {
        let collaborators = Collaborators::new(executor)
            .with_partitioner(Arc::new(PerUserRange::new(config.per_user_range)));
        Self::open_with(config, collaborators)
    }

    /// Open and load the jobs file. Fails only when the state directory
    /// cannot be created.
    pub fn open_with(config: &StoreConfig, collaborators: Collaborators) -> Result<Self, RegistryError> {
        std::fs::create_dir_all(config.job_dir())?;

        let codec = SnapshotCodec::new(collaborators.clock, collaborators.extras);
        let file = SnapshotFile::new(config.jobs_file());
        let load_report = StartupLoader::new(&file, &codec).load();

        let state = StoreState {
            jobs: load_report.jobs.clone(),
            dirty: DirtyState::default(),
        };

        info!(
            "Job store opened at {:?} with {} jobs",
            file.path(),
            state.jobs.len()
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(state),
                writer: SnapshotWriter::new(file, codec),
                executor: collaborators.executor,
                partitioner: collaborators.partitioner,
                max_ops_before_write: config.max_ops_before_write,
                load_report,
            }),
        })
    }

    /// Open, then drop everything that was loaded.
    pub fn open_fresh(
        config: &StoreConfig,
        executor: Arc<dyn BackgroundExecutor>,
    ) -> Result<Self, RegistryError> {
        let store = Self::open(config, executor)?;
        store.clear();
        Ok(store)
    }

    /// Insert or replace by identity. Returns true if a record was replaced.
    pub fn add(&self, job: JobRecord) -> bool {
        let mut state = self.inner.state.lock();
        debug!("Adding {}", job);

        let persisted = job.is_persisted();
        let position = state
            .jobs
            .iter()
            .position(|j| j.matches(job.owner_uid(), job.job_id()));
        let (replaced, was_persisted) = match position {
            Some(index) => {
                let old = std::mem::replace(&mut state.jobs[index], job);
                (true, old.is_persisted())
            }
            None => {
                state.jobs.push(job);
                (false, false)
            }
        };

        // A transient record replacing a persisted one still changes the file.
        if persisted || was_persisted {
            self.mark_dirty(&mut state, self.inner.max_ops_before_write);
        }
        replaced
    }

    /// Remove the record with the same identity. Returns true if one existed.
    pub fn remove(&self, job: &JobRecord) -> bool {
        self.remove_identity(job.owner_uid(), job.job_id()).is_some()
    }

    /// Remove by identity, returning the removed record.
    pub fn remove_identity(&self, owner_uid: u32, job_id: i32) -> Option<JobRecord> {
        let mut state = self.inner.state.lock();
        let index = state.jobs.iter().position(|j| j.matches(owner_uid, job_id))?;
        let removed = state.jobs.remove(index);
        debug!("Removed {}", removed);

        if removed.is_persisted() {
            self.mark_dirty(&mut state, self.inner.max_ops_before_write);
        }
        Some(removed)
    }

    pub fn contains(&self, job_id: i32, owner_uid: u32) -> bool {
        self.inner
            .state
            .lock()
            .jobs
            .iter()
            .any(|j| j.matches(owner_uid, job_id))
    }

    /// Whether a record with the same identity is present.
    pub fn contains_record(&self, job: &JobRecord) -> bool {
        self.contains(job.job_id(), job.owner_uid())
    }

    pub fn get(&self, owner_uid: u32, job_id: i32) -> Option<JobRecord> {
        self.inner
            .state
            .lock()
            .jobs
            .iter()
            .find(|j| j.matches(owner_uid, job_id))
            .cloned()
    }

    /// Every record owned by `owner_uid`.
    pub fn jobs_for_owner(&self, owner_uid: u32) -> Vec<JobRecord> {
        self.filtered(|j| j.owner_uid() == owner_uid)
    }

    /// Every record whose owner belongs to `user_id`.
    pub fn jobs_for_user(&self, user_id: u32) -> Vec<JobRecord> {
        let partitioner = &self.inner.partitioner;
        self.filtered(|j| partitioner.partition_of(j.owner_uid()) == user_id)
    }

    /// Independent copy of all records.
    pub fn snapshot(&self) -> Vec<JobRecord> {
        self.inner.state.lock().jobs.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().jobs.is_empty()
    }

    /// Drop every record and schedule a flush.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        let count = state.jobs.len();
        state.jobs.clear();
        info!("Cleared {} jobs", count);
        self.mark_dirty(&mut state, self.inner.max_ops_before_write);
    }

    /// Schedule a flush regardless of the dirty threshold.
    pub fn request_flush(&self) {
        let mut state = self.inner.state.lock();
        self.mark_dirty(&mut state, 1);
    }

    /// Wait for every flush posted so far.
    pub async fn sync(&self) {
        self.inner.executor.drain().await;
    }

    pub fn flush_stats(&self) -> FlushStats {
        self.inner.state.lock().dirty.stats()
    }

    /// What the startup load found.
    pub fn load_report(&self) -> &LoadReport {
        &self.inner.load_report
    }

    /// Location of the durable jobs file.
    pub fn path(&self) -> &Path {
        self.inner.writer.file().path()
    }

    fn filtered(&self, predicate: impl Fn(&JobRecord) -> bool) -> Vec<JobRecord> {
        self.inner
            .state
            .lock()
            .jobs
            .iter()
            .filter(|j| predicate(*j))
            .cloned()
            .collect()
    }

    /// Count a mutation and post a flush when the threshold is reached.
    /// Posting only enqueues, so it is done under the lock.
    fn mark_dirty(&self, state: &mut StoreState, threshold: u32) {
        if !state.dirty.mark(threshold) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        if let Err(e) = self.inner.executor.post(Box::new(move || inner.flush())) {
            warn!("Could not schedule jobs file write: {}", e);
            state.dirty.post_failed();
        }
    }
}

impl StoreInner {
    /// Copy persisted records under the lock, then encode and write without it.
    fn flush(&self) {
        let (jobs, covered) = {
            let mut state = self.state.lock();
            let covered = state.dirty.begin_flush();
            let jobs: Vec<JobRecord> = state
                .jobs
                .iter()
                .filter(|j| j.is_persisted())
                .cloned()
                .collect();
            (jobs, covered)
        };

        let result = self.writer.write(&jobs);

        let mut state = self.state.lock();
        match result {
            Ok(took) => {
                state.dirty.flush_succeeded(covered, jobs.len(), took);
                debug!(
                    "Wrote {} jobs to {:?} in {:?}",
                    jobs.len(),
                    self.writer.file().path(),
                    took
                );
            }
            Err((e, took)) => {
                state.dirty.flush_failed(took);
                warn!(
                    "Failed to write jobs file {:?}: {}",
                    self.writer.file().path(),
                    e
                );
            }
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
