//! Write-behind persistence: dirty-operation accounting and the snapshot file.
//!
//! ```text
//! Idle --mutation--> Dirty(n) --n >= threshold--> FlushScheduled
//!   ^                                                   |
//!   |                                          snapshot taken
//!   +------------- write finished <------- Flushing <---+
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::codec::SnapshotCodec;
use crate::error::RegistryError;
use crate::job::JobRecord;

/// The durable jobs file. Only ever replaced by rename.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole file; `None` when it does not exist.
    pub fn read(&self) -> io::Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Replace the file atomically: write a temp file beside it, fsync, rename.
    pub fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let dir = self.path.parent().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{:?} has no parent directory", self.path),
            )
        })?;
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        debug!("Wrote {} bytes to {:?}", bytes.len(), self.path);
        Ok(())
    }
}

/// Counters describing background flush activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushStats {
    /// Flushes that replaced the file.
    pub completed: u64,
    /// Flushes whose encode or write failed.
    pub failed: u64,
    /// Mutations not yet covered by a successful flush.
    pub pending_ops: u64,
    /// Wall time of the most recent flush attempt.
    pub last_duration: Option<Duration>,
    /// Records written by the most recent successful flush.
    pub last_job_count: usize,
}

/// Dirty-operation accounting. Lives inside the registry lock.
#[derive(Debug, Default)]
pub(crate) struct DirtyState {
    dirty_ops: u64,
    flush_queued: bool,
    stats: FlushStats,
}

impl DirtyState {
    /// Count one mutation. Returns true when the caller must post a flush.
    pub(crate) fn mark(&mut self, threshold: u32) -> bool {
        self.dirty_ops += 1;
        if self.dirty_ops >= u64::from(threshold.max(1)) && !self.flush_queued {
            self.flush_queued = true;
            return true;
        }
        false
    }

    /// A posted flush could not be enqueued; let the next mutation retry.
    pub(crate) fn post_failed(&mut self) {
        self.flush_queued = false;
    }

    /// Called when a flush takes its snapshot. Returns the count it covers.
    pub(crate) fn begin_flush(&mut self) -> u64 {
        self.flush_queued = false;
        self.dirty_ops
    }

    /// Only the operations captured by the snapshot are retired.
    pub(crate) fn flush_succeeded(&mut self, covered: u64, jobs: usize, took: Duration) {
        self.dirty_ops = self.dirty_ops.saturating_sub(covered);
        self.stats.completed += 1;
        self.stats.last_duration = Some(took);
        self.stats.last_job_count = jobs;
    }

    /// The counter is left as is so the next mutation triggers a retry.
    pub(crate) fn flush_failed(&mut self, took: Duration) {
        self.stats.failed += 1;
        self.stats.last_duration = Some(took);
    }

    #[cfg(test)]
    pub(crate) fn dirty_ops(&self) -> u64 {
        self.dirty_ops
    }

    #[cfg(test)]
    pub(crate) fn is_flush_queued(&self) -> bool {
        self.flush_queued
    }

    pub(crate) fn stats(&self) -> FlushStats {
        FlushStats {
            pending_ops: self.dirty_ops,
            ..self.stats
        }
    }
}

/// Encodes snapshots and writes them to the durable file.
pub(crate) struct SnapshotWriter {
    file: SnapshotFile,
    codec: SnapshotCodec,
}

impl SnapshotWriter {
    pub(crate) fn new(file: SnapshotFile, codec: SnapshotCodec) -> Self {
        Self { file, codec }
    }

    pub(crate) fn file(&self) -> &SnapshotFile {
        &self.file
    }

    /// Encode and write `jobs`. Returns how long it took.
    pub(crate) fn write(&self, jobs: &[JobRecord]) -> Result<Duration, (RegistryError, Duration)> {
        let started = Instant::now();
        let result = self
            .codec
            .encode(jobs)
            .map_err(RegistryError::from)
            .and_then(|bytes| self.file.write(&bytes).map_err(RegistryError::from));

        match result {
            Ok(()) => Ok(started.elapsed()),
            Err(e) => Err((e, started.elapsed())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_file_read_missing() {
        let temp_dir = TempDir::new().unwrap();
        let file = SnapshotFile::new(temp_dir.path().join("job").join("jobs.xml"));
        assert!(file.read().unwrap().is_none());
    }

    #[test]
    fn test_snapshot_file_write_creates_dir_and_replaces() {
        let temp_dir = TempDir::new().unwrap();
        let file = SnapshotFile::new(temp_dir.path().join("job").join("jobs.xml"));

        file.write(b"first").unwrap();
        assert_eq!(file.read().unwrap().unwrap(), b"first");
        file.write(b"second").unwrap();
        assert_eq!(file.read().unwrap().unwrap(), b"second");

        // No temp files left behind.
        let entries = fs::read_dir(temp_dir.path().join("job")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_snapshot_file_write_failure() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("jobs.xml");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), b"x").unwrap();

        let file = SnapshotFile::new(&path);
        assert!(file.write(b"data").is_err());
        assert!(path.join("keep").exists());
    }

    #[test]
    fn test_dirty_state_threshold() {
        let mut state = DirtyState::default();
        assert!(!state.mark(3));
        assert!(!state.mark(3));
        assert!(state.mark(3));
        // Already queued.
        assert!(!state.mark(3));
        assert_eq!(state.dirty_ops(), 4);
        assert!(state.is_flush_queued());
    }

    #[test]
    fn test_dirty_state_retires_only_covered_ops() {
        let mut state = DirtyState::default();
        assert!(state.mark(1));
        let covered = state.begin_flush();
        assert_eq!(covered, 1);

        // Mutation while the write is in progress schedules another flush.
        assert!(state.mark(1));
        state.flush_succeeded(covered, 3, Duration::from_millis(2));

        assert_eq!(state.dirty_ops(), 1);
        let stats = state.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending_ops, 1);
        assert_eq!(stats.last_job_count, 3);
    }

    #[test]
    fn test_dirty_state_failure_keeps_count() {
        let mut state = DirtyState::default();
        assert!(state.mark(1));
        state.begin_flush();
        state.flush_failed(Duration::ZERO);

        assert_eq!(state.dirty_ops(), 1);
        assert_eq!(state.stats().failed, 1);
        assert!(state.mark(1));
    }

    #[test]
    fn test_dirty_state_post_failed_allows_retry() {
        let mut state = DirtyState::default();
        assert!(state.mark(1));
        state.post_failed();
        assert!(state.mark(1));
    }
}
