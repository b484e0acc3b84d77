//! One-shot startup load of the durable jobs file.

use tracing::{info, warn};

use crate::codec::{DocumentStatus, SkippedJob, SnapshotCodec};
use crate::error::CodecError;
use crate::job::JobRecord;
use crate::writer::SnapshotFile;

/// What the loader found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No jobs file yet.
    Missing,
    /// File present but empty.
    Empty,
    /// Document accepted.
    Loaded,
    /// File could not be read.
    Unreadable(String),
    /// File could not be parsed.
    Corrupt(CodecError),
    /// File written by another format version; ignored.
    VersionMismatch { found: Option<String> },
}

impl LoadOutcome {
    /// Whether the file content was discarded.
    pub fn is_discarded(&self) -> bool {
        matches!(
            self,
            LoadOutcome::Unreadable(_) | LoadOutcome::Corrupt(_) | LoadOutcome::VersionMismatch { .. }
        )
    }
}

/// Result of the startup load.
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub jobs: Vec<JobRecord>,
    pub skipped: Vec<SkippedJob>,
    pub outcome: LoadOutcome,
}

impl LoadReport {
    fn without_jobs(outcome: LoadOutcome) -> Self {
        Self {
            jobs: Vec::new(),
            skipped: Vec::new(),
            outcome,
        }
    }
}

/// Reads and decodes the jobs file. Never fails; every problem ends up in the report.
pub struct StartupLoader<'a> {
    file: &'a SnapshotFile,
    codec: &'a SnapshotCodec,
}

impl<'a> StartupLoader<'a> {
    pub fn new(file: &'a SnapshotFile, codec: &'a SnapshotCodec) -> Self {
        Self { file, codec }
    }

    pub fn load(&self) -> LoadReport {
        let path = self.file.path();
        let bytes = match self.file.read() {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                info!("No jobs file at {:?}; starting empty", path);
                return LoadReport::without_jobs(LoadOutcome::Missing);
            }
            Err(e) => {
                warn!("Could not read jobs file {:?}: {}", path, e);
                return LoadReport::without_jobs(LoadOutcome::Unreadable(e.to_string()));
            }
        };

        let decoded = self.codec.decode(&bytes);
        let outcome = match (decoded.status, decoded.fatal) {
            (_, Some(e)) => {
                warn!("Jobs file {:?} is corrupt: {}", path, e);
                LoadOutcome::Corrupt(e)
            }
            (DocumentStatus::Corrupt, None) => {
                LoadOutcome::Corrupt(CodecError::Xml("unreadable document".to_string()))
            }
            (DocumentStatus::Empty, None) => LoadOutcome::Empty,
            (DocumentStatus::Loaded, None) => LoadOutcome::Loaded,
            (DocumentStatus::VersionMismatch { found }, None) => {
                warn!("Jobs file {:?} has unsupported version {:?}; ignoring it", path, found);
                LoadOutcome::VersionMismatch { found }
            }
        };

        info!(
            "{} jobs loaded, {} skipped from {:?}",
            decoded.jobs.len(),
            decoded.skipped.len(),
            path
        );

        LoadReport {
            jobs: decoded.jobs,
            skipped: decoded.skipped,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn codec() -> SnapshotCodec {
        SnapshotCodec::with_clock(Arc::new(SystemClock::new()))
    }

    fn file_with(temp_dir: &TempDir, content: Option<&[u8]>) -> SnapshotFile {
        let path = temp_dir.path().join("jobs.xml");
        if let Some(content) = content {
            std::fs::write(&path, content).unwrap();
        }
        SnapshotFile::new(path)
    }

    #[test]
    fn test_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = file_with(&temp_dir, None);
        let report = StartupLoader::new(&file, &codec()).load();
        assert_eq!(report.outcome, LoadOutcome::Missing);
        assert!(report.jobs.is_empty());
        assert!(!report.outcome.is_discarded());
    }

    #[test]
    fn test_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = file_with(&temp_dir, Some(b""));
        let report = StartupLoader::new(&file, &codec()).load();
        assert_eq!(report.outcome, LoadOutcome::Empty);
    }

    #[test]
    fn test_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = file_with(&temp_dir, Some(b"<job-info version=\"0\"><job"));
        let report = StartupLoader::new(&file, &codec()).load();
        assert!(matches!(report.outcome, LoadOutcome::Corrupt(_)));
        assert!(report.outcome.is_discarded());
        assert!(report.jobs.is_empty());
    }

    #[test]
    fn test_unreadable_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("jobs.xml");
        std::fs::create_dir(&path).unwrap();
        let file = SnapshotFile::new(path);
        let report = StartupLoader::new(&file, &codec()).load();
        assert!(matches!(report.outcome, LoadOutcome::Unreadable(_)));
    }

    #[test]
    fn test_version_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let file = file_with(&temp_dir, Some(br#"<job-info version="3"></job-info>"#));
        let report = StartupLoader::new(&file, &codec()).load();
        assert_eq!(
            report.outcome,
            LoadOutcome::VersionMismatch {
                found: Some("3".to_string())
            }
        );
    }

    #[test]
    fn test_loaded_with_skips() {
        let temp_dir = TempDir::new().unwrap();
        let content = br#"<job-info version="0">
            <job jobid="1" uid="100" package="p" class="c"><constraints charging="true"/><one-off/><extras/></job>
            <job jobid="2" package="p" class="c"><constraints charging="true"/><one-off/><extras/></job>
        </job-info>"#;
        let file = file_with(&temp_dir, Some(content));
        let report = StartupLoader::new(&file, &codec()).load();

        assert_eq!(report.outcome, LoadOutcome::Loaded);
        assert_eq!(report.jobs.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.jobs[0].is_persisted());
    }
}
