//! # jobstore Registry
//!
//! Persistent registry of scheduled-work descriptors.
//!
//! ## Features
//!
//! - Records unique per `(owner_uid, job_id)` behind one lock
//! - Write-behind XML snapshots with atomic file replacement
//! - Versioned snapshot format; bad entries are skipped, not fatal
//! - Run windows restored from wall-clock time, with periodic drift clamping

pub mod clock;
pub mod codec;
pub mod error;
pub mod executor;
pub mod extras;
pub mod job;
pub mod loader;
pub mod partition;
pub mod store;
pub mod writer;

pub use clock::{Clock, ClockReading, ManualClock, SystemClock};
pub use codec::{Decoded, DocumentStatus, JOBS_FILE_VERSION, SkippedJob, SnapshotCodec};
pub use error::{CodecError, JobBuildError, RecordError, RegistryError};
pub use executor::{BackgroundExecutor, IoJob, IoWorker, ManualExecutor};
pub use extras::{ExtraValue, Extras, ExtrasCodec, XmlExtrasCodec};
pub use job::{Backoff, BackoffPolicy, Constraint, JobBuilder, JobIdentity, JobRecord, ServiceTarget, Timing};
pub use loader::{LoadOutcome, LoadReport, StartupLoader};
pub use partition::{PerUserRange, UidPartitioner};
pub use store::{Collaborators, JobStore};
pub use writer::{FlushStats, SnapshotFile};
