//! Snapshot codec: job records to and from the durable XML document.
//!
//! ```text
//! <job-info version="0">
//!   <job jobid=".." package=".." class=".." uid="..">
//!     <constraints connectivity="true" .../>
//!     <one-off deadline="wall-ms" delay="wall-ms" backoff-policy=".." initial-backoff=".."/>
//!     <extras>...</extras>
//!   </job>
//! </job-info>
//! ```
//!
//! Run windows are stored as wall-clock millis and converted back to the
//! elapsed clock on decode.

use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{CodecError, RecordError};
use crate::extras::{ExtrasCodec, XmlExtrasCodec};
use crate::job::JobRecord;

mod decode;
mod encode;
pub(crate) mod xml;

/// Version written to and required from `<job-info version="..">`.
pub const JOBS_FILE_VERSION: i32 = 0;

pub(crate) const TAG_ROOT: &str = "job-info";
pub(crate) const TAG_JOB: &str = "job";
pub(crate) const TAG_CONSTRAINTS: &str = "constraints";
pub(crate) const TAG_PERIODIC: &str = "periodic";
pub(crate) const TAG_ONE_OFF: &str = "one-off";
pub(crate) const TAG_EXTRAS: &str = "extras";

/// Encodes and decodes job snapshots.
#[derive(Clone)]
pub struct SnapshotCodec {
    clock: Arc<dyn Clock>,
    extras: Arc<dyn ExtrasCodec>,
}

impl SnapshotCodec {
    pub fn new(clock: Arc<dyn Clock>, extras: Arc<dyn ExtrasCodec>) -> Self {
        Self { clock, extras }
    }

    /// Codec using the XML extras format.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::new(clock, Arc::new(XmlExtrasCodec))
    }

    /// Serialize `jobs`, converting run windows to wall-clock time as of now.
    pub fn encode(&self, jobs: &[JobRecord]) -> Result<Vec<u8>, CodecError> {
        encode::encode_document(jobs, self.clock.read(), self.extras.as_ref())
    }

    /// Parse a snapshot. Never fails; problems are reported in the result.
    pub fn decode(&self, bytes: &[u8]) -> Decoded {
        decode::decode_document(bytes, self.clock.as_ref(), self.extras.as_ref())
    }
}

/// Overall state of a decoded document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DocumentStatus {
    /// Root element accepted; jobs (possibly none) were read.
    Loaded,
    /// No content at all.
    #[default]
    Empty,
    /// Version attribute missing or different; the whole document was ignored.
    VersionMismatch { found: Option<String> },
    /// The document could not be parsed; see [`Decoded::fatal`].
    Corrupt,
}

/// A `<job>` entry that was dropped during decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedJob {
    /// Position of the entry in the document, counting from zero.
    pub index: usize,
    pub job_id: Option<i32>,
    pub owner_uid: Option<u32>,
    pub reason: RecordError,
}

/// Result of [`SnapshotCodec::decode`].
#[derive(Debug, Default)]
pub struct Decoded {
    pub jobs: Vec<JobRecord>,
    pub skipped: Vec<SkippedJob>,
    pub status: DocumentStatus,
    pub fatal: Option<CodecError>,
}

impl Decoded {
    fn empty() -> Self {
        Self::default()
    }

    fn corrupt(error: CodecError) -> Self {
        Self {
            status: DocumentStatus::Corrupt,
            fatal: Some(error),
            ..Self::default()
        }
    }

    fn version_mismatch(found: Option<String>) -> Self {
        Self {
            status: DocumentStatus::VersionMismatch { found },
            ..Self::default()
        }
    }
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
