//! Registry errors.

use thiserror::Error;

/// Reasons a job record cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobBuildError {
    /// Periodic jobs need a non-zero period.
    #[error("Periodic job must have a period greater than zero")]
    ZeroPeriod,

    /// A periodic job cannot also carry a one-off delay or deadline.
    #[error("Periodic job cannot set a minimum latency or deadline")]
    PeriodicWithWindow,

    /// A one-off job without any constraint would run unconditionally forever.
    #[error("Job has no constraints, delay or deadline")]
    NoConstraints,

    /// Idle jobs are never backed off.
    #[error("Idle-mode job cannot specify a back-off policy")]
    BackoffWithIdle,

    /// Earliest run time is after the latest run time.
    #[error("Earliest run time {earliest_ms}ms is after latest run time {latest_ms}ms")]
    InvertedWindow { earliest_ms: u128, latest_ms: u128 },

    /// Restoring a periodic job requires both window ends.
    #[error("Periodic job restored without a complete run window")]
    MissingWindow,
}

/// Document-level codec failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Malformed XML.
    #[error("XML error: {0}")]
    Xml(String),

    /// Root element is not `<job-info>`.
    #[error("Unexpected root element <{0}>")]
    UnexpectedRoot(String),

    /// Document ended before `</job-info>`.
    #[error("Document truncated before closing tag")]
    Truncated,

    /// Text content is not UTF-8.
    #[error("Invalid UTF-8: {0}")]
    Utf8(String),

    /// The extras codec rejected a payload.
    #[error("Extras error: {0}")]
    Extras(String),
}

impl CodecError {
    pub(crate) fn xml(e: impl std::fmt::Display) -> Self {
        Self::Xml(e.to_string())
    }
}

/// Why a single `<job>` entry was skipped during decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// A required attribute is absent.
    #[error("Missing required attribute '{0}'")]
    MissingAttribute(&'static str),

    /// An attribute is present but not a valid number.
    #[error("Attribute '{attribute}' is not numeric: {value:?}")]
    InvalidNumber {
        attribute: &'static str,
        value: String,
    },

    /// A required child element is absent.
    #[error("Missing <{0}> element")]
    MissingElement(&'static str),

    /// The timing element is neither `<periodic>` nor `<one-off>`.
    #[error("Unknown timing element <{0}>")]
    UnknownTiming(String),

    /// Back-off policy value has no matching policy.
    #[error("Unknown back-off policy {0}")]
    UnknownBackoffPolicy(i64),

    /// The job body is not well-formed.
    #[error("Malformed job body: {0}")]
    Body(String),

    /// Extras payload could not be decoded.
    #[error("Extras error: {0}")]
    Extras(String),

    /// A later entry in the same document carries this identity.
    #[error("Superseded by a later entry for uid {owner_uid}, id {job_id}")]
    DuplicateIdentity { owner_uid: u32, job_id: i32 },

    /// Decoded fields do not form a valid job.
    #[error("Invalid job: {0}")]
    Invalid(#[from] JobBuildError),
}

/// Registry error types.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot encoding failed.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Job record failed validation.
    #[error("Invalid job: {0}")]
    InvalidJob(#[from] JobBuildError),

    /// The background executor no longer accepts work.
    #[error("Background executor is closed")]
    ExecutorClosed,

    /// No tokio runtime is available to host the background executor.
    #[error("No tokio runtime available")]
    NoRuntime,
}
