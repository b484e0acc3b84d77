//! Job record definition and builder.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use crate::error::JobBuildError;
use crate::extras::Extras;

/// Initial back-off applied when a job does not choose one.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(30_000);

/// Conditions a job waits for before it may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Constraint {
    /// Requires an unmetered network.
    Unmetered,
    /// Requires any network.
    Connectivity,
    /// Requires the device to be idle.
    Idle,
    /// Requires external power.
    Charging,
}

impl Constraint {
    /// All constraints, in on-disk attribute order.
    pub const ALL: [Constraint; 4] = [
        Constraint::Unmetered,
        Constraint::Connectivity,
        Constraint::Idle,
        Constraint::Charging,
    ];

    /// Attribute name used in the snapshot file.
    pub fn attribute(self) -> &'static str {
        match self {
            Constraint::Unmetered => "unmetered",
            Constraint::Connectivity => "connectivity",
            Constraint::Idle => "idle",
            Constraint::Charging => "charging",
        }
    }
}

/// How the retry delay grows after a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffPolicy {
    /// `initial * attempts`.
    Linear,
    /// `initial * 2^(attempts - 1)`.
    #[default]
    Exponential,
}

impl BackoffPolicy {
    /// Numeric code stored on disk.
    pub fn code(self) -> i64 {
        match self {
            BackoffPolicy::Linear => 0,
            BackoffPolicy::Exponential => 1,
        }
    }

    /// Inverse of [`code`](Self::code).
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(BackoffPolicy::Linear),
            1 => Some(BackoffPolicy::Exponential),
            _ => None,
        }
    }
}

/// Back-off criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial_delay: Duration,
    pub policy: BackoffPolicy,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy, initial_delay: Duration) -> Self {
        Self {
            initial_delay,
            policy,
        }
    }

    /// Whether these are the criteria a job gets when it sets none.
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_BACKOFF,
            policy: BackoffPolicy::default(),
        }
    }
}

/// The component that consumes a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceTarget {
    pub package: String,
    pub class: String,
}

impl ServiceTarget {
    pub fn new(package: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            class: class.into(),
        }
    }
}

impl fmt::Display for ServiceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.class)
    }
}

/// Unique key of a job inside the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobIdentity {
    pub owner_uid: u32,
    pub job_id: i32,
}

/// When a job may run. Window ends are points on the elapsed clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    /// Runs once inside an optional window.
    OneOff {
        earliest_run_elapsed: Option<Duration>,
        latest_run_elapsed: Option<Duration>,
    },
    /// Runs every `period`; the current window is always known.
    Periodic {
        period: Duration,
        earliest_run_elapsed: Duration,
        latest_run_elapsed: Duration,
    },
}

impl Timing {
    pub fn is_periodic(&self) -> bool {
        matches!(self, Timing::Periodic { .. })
    }

    pub fn period(&self) -> Option<Duration> {
        match self {
            Timing::Periodic { period, .. } => Some(*period),
            Timing::OneOff { .. } => None,
        }
    }

    pub fn earliest_run_elapsed(&self) -> Option<Duration> {
        match self {
            Timing::OneOff {
                earliest_run_elapsed,
                ..
            } => *earliest_run_elapsed,
            Timing::Periodic {
                earliest_run_elapsed,
                ..
            } => Some(*earliest_run_elapsed),
        }
    }

    pub fn latest_run_elapsed(&self) -> Option<Duration> {
        match self {
            Timing::OneOff {
                latest_run_elapsed, ..
            } => *latest_run_elapsed,
            Timing::Periodic {
                latest_run_elapsed, ..
            } => Some(*latest_run_elapsed),
        }
    }
}

/// A scheduled-work descriptor held by the registry.
///
/// Records are immutable once built; the registry replaces them wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    job_id: i32,
    owner_uid: u32,
    service: ServiceTarget,
    constraints: BTreeSet<Constraint>,
    timing: Timing,
    backoff: Backoff,
    extras: Extras,
    persisted: bool,
}

impl JobRecord {
    /// Start describing a job.
    pub fn builder(job_id: i32, owner_uid: u32, service: ServiceTarget) -> JobBuilder {
        JobBuilder {
            job_id,
            owner_uid,
            service,
            constraints: BTreeSet::new(),
            period: None,
            min_latency: None,
            deadline: None,
            backoff: None,
            extras: Extras::new(),
            persisted: false,
        }
    }

    pub fn job_id(&self) -> i32 {
        self.job_id
    }

    pub fn owner_uid(&self) -> u32 {
        self.owner_uid
    }

    pub fn identity(&self) -> JobIdentity {
        JobIdentity {
            owner_uid: self.owner_uid,
            job_id: self.job_id,
        }
    }

    pub fn service(&self) -> &ServiceTarget {
        &self.service
    }

    pub fn constraints(&self) -> &BTreeSet<Constraint> {
        &self.constraints
    }

    pub fn has_constraint(&self, constraint: Constraint) -> bool {
        self.constraints.contains(&constraint)
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn extras(&self) -> &Extras {
        &self.extras
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub(crate) fn matches(&self, owner_uid: u32, job_id: i32) -> bool {
        self.owner_uid == owner_uid && self.job_id == job_id
    }
}

impl fmt::Display for JobRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "job {}#{} {}{}",
            self.owner_uid,
            self.job_id,
            self.service,
            if self.timing.is_periodic() { " (periodic)" } else { "" }
        )
    }
}

/// Builder for [`JobRecord`]. All validation happens in `build*`.
#[derive(Debug, Clone)]
pub struct JobBuilder {
    job_id: i32,
    owner_uid: u32,
    service: ServiceTarget,
    constraints: BTreeSet<Constraint>,
    period: Option<Duration>,
    min_latency: Option<Duration>,
    deadline: Option<Duration>,
    backoff: Option<Backoff>,
    extras: Extras,
    persisted: bool,
}

impl JobBuilder {
    /// Run every `period`.
    pub fn periodic(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self
    }

    /// Do not run until `delay` has passed.
    pub fn minimum_latency(mut self, delay: Duration) -> Self {
        self.min_latency = Some(delay);
        self
    }

    /// Run no later than `deadline` from now, whatever the constraints.
    pub fn override_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn require(mut self, constraint: Constraint) -> Self {
        self.constraints.insert(constraint);
        self
    }

    pub fn require_all(mut self, constraints: impl IntoIterator<Item = Constraint>) -> Self {
        self.constraints.extend(constraints);
        self
    }

    pub fn backoff(mut self, policy: BackoffPolicy, initial_delay: Duration) -> Self {
        self.backoff = Some(Backoff::new(policy, initial_delay));
        self
    }

    pub fn extras(mut self, extras: Extras) -> Self {
        self.extras = extras;
        self
    }

    pub fn persisted(mut self, persisted: bool) -> Self {
        self.persisted = persisted;
        self
    }

    /// Build with the run window computed from relative delays at `now_elapsed`.
    pub fn build(self, now_elapsed: Duration) -> Result<JobRecord, JobBuildError> {
        let (earliest, latest) = match self.period {
            Some(period) => (Some(now_elapsed), Some(now_elapsed.saturating_add(period))),
            None => (
                self.min_latency.map(|d| now_elapsed.saturating_add(d)),
                self.deadline.map(|d| now_elapsed.saturating_add(d)),
            ),
        };
        self.finish(earliest, latest)
    }

    /// Build with an absolute run window, as restored from disk.
    pub fn build_with_window(
        self,
        earliest_run_elapsed: Option<Duration>,
        latest_run_elapsed: Option<Duration>,
    ) -> Result<JobRecord, JobBuildError> {
        if self.period.is_some() && (earliest_run_elapsed.is_none() || latest_run_elapsed.is_none()) {
            return Err(JobBuildError::MissingWindow);
        }
        self.finish(earliest_run_elapsed, latest_run_elapsed)
    }

    fn finish(
        self,
        earliest: Option<Duration>,
        latest: Option<Duration>,
    ) -> Result<JobRecord, JobBuildError> {
        self.validate(earliest.is_some() || latest.is_some())?;

        if let (Some(e), Some(l)) = (earliest, latest) {
            if e > l {
                return Err(JobBuildError::InvertedWindow {
                    earliest_ms: e.as_millis(),
                    latest_ms: l.as_millis(),
                });
            }
        }

        let timing = match (self.period, earliest, latest) {
            (Some(period), Some(earliest_run_elapsed), Some(latest_run_elapsed)) => Timing::Periodic {
                period,
                earliest_run_elapsed,
                latest_run_elapsed,
            },
            (Some(_), _, _) => return Err(JobBuildError::MissingWindow),
            (None, earliest_run_elapsed, latest_run_elapsed) => Timing::OneOff {
                earliest_run_elapsed,
                latest_run_elapsed,
            },
        };

        Ok(JobRecord {
            job_id: self.job_id,
            owner_uid: self.owner_uid,
            service: self.service,
            constraints: self.constraints,
            timing,
            backoff: self.backoff.unwrap_or_default(),
            extras: self.extras,
            persisted: self.persisted,
        })
    }

    fn validate(&self, has_window: bool) -> Result<(), JobBuildError> {
        match self.period {
            Some(period) => {
                if period.is_zero() {
                    return Err(JobBuildError::ZeroPeriod);
                }
                if self.min_latency.is_some() || self.deadline.is_some() {
                    return Err(JobBuildError::PeriodicWithWindow);
                }
            }
            None => {
                if self.constraints.is_empty() && !has_window {
                    return Err(JobBuildError::NoConstraints);
                }
            }
        }

        if self.backoff.is_some() && self.constraints.contains(&Constraint::Idle) {
            return Err(JobBuildError::BackoffWithIdle);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> ServiceTarget {
        ServiceTarget::new("com.example.app", "com.example.app.SyncService")
    }

    #[test]
    fn test_one_off_window_from_now() {
        let now = Duration::from_secs(100);
        let job = JobRecord::builder(1, 10_001, service())
            .minimum_latency(Duration::from_millis(5_000))
            .override_deadline(Duration::from_millis(60_000))
            .build(now)
            .unwrap();

        assert!(!job.timing().is_periodic());
        assert_eq!(job.timing().earliest_run_elapsed(), Some(now + Duration::from_millis(5_000)));
        assert_eq!(job.timing().latest_run_elapsed(), Some(now + Duration::from_millis(60_000)));
        assert!(job.backoff().is_default());
        assert!(!job.is_persisted());
    }

    #[test]
    fn test_periodic_window_is_one_period() {
        let now = Duration::from_secs(7);
        let period = Duration::from_secs(3_600);
        let job = JobRecord::builder(2, 10_001, service())
            .periodic(period)
            .build(now)
            .unwrap();

        assert_eq!(job.timing().period(), Some(period));
        assert_eq!(job.timing().earliest_run_elapsed(), Some(now));
        assert_eq!(job.timing().latest_run_elapsed(), Some(now + period));
    }

    #[test]
    fn test_zero_period_rejected() {
        let result = JobRecord::builder(1, 1, service())
            .periodic(Duration::ZERO)
            .build(Duration::ZERO);
        assert_eq!(result.unwrap_err(), JobBuildError::ZeroPeriod);
    }

    #[test]
    fn test_periodic_with_delay_rejected() {
        let result = JobRecord::builder(1, 1, service())
            .periodic(Duration::from_secs(60))
            .minimum_latency(Duration::from_secs(1))
            .build(Duration::ZERO);
        assert_eq!(result.unwrap_err(), JobBuildError::PeriodicWithWindow);
    }

    #[test]
    fn test_no_constraints_rejected() {
        let result = JobRecord::builder(1, 1, service()).build(Duration::ZERO);
        assert_eq!(result.unwrap_err(), JobBuildError::NoConstraints);

        let ok = JobRecord::builder(1, 1, service())
            .require(Constraint::Charging)
            .build(Duration::ZERO);
        assert!(ok.is_ok());
    }

    #[test]
    fn test_backoff_with_idle_rejected() {
        let result = JobRecord::builder(1, 1, service())
            .require(Constraint::Idle)
            .backoff(BackoffPolicy::Linear, Duration::from_secs(10))
            .build(Duration::ZERO);
        assert_eq!(result.unwrap_err(), JobBuildError::BackoffWithIdle);
    }

    #[test]
    fn test_inverted_window_rejected() {
        let result = JobRecord::builder(1, 1, service())
            .minimum_latency(Duration::from_secs(10))
            .override_deadline(Duration::from_secs(5))
            .build(Duration::ZERO);
        assert!(matches!(result, Err(JobBuildError::InvertedWindow { .. })));
    }

    #[test]
    fn test_restore_periodic_requires_window() {
        let result = JobRecord::builder(1, 1, service())
            .periodic(Duration::from_secs(60))
            .build_with_window(None, Some(Duration::from_secs(60)));
        assert_eq!(result.unwrap_err(), JobBuildError::MissingWindow);
    }

    #[test]
    fn test_backoff_policy_codes() {
        for policy in [BackoffPolicy::Linear, BackoffPolicy::Exponential] {
            assert_eq!(BackoffPolicy::from_code(policy.code()), Some(policy));
        }
        assert_eq!(BackoffPolicy::from_code(7), None);
        assert_eq!(BackoffPolicy::default(), BackoffPolicy::Exponential);
    }

    #[test]
    fn test_identity_and_display() {
        let job = JobRecord::builder(42, 10_050, service())
            .require(Constraint::Connectivity)
            .build(Duration::ZERO)
            .unwrap();
        assert_eq!(job.identity(), JobIdentity { owner_uid: 10_050, job_id: 42 });
        assert!(job.matches(10_050, 42));
        assert!(!job.matches(42, 10_050));
        assert_eq!(job.to_string(), "job 10050#42 com.example.app/com.example.app.SyncService");
    }
}
