//! Job subcommand handlers.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use jobstore_config::StoreConfig;
use jobstore_registry::{
    BackoffPolicy, Clock, Collaborators, Constraint, ExtraValue, Extras, IoWorker, JobRecord, JobStore,
    LoadOutcome, PerUserRange, SnapshotCodec, SnapshotFile, StartupLoader, SystemClock,
};

use crate::cli::{AddArgs, BackoffArg, Commands, OutputFormat};

type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Handle a job subcommand.
pub(crate) async fn handle_command(command: Commands, config: &StoreConfig) -> CmdResult {
    match command {
        Commands::Check => check(config),
        Commands::List { uid, user, format } => Session::open(config)?.list(uid, user, format),
        Commands::Show { uid, job_id } => Session::open(config)?.show(uid, job_id),
        Commands::Add(args) => Session::open(config)?.add(args).await,
        Commands::Remove { uid, job_id } => Session::open(config)?.remove(uid, job_id).await,
        Commands::Clear { yes } => Session::open(config)?.clear(yes).await,
        Commands::Rewrite => Session::open(config)?.rewrite().await,
    }
}

/// Decode the jobs file without opening a store.
fn check(config: &StoreConfig) -> CmdResult {
    let file = SnapshotFile::new(config.jobs_file());
    let codec = SnapshotCodec::with_clock(Arc::new(SystemClock::new()));
    let report = StartupLoader::new(&file, &codec).load();

    println!("File:    {}", file.path().display());
    println!("Outcome: {}", describe_outcome(&report.outcome));
    println!("Loaded:  {}", report.jobs.len());
    println!("Skipped: {}", report.skipped.len());
    for skipped in &report.skipped {
        let uid = skipped.owner_uid.map(|u| u.to_string()).unwrap_or_else(|| "?".to_string());
        let id = skipped.job_id.map(|j| j.to_string()).unwrap_or_else(|| "?".to_string());
        println!("  - entry {} (uid {}, job {}): {}", skipped.index, uid, id, skipped.reason);
    }

    if report.outcome.is_discarded() {
        return Err(format!("jobs file {} was not usable", file.path().display()).into());
    }
    Ok(())
}

fn describe_outcome(outcome: &LoadOutcome) -> String {
    match outcome {
        LoadOutcome::Missing => "missing".to_string(),
        LoadOutcome::Empty => "empty".to_string(),
        LoadOutcome::Loaded => "loaded".to_string(),
        LoadOutcome::Unreadable(e) => format!("unreadable ({})", e),
        LoadOutcome::Corrupt(e) => format!("corrupt ({})", e),
        LoadOutcome::VersionMismatch { found } => {
            format!("version mismatch (found {})", found.as_deref().unwrap_or("none"))
        }
    }
}

/// An opened store plus the clock it runs on.
struct Session {
    store: JobStore,
    clock: Arc<SystemClock>,
}

impl Session {
    fn open(config: &StoreConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let clock = Arc::new(SystemClock::new());
        let worker = Arc::new(IoWorker::spawn("jobstore-io")?);
        let collaborators = Collaborators::new(worker)
            .with_clock(clock.clone())
            .with_partitioner(Arc::new(PerUserRange::new(config.per_user_range)));
        let store = JobStore::open_with(config, collaborators)?;
        Ok(Self { store, clock })
    }

    fn list(&self, uid: Option<u32>, user: Option<u32>, format: OutputFormat) -> CmdResult {
        let mut jobs = match user {
            Some(user) => self.store.jobs_for_user(user),
            None => self.store.snapshot(),
        };
        if let Some(uid) = uid {
            jobs.retain(|j| j.owner_uid() == uid);
        }
        jobs.sort_by_key(|j| j.identity());

        let views: Vec<JobView> = jobs.iter().map(|j| JobView::new(j, self.clock.as_ref())).collect();
        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&views)?);
            }
            OutputFormat::Table => {
                if views.is_empty() {
                    println!("No jobs found.");
                    return Ok(());
                }
                println!(
                    "{:<10} {:<8} {:<9} {:<28} {}",
                    "UID", "JOB", "KIND", "CONSTRAINTS", "SERVICE"
                );
                println!("{}", "-".repeat(90));
                for view in views {
                    let constraints = if view.constraints.is_empty() {
                        "-".to_string()
                    } else {
                        view.constraints.join(",")
                    };
                    println!(
                        "{:<10} {:<8} {:<9} {:<28} {}",
                        view.owner_uid, view.job_id, view.kind, constraints, view.service
                    );
                }
            }
        }
        Ok(())
    }

    fn show(&self, uid: u32, job_id: i32) -> CmdResult {
        let job = self
            .store
            .get(uid, job_id)
            .ok_or_else(|| format!("no job {} for uid {}", job_id, uid))?;
        let view = JobView::new(&job, self.clock.as_ref());

        println!("Job: {}", job);
        println!("{}", "=".repeat(50));
        println!("Owner uid:   {}", view.owner_uid);
        println!("Job id:      {}", view.job_id);
        println!("Service:     {}", view.service);
        println!("Kind:        {}", view.kind);
        if let Some(period) = view.period_ms {
            println!("Period:      {} ms", period);
        }
        println!("Earliest in: {}", format_offset(view.earliest_in_ms));
        println!("Latest in:   {}", format_offset(view.latest_in_ms));
        println!(
            "Constraints: {}",
            if view.constraints.is_empty() { "-".to_string() } else { view.constraints.join(", ") }
        );
        println!("Back-off:    {} from {} ms", view.backoff_policy, view.initial_backoff_ms);
        println!("Persisted:   {}", view.persisted);
        if !job.extras().is_empty() {
            println!("\nExtras:");
            for (key, value) in job.extras().iter() {
                println!("  - {}: {:?}", key, value);
            }
        }
        Ok(())
    }

    async fn add(&self, args: AddArgs) -> CmdResult {
        let job = build_job(&args, self.clock.elapsed_now())?;
        let summary = job.to_string();
        let replaced = self.store.add(job);
        self.finish().await?;

        println!("{} {}", if replaced { "Replaced" } else { "Added" }, summary);
        Ok(())
    }

    async fn remove(&self, uid: u32, job_id: i32) -> CmdResult {
        let removed = self
            .store
            .remove_identity(uid, job_id)
            .ok_or_else(|| format!("no job {} for uid {}", job_id, uid))?;
        self.finish().await?;

        println!("Removed {}", removed);
        Ok(())
    }

    async fn clear(&self, yes: bool) -> CmdResult {
        if !yes {
            return Err("refusing to clear all jobs without --yes".into());
        }
        let count = self.store.len();
        self.store.clear();
        self.finish().await?;

        println!("Cleared {} jobs", count);
        Ok(())
    }

    async fn rewrite(&self) -> CmdResult {
        if self.store.load_report().outcome.is_discarded() {
            warn!("Rewriting over a jobs file that could not be loaded");
        }
        self.store.request_flush();
        self.finish().await?;

        let stats = self.store.flush_stats();
        println!(
            "Wrote {} jobs to {}",
            stats.last_job_count,
            self.store.path().display()
        );
        Ok(())
    }

    /// Write out anything still below the batch threshold, wait for it and
    /// surface a failed write.
    async fn finish(&self) -> CmdResult {
        if self.store.flush_stats().pending_ops > 0 {
            self.store.request_flush();
        }
        self.store.sync().await;
        let stats = self.store.flush_stats();
        info!(
            "Flushes: {} completed, {} failed, {} ops pending",
            stats.completed, stats.failed, stats.pending_ops
        );
        if stats.failed > 0 || stats.pending_ops > 0 {
            return Err(format!("failed to write {}", self.store.path().display()).into());
        }
        Ok(())
    }
}

fn build_job(args: &AddArgs, now: Duration) -> Result<JobRecord, Box<dyn std::error::Error>> {
    let service = jobstore_registry::ServiceTarget::new(&args.package, &args.class);
    let mut builder = JobRecord::builder(args.job_id, args.uid, service).persisted(true);

    if let Some(period) = args.periodic_ms {
        builder = builder.periodic(Duration::from_millis(period));
    }
    if let Some(delay) = args.delay_ms {
        builder = builder.minimum_latency(Duration::from_millis(delay));
    }
    if let Some(deadline) = args.deadline_ms {
        builder = builder.override_deadline(Duration::from_millis(deadline));
    }

    let flags = [
        (args.unmetered, Constraint::Unmetered),
        (args.connectivity, Constraint::Connectivity),
        (args.idle, Constraint::Idle),
        (args.charging, Constraint::Charging),
    ];
    builder = builder.require_all(flags.into_iter().filter(|(set, _)| *set).map(|(_, c)| c));

    if let (Some(policy), Some(initial)) = (args.backoff, args.initial_backoff_ms) {
        let policy = match policy {
            BackoffArg::Linear => BackoffPolicy::Linear,
            BackoffArg::Exponential => BackoffPolicy::Exponential,
        };
        builder = builder.backoff(policy, Duration::from_millis(initial));
    }

    builder = builder.extras(parse_extras(&args.extras)?);
    Ok(builder.build(now)?)
}

/// Parse `key=value` pairs. Values are typed as int, long, double, or
/// boolean when they parse as one, otherwise string.
fn parse_extras(pairs: &[String]) -> Result<Extras, String> {
    let mut extras = Extras::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| format!("extra {:?} is not key=value", pair))?;
        if key.is_empty() {
            return Err(format!("extra {:?} has an empty key", pair));
        }
        extras.insert(key, infer_value(raw));
    }
    Ok(extras)
}

fn infer_value(raw: &str) -> ExtraValue {
    if let Ok(v) = raw.parse::<i32>() {
        ExtraValue::Int(v)
    } else if let Ok(v) = raw.parse::<i64>() {
        ExtraValue::Long(v)
    } else if let Ok(v) = raw.parse::<bool>() {
        ExtraValue::Bool(v)
    } else if let Ok(v) = raw.parse::<f64>() {
        ExtraValue::Double(v)
    } else {
        ExtraValue::String(raw.to_string())
    }
}

fn format_offset(offset_ms: Option<i64>) -> String {
    match offset_ms {
        Some(ms) if ms >= 0 => format!("{} ms", ms),
        Some(ms) => format!("{} ms ago", -ms),
        None => "-".to_string(),
    }
}

/// Serializable view of a job for `list --format json`.
#[derive(Debug, Serialize)]
struct JobView {
    owner_uid: u32,
    job_id: i32,
    service: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    period_ms: Option<u64>,
    /// Window ends relative to now.
    earliest_in_ms: Option<i64>,
    latest_in_ms: Option<i64>,
    constraints: Vec<&'static str>,
    backoff_policy: &'static str,
    initial_backoff_ms: u64,
    extras: Extras,
    persisted: bool,
}

impl JobView {
    fn new(job: &JobRecord, clock: &dyn Clock) -> Self {
        let now = millis(clock.elapsed_now());
        let timing = job.timing();
        Self {
            owner_uid: job.owner_uid(),
            job_id: job.job_id(),
            service: job.service().to_string(),
            kind: if timing.is_periodic() { "periodic" } else { "one-off" },
            period_ms: timing.period().map(|p| millis(p) as u64),
            earliest_in_ms: timing.earliest_run_elapsed().map(|e| millis(e) - now),
            latest_in_ms: timing.latest_run_elapsed().map(|l| millis(l) - now),
            constraints: job.constraints().iter().map(|c| c.attribute()).collect(),
            backoff_policy: match job.backoff().policy {
                BackoffPolicy::Linear => "linear",
                BackoffPolicy::Exponential => "exponential",
            },
            initial_backoff_ms: millis(job.backoff().initial_delay) as u64,
            extras: job.extras().clone(),
            persisted: job.is_persisted(),
        }
    }
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
