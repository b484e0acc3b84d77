use super::*;
use crate::clock::ManualClock;
use crate::extras::Extras;
use crate::job::{BackoffPolicy, Constraint, ServiceTarget};
use chrono::{TimeZone, Utc};
use std::time::Duration;

const NOW_WALL_MS: i64 = 1_709_294_400_000;

fn clock() -> Arc<ManualClock> {
    let wall = Utc.timestamp_millis_opt(NOW_WALL_MS).unwrap();
    Arc::new(ManualClock::new(Duration::from_secs(1_000), wall))
}

fn codec(clock: &Arc<ManualClock>) -> SnapshotCodec {
    SnapshotCodec::with_clock(clock.clone())
}

fn service() -> ServiceTarget {
    ServiceTarget::new("com.example", "com.example.SyncService")
}

fn job_xml(attrs: &str) -> String {
    format!(
        r#"<job {attrs} package="com.example" class="com.example.SyncService">
            <constraints connectivity="true"/>
            <one-off/>
            <extras/>
        </job>"#
    )
}

fn document(version: &str, jobs: &[String]) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8" standalone="yes"?>
<job-info {version}>{}</job-info>"#,
        jobs.join("\n")
    )
}

#[test]
fn test_roundtrip_preserves_fields() {
    let clock = clock();
    let now = clock.elapsed_now();
    let one_off = JobRecord::builder(1, 10_001, service())
        .require_all([Constraint::Connectivity, Constraint::Charging])
        .minimum_latency(Duration::from_millis(5_000))
        .override_deadline(Duration::from_millis(90_000))
        .backoff(BackoffPolicy::Linear, Duration::from_millis(10_000))
        .extras(Extras::new().with("account", "a@example.com").with("retries", 3))
        .persisted(true)
        .build(now)
        .unwrap();
    let periodic = JobRecord::builder(2, 10_002, service())
        .periodic(Duration::from_secs(900))
        .require(Constraint::Idle)
        .persisted(true)
        .build(now)
        .unwrap();

    let codec = codec(&clock);
    let bytes = codec.encode(&[one_off.clone(), periodic.clone()]).unwrap();
    let decoded = codec.decode(&bytes);

    assert_eq!(decoded.status, DocumentStatus::Loaded);
    assert!(decoded.skipped.is_empty());
    assert!(decoded.fatal.is_none());
    assert_eq!(decoded.jobs, vec![one_off, periodic]);
}

#[test]
fn test_encode_layout() {
    let clock = clock();
    let job = JobRecord::builder(1, 10_001, service())
        .require(Constraint::Unmetered)
        .minimum_latency(Duration::from_millis(5_000))
        .build(clock.elapsed_now())
        .unwrap();

    let text = String::from_utf8(codec(&clock).encode(&[job]).unwrap()).unwrap();
    assert!(text.starts_with(r#"<?xml version="1.0" encoding="utf-8" standalone="yes"?>"#));
    assert!(text.contains(r#"<job-info version="0">"#));
    assert!(text.contains(r#"<job jobid="1" package="com.example" class="com.example.SyncService" uid="10001">"#));
    assert!(text.contains(r#"<constraints unmetered="true"/>"#));
    assert!(text.contains(&format!(r#"<one-off delay="{}"/>"#, NOW_WALL_MS + 5_000)));
    // Default back-off is not written.
    assert!(!text.contains("backoff-policy"));
}

#[test]
fn test_one_off_delay_restored_relative_to_now() {
    let clock = clock();
    let job = JobRecord::builder(1, 100, service())
        .minimum_latency(Duration::from_millis(5_000))
        .persisted(true)
        .build(clock.elapsed_now())
        .unwrap();
    let bytes = codec(&clock).encode(&[job]).unwrap();

    // Reboot: elapsed restarts, two seconds of wall time pass.
    clock.reboot(Duration::from_secs(3), Duration::from_secs(2));
    let decoded = codec(&clock).decode(&bytes);

    let restored = &decoded.jobs[0];
    assert_eq!(
        restored.timing().earliest_run_elapsed(),
        Some(Duration::from_secs(3) + Duration::from_millis(3_000))
    );
    assert!(restored.is_persisted());
}

#[test]
fn test_past_window_maps_to_now() {
    let clock = clock();
    let job = JobRecord::builder(1, 100, service())
        .override_deadline(Duration::from_millis(1_000))
        .build(clock.elapsed_now())
        .unwrap();
    let bytes = codec(&clock).encode(&[job]).unwrap();

    clock.advance(Duration::from_secs(60));
    let decoded = codec(&clock).decode(&bytes);
    assert_eq!(
        decoded.jobs[0].timing().latest_run_elapsed(),
        Some(clock.elapsed_now())
    );
}

#[test]
fn test_version_mismatch_yields_nothing() {
    let clock = clock();
    let jobs = vec![job_xml(r#"jobid="1" uid="100""#)];

    for version in [r#"version="1""#, r#"version="x""#, ""] {
        let decoded = codec(&clock).decode(document(version, &jobs).as_bytes());
        assert!(decoded.jobs.is_empty());
        assert!(decoded.fatal.is_none());
        assert!(matches!(decoded.status, DocumentStatus::VersionMismatch { .. }));
    }

    let decoded = codec(&clock).decode(document(r#"version="7""#, &jobs).as_bytes());
    assert_eq!(
        decoded.status,
        DocumentStatus::VersionMismatch {
            found: Some("7".to_string())
        }
    );
}

#[test]
fn test_missing_uid_skips_only_that_entry() {
    let clock = clock();
    let jobs = vec![
        job_xml(r#"jobid="1" uid="100""#),
        job_xml(r#"jobid="2""#),
        job_xml(r#"jobid="3" uid="100""#),
    ];
    let decoded = codec(&clock).decode(document(r#"version="0""#, &jobs).as_bytes());

    assert_eq!(decoded.status, DocumentStatus::Loaded);
    assert_eq!(decoded.jobs.len(), 2);
    assert_eq!(decoded.jobs[0].job_id(), 1);
    assert_eq!(decoded.jobs[1].job_id(), 3);
    assert_eq!(
        decoded.skipped,
        vec![SkippedJob {
            index: 1,
            job_id: Some(2),
            owner_uid: None,
            reason: RecordError::MissingAttribute("uid"),
        }]
    );
}

#[test]
fn test_duplicate_identity_keeps_later_entry() {
    let clock = clock();
    let jobs = vec![
        job_xml(r#"jobid="1" uid="100""#),
        job_xml(r#"jobid="2" uid="100""#),
        r#"<job jobid="1" uid="100" package="p" class="c"><constraints charging="true"/><one-off/><extras/></job>"#.to_string(),
    ];
    let decoded = codec(&clock).decode(document(r#"version="0""#, &jobs).as_bytes());

    assert_eq!(decoded.status, DocumentStatus::Loaded);
    assert_eq!(decoded.jobs.len(), 2);
    assert_eq!(decoded.jobs[0].job_id(), 1);
    assert!(decoded.jobs[0].constraints().contains(&Constraint::Charging));
    assert_eq!(decoded.jobs[1].job_id(), 2);
    assert_eq!(
        decoded.skipped,
        vec![SkippedJob {
            index: 0,
            job_id: Some(1),
            owner_uid: Some(100),
            reason: RecordError::DuplicateIdentity {
                owner_uid: 100,
                job_id: 1,
            },
        }]
    );
}

#[test]
fn test_malformed_entries_are_classified() {
    let clock = clock();
    let entries = vec![
        r#"<job jobid="a" uid="1" package="p" class="c"><constraints/><one-off/><extras/></job>"#.to_string(),
        r#"<job jobid="1" uid="1" package="p" class="c"><one-off/><extras/></job>"#.to_string(),
        r#"<job jobid="1" uid="1" package="p" class="c"><constraints idle="true"/><sometimes/><extras/></job>"#.to_string(),
        r#"<job jobid="1" uid="1" package="p" class="c"><constraints charging="true"/><one-off/></job>"#.to_string(),
        r#"<job jobid="1" uid="1" package="p" class="c"><constraints charging="true"/><one-off initial-backoff="10" backoff-policy="9"/><extras/></job>"#.to_string(),
        r#"<job jobid="1" uid="1" package="p" class="c"><constraints/><one-off/><extras/></job>"#.to_string(),
        r#"<job jobid="1" uid="1" package="p" class="c"><constraints charging="true"/><periodic period="soon"/><extras/></job>"#.to_string(),
        r#"<job jobid="1" uid="1" package="p" class="c"><constraints charging="true"/><one-off/><extras><float name="x" value="1"/></extras></job>"#.to_string(),
    ];
    let decoded = codec(&clock).decode(document(r#"version="0""#, &entries).as_bytes());

    assert!(decoded.jobs.is_empty());
    let reasons: Vec<_> = decoded.skipped.iter().map(|s| s.reason.clone()).collect();
    assert!(matches!(reasons[0], RecordError::InvalidNumber { attribute: "jobid", .. }));
    assert_eq!(reasons[1], RecordError::MissingElement("constraints"));
    assert_eq!(reasons[2], RecordError::UnknownTiming("sometimes".to_string()));
    assert_eq!(reasons[3], RecordError::MissingElement("extras"));
    assert_eq!(reasons[4], RecordError::UnknownBackoffPolicy(9));
    assert!(matches!(reasons[5], RecordError::Invalid(_)));
    assert!(matches!(reasons[6], RecordError::InvalidNumber { attribute: "period", .. }));
    assert!(matches!(reasons[7], RecordError::Extras(_)));
}

#[test]
fn test_periodic_window_clamped() {
    let clock = clock();
    let now = clock.elapsed_now();
    let period_ms: i64 = 3_600_000;
    let entry = format!(
        r#"<job jobid="9" uid="100" package="p" class="c">
            <constraints/>
            <periodic period="{period_ms}" delay="{}" deadline="{}"/>
            <extras/>
        </job>"#,
        NOW_WALL_MS + 9 * period_ms,
        NOW_WALL_MS + 10 * period_ms
    );
    let decoded = codec(&clock).decode(document(r#"version="0""#, &[entry]).as_bytes());

    let period = Duration::from_millis(period_ms as u64);
    let timing = decoded.jobs[0].timing();
    assert_eq!(timing.earliest_run_elapsed(), Some(now + period));
    assert_eq!(timing.latest_run_elapsed(), Some(now + period * 2));
}

#[test]
fn test_periodic_without_deadline_clamped_and_without_delay_starts_now() {
    let clock = clock();
    let now = clock.elapsed_now();
    let entries = vec![
        r#"<job jobid="1" uid="100" package="p" class="c"><constraints/><periodic period="60000"/><extras/></job>"#.to_string(),
        format!(
            r#"<job jobid="2" uid="100" package="p" class="c"><constraints/><periodic period="60000" deadline="{}"/><extras/></job>"#,
            NOW_WALL_MS + 60_000
        ),
    ];
    let decoded = codec(&clock).decode(document(r#"version="0""#, &entries).as_bytes());

    let period = Duration::from_secs(60);
    assert_eq!(decoded.jobs[0].timing().earliest_run_elapsed(), Some(now + period));
    assert_eq!(decoded.jobs[0].timing().latest_run_elapsed(), Some(now + period * 2));
    assert_eq!(decoded.jobs[1].timing().earliest_run_elapsed(), Some(now));
    assert_eq!(decoded.jobs[1].timing().latest_run_elapsed(), Some(now + period));
}

#[test]
fn test_wall_clock_moved_back_clamps_periodic_window() {
    let clock = clock();
    let now = clock.elapsed_now();
    let period = Duration::from_secs(3_600);
    let job = JobRecord::builder(4, 100, service())
        .periodic(period)
        .persisted(true)
        .build(now)
        .unwrap();
    let codec = codec(&clock);
    let bytes = codec.encode(&[job]).unwrap();

    clock.set_wall(Utc.timestamp_millis_opt(NOW_WALL_MS - 10 * 3_600_000).unwrap());
    let decoded = codec.decode(&bytes);

    let timing = decoded.jobs[0].timing();
    assert_eq!(timing.earliest_run_elapsed(), Some(now + period));
    assert_eq!(timing.latest_run_elapsed(), Some(now + period * 2));
}

#[test]
fn test_empty_input() {
    let clock = clock();
    for input in [&b""[..], &b"  \n"[..]] {
        let decoded = codec(&clock).decode(input);
        assert_eq!(decoded.status, DocumentStatus::Empty);
        assert!(decoded.jobs.is_empty());
        assert!(decoded.fatal.is_none());
    }
}

#[test]
fn test_empty_root_loads_nothing() {
    let clock = clock();
    let decoded = codec(&clock).decode(br#"<job-info version="0"/>"#);
    assert_eq!(decoded.status, DocumentStatus::Loaded);
    assert!(decoded.jobs.is_empty());
}

#[test]
fn test_corrupt_documents() {
    let clock = clock();
    let good = job_xml(r#"jobid="1" uid="100""#);
    let truncated = format!(r#"<job-info version="0">{}"#, good);
    let cases: Vec<(Vec<u8>, fn(&CodecError) -> bool)> = vec![
        (b"<jobs version=\"0\"></jobs>".to_vec(), |e| matches!(e, CodecError::UnexpectedRoot(_))),
        (truncated.into_bytes(), |e| matches!(e, CodecError::Truncated | CodecError::Xml(_))),
        (b"<job-info version=\"0\"><job></job-info>".to_vec(), |e| matches!(e, CodecError::Xml(_))),
        (vec![0xff, 0xfe, 0x3c], |e| matches!(e, CodecError::Utf8(_))),
    ];

    for (input, expected) in cases {
        let decoded = codec(&clock).decode(&input);
        assert_eq!(decoded.status, DocumentStatus::Corrupt);
        assert!(decoded.jobs.is_empty());
        let fatal = decoded.fatal.expect("fatal error");
        assert!(expected(&fatal), "unexpected error {:?}", fatal);
    }
}
