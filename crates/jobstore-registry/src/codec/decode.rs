use std::str::FromStr;
use std::time::Duration;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use tracing::{debug, warn};

use super::xml::{attribute, element_name};
use super::{
    Decoded, DocumentStatus, SkippedJob, JOBS_FILE_VERSION, TAG_CONSTRAINTS, TAG_EXTRAS, TAG_JOB,
    TAG_ONE_OFF, TAG_PERIODIC, TAG_ROOT,
};
use crate::clock::{Clock, ClockReading};
use crate::error::{CodecError, RecordError};
use crate::extras::{Extras, ExtrasCodec};
use crate::job::{BackoffPolicy, Constraint, JobRecord, ServiceTarget};

pub(super) fn decode_document(bytes: &[u8], clock: &dyn Clock, extras: &dyn ExtrasCodec) -> Decoded {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Decoded::empty();
    }

    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => return Decoded::corrupt(CodecError::Utf8(e.to_string())),
    };

    // One reading per document so every entry is restored against the same instant.
    let now = clock.read();

    match decode_root(text, now, extras) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!("Discarding unreadable job snapshot: {}", e);
            Decoded::corrupt(e)
        }
    }
}

fn decode_root(text: &str, now: ClockReading, extras: &dyn ExtrasCodec) -> Result<Decoded, CodecError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event().map_err(CodecError::xml)? {
            Event::Start(e) => {
                check_root(&e)?;
                if let Some(mismatch) = check_version(&e)? {
                    return Ok(mismatch);
                }
                return decode_jobs(&mut reader, now, extras);
            }
            Event::Empty(e) => {
                check_root(&e)?;
                if let Some(mismatch) = check_version(&e)? {
                    return Ok(mismatch);
                }
                return Ok(Decoded {
                    status: DocumentStatus::Loaded,
                    ..Decoded::default()
                });
            }
            Event::Eof => return Ok(Decoded::empty()),
            _ => {}
        }
    }
}

fn check_root(e: &BytesStart<'_>) -> Result<(), CodecError> {
    if e.name().as_ref() == TAG_ROOT.as_bytes() {
        Ok(())
    } else {
        Err(CodecError::UnexpectedRoot(element_name(e)))
    }
}

fn check_version(e: &BytesStart<'_>) -> Result<Option<Decoded>, CodecError> {
    let found = attribute(e, "version")?;
    let matches = found
        .as_deref()
        .and_then(|v| v.trim().parse::<i32>().ok())
        .is_some_and(|v| v == JOBS_FILE_VERSION);

    if matches {
        Ok(None)
    } else {
        warn!(
            "Job snapshot version {:?} does not match {}; ignoring file",
            found, JOBS_FILE_VERSION
        );
        Ok(Some(Decoded::version_mismatch(found)))
    }
}

fn decode_jobs(
    reader: &mut Reader<&[u8]>,
    now: ClockReading,
    extras: &dyn ExtrasCodec,
) -> Result<Decoded, CodecError> {
    let mut decoded = Decoded {
        status: DocumentStatus::Loaded,
        ..Decoded::default()
    };
    // Document position of each entry in `decoded.jobs`.
    let mut origins = Vec::new();
    let mut index = 0;

    loop {
        match reader.read_event().map_err(CodecError::xml)? {
            Event::Start(e) if e.name().as_ref() == TAG_JOB.as_bytes() => {
                let body = reader.read_text(e.name()).map_err(CodecError::xml)?;
                let result = parse_job(&e, &body, now, extras);
                record_entry(&mut decoded, &mut origins, index, &e, result);
                index += 1;
            }
            Event::Empty(e) if e.name().as_ref() == TAG_JOB.as_bytes() => {
                let result = Err(RecordError::MissingElement(TAG_CONSTRAINTS));
                record_entry(&mut decoded, &mut origins, index, &e, result);
                index += 1;
            }
            Event::Start(e) => {
                debug!("Ignoring <{}> in job snapshot", element_name(&e));
                reader.read_to_end(e.name()).map_err(CodecError::xml)?;
            }
            Event::End(e) if e.name().as_ref() == TAG_ROOT.as_bytes() => return Ok(decoded),
            Event::Eof => return Err(CodecError::Truncated),
            _ => {}
        }
    }
}

/// Identities are unique: a later entry replaces an earlier one, which is
/// reported as skipped.
fn record_entry(
    decoded: &mut Decoded,
    origins: &mut Vec<usize>,
    index: usize,
    start: &BytesStart<'_>,
    result: Result<JobRecord, RecordError>,
) {
    match result {
        Ok(job) => {
            debug!("Restored {}", job);
            let identity = job.identity();
            match decoded.jobs.iter().position(|j| j.identity() == identity) {
                Some(slot) => {
                    let earlier = std::mem::replace(&mut origins[slot], index);
                    decoded.jobs[slot] = job;
                    warn!(
                        "Job entry {} duplicates entry {} (uid {}, id {}); keeping the later one",
                        index, earlier, identity.owner_uid, identity.job_id
                    );
                    decoded.skipped.push(SkippedJob {
                        index: earlier,
                        job_id: Some(identity.job_id),
                        owner_uid: Some(identity.owner_uid),
                        reason: RecordError::DuplicateIdentity {
                            owner_uid: identity.owner_uid,
                            job_id: identity.job_id,
                        },
                    });
                }
                None => {
                    decoded.jobs.push(job);
                    origins.push(index);
                }
            }
        }
        Err(reason) => {
            let job_id = lenient_number(start, "jobid");
            let owner_uid = lenient_number(start, "uid");
            warn!("Skipping job entry {} (uid {:?}, id {:?}): {}", index, owner_uid, job_id, reason);
            decoded.skipped.push(SkippedJob {
                index,
                job_id,
                owner_uid,
                reason,
            });
        }
    }
}

fn parse_job(
    start: &BytesStart<'_>,
    body: &str,
    now: ClockReading,
    extras_codec: &dyn ExtrasCodec,
) -> Result<JobRecord, RecordError> {
    let job_id: i32 = required_number(start, "jobid")?;
    let owner_uid: u32 = required_number(start, "uid")?;
    let package = required(start, "package")?;
    let class = required(start, "class")?;

    let mut body_reader = Reader::from_str(body);
    body_reader.config_mut().trim_text(true);

    let constraints_tag = next_element(&mut body_reader)?.ok_or(RecordError::MissingElement(TAG_CONSTRAINTS))?;
    if constraints_tag.name().as_ref() != TAG_CONSTRAINTS.as_bytes() {
        return Err(RecordError::MissingElement(TAG_CONSTRAINTS));
    }
    let mut constraints = Vec::new();
    for constraint in Constraint::ALL {
        if optional(&constraints_tag, constraint.attribute())?.as_deref() == Some("true") {
            constraints.push(constraint);
        }
    }

    let timing_tag = next_element(&mut body_reader)?.ok_or(RecordError::MissingElement("timing"))?;
    let timing = parse_timing(&timing_tag, now)?;

    let extras_tag = next_element_raw(&mut body_reader)?.ok_or(RecordError::MissingElement(TAG_EXTRAS))?;
    let extras = match extras_tag {
        (tag, _) if tag.name().as_ref() != TAG_EXTRAS.as_bytes() => {
            return Err(RecordError::MissingElement(TAG_EXTRAS));
        }
        (_, Some(payload)) => extras_codec
            .deserialize(payload.as_bytes())
            .map_err(|e| RecordError::Extras(e.to_string()))?,
        (_, None) => Extras::new(),
    };

    let mut builder = JobRecord::builder(job_id, owner_uid, ServiceTarget::new(package, class))
        .require_all(constraints)
        .extras(extras)
        .persisted(true);
    if let Some(period) = timing.period {
        builder = builder.periodic(period);
    }
    if let Some(backoff) = timing.backoff {
        builder = builder.backoff(backoff.0, backoff.1);
    }

    Ok(builder.build_with_window(timing.earliest, timing.latest)?)
}

struct ParsedTiming {
    period: Option<Duration>,
    earliest: Option<Duration>,
    latest: Option<Duration>,
    backoff: Option<(BackoffPolicy, Duration)>,
}

fn parse_timing(tag: &BytesStart<'_>, now: ClockReading) -> Result<ParsedTiming, RecordError> {
    let periodic = match tag.name().as_ref() {
        name if name == TAG_PERIODIC.as_bytes() => true,
        name if name == TAG_ONE_OFF.as_bytes() => false,
        _ => return Err(RecordError::UnknownTiming(element_name(tag))),
    };

    let delay: Option<i64> = optional_number(tag, "delay")?;
    let deadline: Option<i64> = optional_number(tag, "deadline")?;
    let earliest = delay.map(|wall| now.to_elapsed(wall));
    let latest = deadline.map(|wall| now.to_elapsed(wall));

    let backoff = match optional_number::<u64>(tag, "initial-backoff")? {
        Some(initial) => {
            let code: i64 = required_number(tag, "backoff-policy")?;
            let policy = BackoffPolicy::from_code(code)
                .ok_or(RecordError::UnknownBackoffPolicy(code))?;
            Some((policy, Duration::from_millis(initial)))
        }
        None => None,
    };

    if !periodic {
        return Ok(ParsedTiming {
            period: None,
            earliest,
            latest,
            backoff,
        });
    }

    let period = Duration::from_millis(required_number(tag, "period")?);
    let (earliest, latest) = clamp_periodic(period, earliest, latest, now.elapsed);
    Ok(ParsedTiming {
        period: Some(period),
        earliest: Some(earliest),
        latest: Some(latest),
        backoff,
    })
}

/// A periodic window may not end more than two periods out. Anything further
/// comes from a wall clock that moved backwards, so the window restarts one
/// period from now.
fn clamp_periodic(
    period: Duration,
    earliest: Option<Duration>,
    latest: Option<Duration>,
    now: Duration,
) -> (Duration, Duration) {
    let limit = now.saturating_add(period.saturating_mul(2));
    match latest {
        Some(latest) if latest <= limit => (earliest.unwrap_or(now), latest),
        _ => {
            let clamped = (now.saturating_add(period), limit);
            warn!(
                "Periodic job window ends too far out ({:?} > {:?}); clamping to {:?}..{:?}",
                latest, limit, clamped.0, clamped.1
            );
            clamped
        }
    }
}

/// Next element in a job body, with any content skipped.
fn next_element(reader: &mut Reader<&[u8]>) -> Result<Option<BytesStart<'static>>, RecordError> {
    Ok(next_element_raw(reader)?.map(|(tag, _)| tag))
}

/// Next element in a job body together with its raw inner text.
fn next_element_raw(
    reader: &mut Reader<&[u8]>,
) -> Result<Option<(BytesStart<'static>, Option<String>)>, RecordError> {
    loop {
        match reader.read_event().map_err(body_error)? {
            Event::Start(e) => {
                let inner = reader.read_text(e.name()).map_err(body_error)?;
                let inner = (!inner.trim().is_empty()).then(|| inner.into_owned());
                return Ok(Some((e.into_owned(), inner)));
            }
            Event::Empty(e) => return Ok(Some((e.into_owned(), None))),
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

fn body_error(e: impl std::fmt::Display) -> RecordError {
    RecordError::Body(e.to_string())
}

fn optional(e: &BytesStart<'_>, name: &'static str) -> Result<Option<String>, RecordError> {
    attribute(e, name).map_err(body_error)
}

fn required(e: &BytesStart<'_>, name: &'static str) -> Result<String, RecordError> {
    optional(e, name)?.ok_or(RecordError::MissingAttribute(name))
}

fn optional_number<T: FromStr>(e: &BytesStart<'_>, name: &'static str) -> Result<Option<T>, RecordError> {
    let Some(raw) = optional(e, name)? else {
        return Ok(None);
    };
    match raw.trim().parse() {
        Ok(value) => Ok(Some(value)),
        Err(_) => Err(RecordError::InvalidNumber {
            attribute: name,
            value: raw,
        }),
    }
}

fn required_number<T: FromStr>(e: &BytesStart<'_>, name: &'static str) -> Result<T, RecordError> {
    optional_number(e, name)?.ok_or(RecordError::MissingAttribute(name))
}

fn lenient_number<T: FromStr>(e: &BytesStart<'_>, name: &str) -> Option<T> {
    attribute(e, name).ok().flatten().and_then(|v| v.trim().parse().ok())
}
