use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::writer::Writer;
use tracing::debug;

use super::{
    JOBS_FILE_VERSION, TAG_CONSTRAINTS, TAG_EXTRAS, TAG_JOB, TAG_ONE_OFF, TAG_PERIODIC, TAG_ROOT,
};
use crate::clock::ClockReading;
use crate::error::CodecError;
use crate::extras::ExtrasCodec;
use crate::job::{Constraint, JobRecord, Timing};

type XmlWriter = Writer<Vec<u8>>;

pub(super) fn encode_document(
    jobs: &[JobRecord],
    now: ClockReading,
    extras: &dyn ExtrasCodec,
) -> Result<Vec<u8>, CodecError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), Some("yes"))))
        .map_err(CodecError::xml)?;

    let version = JOBS_FILE_VERSION.to_string();
    let mut root = BytesStart::new(TAG_ROOT);
    root.push_attribute(("version", version.as_str()));
    writer.write_event(Event::Start(root)).map_err(CodecError::xml)?;

    for job in jobs {
        debug!("Saving {}", job);
        write_job(&mut writer, job, now, extras)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new(TAG_ROOT)))
        .map_err(CodecError::xml)?;
    Ok(writer.into_inner())
}

fn write_job(
    writer: &mut XmlWriter,
    job: &JobRecord,
    now: ClockReading,
    extras: &dyn ExtrasCodec,
) -> Result<(), CodecError> {
    let job_id = job.job_id().to_string();
    let uid = job.owner_uid().to_string();
    let mut tag = BytesStart::new(TAG_JOB);
    tag.push_attribute(("jobid", job_id.as_str()));
    tag.push_attribute(("package", job.service().package.as_str()));
    tag.push_attribute(("class", job.service().class.as_str()));
    tag.push_attribute(("uid", uid.as_str()));
    writer.write_event(Event::Start(tag)).map_err(CodecError::xml)?;

    write_constraints(writer, job)?;
    write_timing(writer, job, now)?;
    write_extras(writer, job, extras)?;

    writer
        .write_event(Event::End(BytesEnd::new(TAG_JOB)))
        .map_err(CodecError::xml)?;
    Ok(())
}

/// Only constraints the job has are written.
fn write_constraints(writer: &mut XmlWriter, job: &JobRecord) -> Result<(), CodecError> {
    let mut tag = BytesStart::new(TAG_CONSTRAINTS);
    for constraint in Constraint::ALL {
        if job.has_constraint(constraint) {
            tag.push_attribute((constraint.attribute(), "true"));
        }
    }
    writer.write_event(Event::Empty(tag)).map_err(CodecError::xml)
}

fn write_timing(writer: &mut XmlWriter, job: &JobRecord, now: ClockReading) -> Result<(), CodecError> {
    let timing = job.timing();
    let mut tag = match timing {
        Timing::Periodic { period, .. } => {
            let mut tag = BytesStart::new(TAG_PERIODIC);
            tag.push_attribute(("period", period.as_millis().to_string().as_str()));
            tag
        }
        Timing::OneOff { .. } => BytesStart::new(TAG_ONE_OFF),
    };

    if let Some(latest) = timing.latest_run_elapsed() {
        let deadline = now.to_wall_ms(latest).to_string();
        tag.push_attribute(("deadline", deadline.as_str()));
    }
    if let Some(earliest) = timing.earliest_run_elapsed() {
        let delay = now.to_wall_ms(earliest).to_string();
        tag.push_attribute(("delay", delay.as_str()));
    }

    let backoff = job.backoff();
    if !backoff.is_default() {
        let policy = backoff.policy.code().to_string();
        let initial = backoff.initial_delay.as_millis().to_string();
        tag.push_attribute(("backoff-policy", policy.as_str()));
        tag.push_attribute(("initial-backoff", initial.as_str()));
    }

    writer.write_event(Event::Empty(tag)).map_err(CodecError::xml)
}

fn write_extras(
    writer: &mut XmlWriter,
    job: &JobRecord,
    extras: &dyn ExtrasCodec,
) -> Result<(), CodecError> {
    let payload = extras.serialize(job.extras())?;
    let payload = std::str::from_utf8(&payload).map_err(|e| CodecError::Utf8(e.to_string()))?;

    writer
        .write_event(Event::Start(BytesStart::new(TAG_EXTRAS)))
        .map_err(CodecError::xml)?;
    if !payload.is_empty() {
        // Already XML; written verbatim.
        writer
            .write_event(Event::Text(BytesText::from_escaped(payload)))
            .map_err(CodecError::xml)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(TAG_EXTRAS)))
        .map_err(CodecError::xml)
}
