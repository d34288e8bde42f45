//! Decoding of trigger envelopes into domain events.
//!
//! Two wire shapes are accepted, one JSON document per envelope:
//!
//! - object-created notifications: `{"Records": [{"eventTime", "s3": {"bucket": {"name"}, "object": {"key"}}}]}`
//!   yielding one [`ArrivalEvent`] per record;
//! - job state-change events: `{"detail-type": "Batch Job State Change", "time", "detail": {"jobId", "jobName", "status"}}`
//!   yielding one [`JobStatusEvent`].

use pipeline::{
    ArrivalError, ArrivalEvent, JobId, JobName, JobStatus, JobStatusEvent, ObjectLocation,
    Timestamp,
};
use serde::Deserialize;
use thiserror::Error;

/// `detail-type` of job state-change events.
pub const JOB_STATE_CHANGE: &str = "Batch Job State Change";

/// Scheme used for locations built from object-created records.
pub const OBJECT_SCHEME: &str = "s3";

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    Arrivals(Vec<ArrivalEvent>),
    Status(JobStatusEvent),
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Envelope is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported envelope: {0}")]
    Unsupported(String),

    #[error("Invalid arrival record: {0}")]
    Arrival(#[from] ArrivalError),

    #[error("Invalid timestamp '{0}'")]
    Timestamp(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEnvelope {
    ObjectCreated {
        #[serde(rename = "Records")]
        records: Vec<RawRecord>,
    },
    StateChange {
        #[serde(rename = "detail-type")]
        detail_type: String,
        time: Option<String>,
        detail: RawDetail,
    },
}

#[derive(Deserialize)]
struct RawRecord {
    #[serde(rename = "eventTime")]
    event_time: Option<String>,
    s3: RawS3,
}

#[derive(Deserialize)]
struct RawS3 {
    bucket: RawBucket,
    object: RawObject,
}

#[derive(Deserialize)]
struct RawBucket {
    name: String,
}

#[derive(Deserialize)]
struct RawObject {
    key: String,
}

#[derive(Deserialize)]
struct RawDetail {
    #[serde(rename = "jobId")]
    job_id: String,
    #[serde(rename = "jobName")]
    job_name: Option<String>,
    status: String,
}

fn timestamp(value: Option<&str>) -> Result<Timestamp, EnvelopeError> {
    match value {
        Some(v) => Timestamp::parse_rfc3339(v).ok_or_else(|| EnvelopeError::Timestamp(v.into())),
        None => Ok(Timestamp::now()),
    }
}

/// Decodes one JSON envelope.
///
/// A record without a timestamp is stamped with the time of decoding, which
/// makes it unrecognisable to the deduplication window if redelivered.
pub fn decode(input: &str) -> Result<Envelope, EnvelopeError> {
    match serde_json::from_str::<RawEnvelope>(input)? {
        RawEnvelope::ObjectCreated { records } => {
            let mut arrivals = Vec::with_capacity(records.len());
            for record in records {
                let source = ObjectLocation::new(
                    OBJECT_SCHEME,
                    record.s3.bucket.name.as_str(),
                    record.s3.object.key.as_str(),
                )
                .ok_or_else(|| ArrivalError::UnresolvableSource {
                    location: format!(
                        "{OBJECT_SCHEME}://{}/{}",
                        record.s3.bucket.name, record.s3.object.key
                    ),
                })?;
                let at = timestamp(record.event_time.as_deref())?;
                arrivals.push(ArrivalEvent::for_object(source, at)?);
            }
            Ok(Envelope::Arrivals(arrivals))
        }
        RawEnvelope::StateChange {
            detail_type,
            time,
            detail,
        } => {
            if detail_type != JOB_STATE_CHANGE {
                return Err(EnvelopeError::Unsupported(detail_type));
            }
            let job_id = JobId::new(detail.job_id)
                .ok_or_else(|| EnvelopeError::Unsupported("empty jobId".into()))?;
            let mut event = JobStatusEvent::new(
                job_id,
                JobStatus::parse(&detail.status),
                timestamp(time.as_deref())?,
            );
            if let Some(name) = detail.job_name.and_then(JobName::new) {
                event = event.with_name(name);
            }
            Ok(Envelope::Status(event))
        }
    }
}
