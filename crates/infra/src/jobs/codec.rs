//! Stored representation of a job record.
//!
//! A record is a hash of text fields:
//!
//! | field       | content                                  |
//! |-------------|------------------------------------------|
//! | `id`        | the job id                               |
//! | `status`    | `pending`, `done` or `error`             |
//! | `createdAt` | RFC 3339, millisecond precision, UTC     |
//! | `result`    | JSON text, only when `done`              |
//! | `error`     | plain text, only when `error`            |

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use cosmo_core::{Job, JobId, JobStatus, JobStatusKind};

use super::store::JobStoreError;
use crate::kv::Fields;

pub const FIELD_ID: &str = "id";
pub const FIELD_STATUS: &str = "status";
pub const FIELD_CREATED_AT: &str = "createdAt";
pub const FIELD_RESULT: &str = "result";
pub const FIELD_ERROR: &str = "error";

pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Fields written when a job is created.
pub fn encode_pending<R>(job: &Job<R>) -> Vec<(&'static str, String)> {
    vec![
        (FIELD_ID, job.id.to_string()),
        (FIELD_STATUS, JobStatusKind::Pending.as_str().to_string()),
        (FIELD_CREATED_AT, format_timestamp(&job.created_at)),
    ]
}

/// Encode a result payload as JSON text.
pub fn encode_result<R: Serialize>(result: &R) -> Result<String, JobStoreError> {
    serde_json::to_string(result).map_err(|e| JobStoreError::InvalidPayload(e.to_string()))
}

/// Rebuild a job from its stored fields.
pub fn decode<R: DeserializeOwned>(id: &JobId, fields: &Fields) -> Result<Job<R>, JobStoreError> {
    let corrupt = |reason: String| JobStoreError::CorruptRecord {
        id: id.clone(),
        reason,
    };
    let field = |name: &str| {
        fields
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| corrupt(format!("missing `{name}` field")))
    };

    if let Some(stored_id) = fields.get(FIELD_ID) {
        if stored_id != id.as_str() {
            return Err(corrupt(format!("stored id `{stored_id}` does not match key")));
        }
    }

    let kind: JobStatusKind = field(FIELD_STATUS)?
        .parse()
        .map_err(|e: cosmo_core::DomainError| corrupt(e.to_string()))?;

    let created_at = DateTime::parse_from_rfc3339(field(FIELD_CREATED_AT)?)
        .map_err(|e| corrupt(format!("invalid `{FIELD_CREATED_AT}`: {e}")))?
        .with_timezone(&Utc);

    let status = match kind {
        JobStatusKind::Pending => JobStatus::Pending,
        JobStatusKind::Done => {
            let result = serde_json::from_str(field(FIELD_RESULT)?)
                .map_err(|e| corrupt(format!("invalid `{FIELD_RESULT}` encoding: {e}")))?;
            JobStatus::Done { result }
        }
        JobStatusKind::Error => JobStatus::Error {
            error: field(FIELD_ERROR)?.to_string(),
        },
    };

    let stray = match kind {
        JobStatusKind::Pending => [FIELD_RESULT, FIELD_ERROR]
            .into_iter()
            .find(|f| fields.contains_key(*f)),
        JobStatusKind::Done => fields.contains_key(FIELD_ERROR).then_some(FIELD_ERROR),
        JobStatusKind::Error => fields.contains_key(FIELD_RESULT).then_some(FIELD_RESULT),
    };
    if let Some(stray) = stray {
        warn!(job_id = %id, status = %kind, field = stray, "ignoring stale field on job record");
    }

    Ok(Job {
        id: id.clone(),
        status,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value as JsonValue, json};

    fn id() -> JobId {
        "abc".parse().unwrap()
    }

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn pending_encoding_has_no_payload_fields() {
        let created_at = "2026-03-01T10:00:00.123Z".parse().unwrap();
        let job: Job = Job::pending(id(), created_at);
        let encoded = encode_pending(&job);

        assert_eq!(
            encoded,
            vec![
                ("id", "abc".to_string()),
                ("status", "pending".to_string()),
                ("createdAt", "2026-03-01T10:00:00.123Z".to_string()),
            ]
        );
    }

    #[test]
    fn decodes_done_record() {
        let job: Job = decode(
            &id(),
            &fields(&[
                ("id", "abc"),
                ("status", "done"),
                ("createdAt", "2026-03-01T10:00:00.123Z"),
                ("result", r#"{"score":42}"#),
            ]),
        )
        .unwrap();

        assert_eq!(job.result(), Some(&json!({"score": 42})));
        assert_eq!(format_timestamp(&job.created_at), "2026-03-01T10:00:00.123Z");
    }

    #[test]
    fn unparsable_result_is_corrupt() {
        let err = decode::<JsonValue>(
            &id(),
            &fields(&[
                ("status", "done"),
                ("createdAt", "2026-03-01T10:00:00Z"),
                ("result", "{not json"),
            ]),
        )
        .unwrap_err();

        assert!(matches!(err, JobStoreError::CorruptRecord { .. }));
    }

    #[test]
    fn missing_or_unknown_fields_are_corrupt() {
        let cases = [
            fields(&[("createdAt", "2026-03-01T10:00:00Z")]),
            fields(&[("status", "cancelled"), ("createdAt", "2026-03-01T10:00:00Z")]),
            fields(&[("status", "pending"), ("createdAt", "yesterday")]),
            fields(&[("status", "done"), ("createdAt", "2026-03-01T10:00:00Z")]),
            fields(&[("status", "error"), ("createdAt", "2026-03-01T10:00:00Z")]),
            fields(&[
                ("id", "other"),
                ("status", "pending"),
                ("createdAt", "2026-03-01T10:00:00Z"),
            ]),
        ];

        for case in cases {
            let result = decode::<JsonValue>(&id(), &case);
            assert!(
                matches!(result, Err(JobStoreError::CorruptRecord { .. })),
                "{case:?}"
            );
        }
    }

    #[test]
    fn typed_payload_mismatch_is_corrupt() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Report {
            score: u32,
        }

        let err = decode::<Report>(
            &id(),
            &fields(&[
                ("status", "done"),
                ("createdAt", "2026-03-01T10:00:00Z"),
                ("result", r#"{"score":"high"}"#),
            ]),
        )
        .unwrap_err();

        assert!(matches!(err, JobStoreError::CorruptRecord { .. }));
    }
}
