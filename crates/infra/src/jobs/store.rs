//! Job status store over a shared hash store.

use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use chrono::{SubsecRound, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::{Span, debug, instrument};

use cosmo_core::{Job, JobId, JobStatusKind};

use super::codec;
use crate::config::{DEFAULT_KEY_PREFIX, DEFAULT_RETENTION, JobStoreConfig};
use crate::kv::{HashStore, KvError};

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    /// The shared store could not be reached.
    #[error("job store unavailable: {0}")]
    StoreUnavailable(String),
    /// The store was reached but refused the command (wrong key type,
    /// read-only replica, script failure). Retrying will not help.
    #[error("job store rejected command: {0}")]
    StoreRejected(String),
    /// No live record for this id (never created, or expired).
    #[error("job not found: {0}")]
    JobNotFound(JobId),
    /// A record exists but cannot be read back as a job.
    #[error("corrupt job record {id}: {reason}")]
    CorruptRecord { id: JobId, reason: String },
    /// The result payload could not be serialized.
    #[error("invalid job payload: {0}")]
    InvalidPayload(String),
}

impl JobStoreError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, JobStoreError::StoreUnavailable(_))
    }
}

impl From<KvError> for JobStoreError {
    fn from(e: KvError) -> Self {
        match e {
            KvError::Connection(msg) => JobStoreError::StoreUnavailable(msg),
            KvError::Command(msg) => JobStoreError::StoreRejected(msg),
        }
    }
}

/// Lifecycle records for asynchronous jobs, addressable by id.
///
/// Records live in a shared `HashStore`, so an API process and a worker
/// process can each hold their own `JobStatusStore` over the same backend.
/// `R` is the result payload; the store serializes it but never inspects it.
///
/// Every call is a single round trip with no internal retries. Terminal
/// writes overwrite each other (last write wins) but never create a record:
/// updating an unknown or expired id fails with `JobNotFound`.
pub struct JobStatusStore<S, R = JsonValue> {
    backend: S,
    retention: Duration,
    key_prefix: String,
    _payload: PhantomData<fn() -> R>,
}

impl<S, R> JobStatusStore<S, R>
where
    S: HashStore,
    R: Serialize + DeserializeOwned + Send + Sync,
{
    /// Create a store with the default 1 hour retention.
    pub fn new(backend: S) -> Self {
        Self {
            backend,
            retention: DEFAULT_RETENTION,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            _payload: PhantomData,
        }
    }

    pub fn from_config(backend: S, config: &JobStoreConfig) -> Self {
        Self::new(backend)
            .with_retention(config.retention)
            .with_key_prefix(config.key_prefix.clone())
    }

    /// Time a record survives after its most recent write.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    /// Give the backend handle back, e.g. to close it at shutdown.
    pub fn into_backend(self) -> S {
        self.backend
    }

    /// Storage key for a job id.
    pub fn key_for(&self, id: &JobId) -> String {
        format!("{}:{}", self.key_prefix, id)
    }

    /// Create and persist a new `pending` job.
    ///
    /// The job is only returned once its record has been written.
    #[instrument(skip(self), fields(job_id = tracing::field::Empty), err)]
    pub async fn create_job(&self) -> Result<Job<R>, JobStoreError> {
        let job = Job::pending(JobId::new(), Utc::now().trunc_subsecs(3));
        Span::current().record("job_id", tracing::field::display(&job.id));

        let encoded = codec::encode_pending(&job);
        let fields: Vec<(&str, &str)> = encoded.iter().map(|(f, v)| (*f, v.as_str())).collect();

        self.backend
            .replace(&self.key_for(&job.id), &fields, self.retention)
            .await?;

        debug!("job created");
        Ok(job)
    }

    /// Mark a job `done` with `result`.
    #[instrument(skip(self, result), fields(job_id = %id), err)]
    pub async fn set_job_result(&self, id: &JobId, result: &R) -> Result<(), JobStoreError> {
        let encoded = codec::encode_result(result)?;
        self.finish(
            id,
            &[
                (codec::FIELD_STATUS, JobStatusKind::Done.as_str()),
                (codec::FIELD_RESULT, encoded.as_str()),
            ],
            codec::FIELD_ERROR,
        )
        .await
    }

    /// Mark a job `error` with a diagnostic message.
    #[instrument(skip(self, message), fields(job_id = %id), err)]
    pub async fn set_job_error(&self, id: &JobId, message: &str) -> Result<(), JobStoreError> {
        self.finish(
            id,
            &[
                (codec::FIELD_STATUS, JobStatusKind::Error.as_str()),
                (codec::FIELD_ERROR, message),
            ],
            codec::FIELD_RESULT,
        )
        .await
    }

    async fn finish(
        &self,
        id: &JobId,
        set: &[(&str, &str)],
        clear: &str,
    ) -> Result<(), JobStoreError> {
        let updated = self
            .backend
            .update_existing(&self.key_for(id), set, &[clear], self.retention)
            .await?;

        if !updated {
            return Err(JobStoreError::JobNotFound(id.clone()));
        }

        debug!(status = set[0].1, "job finished");
        Ok(())
    }

    /// Read a job. `Ok(None)` means no live record (never created or expired).
    #[instrument(skip(self), fields(job_id = %id), err)]
    pub async fn get_job(&self, id: &JobId) -> Result<Option<Job<R>>, JobStoreError> {
        match self.backend.read_all(&self.key_for(id)).await? {
            Some(fields) => codec::decode(id, &fields).map(Some),
            None => Ok(None),
        }
    }
}

impl<S: Clone, R> Clone for JobStatusStore<S, R> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            retention: self.retention,
            key_prefix: self.key_prefix.clone(),
            _payload: PhantomData,
        }
    }
}

impl<S: fmt::Debug, R> fmt::Debug for JobStatusStore<S, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobStatusStore")
            .field("backend", &self.backend)
            .field("retention", &self.retention)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}
