//! Job lifecycle records for asynchronous sustainability analyses.
//!
//! A job starts `pending` and moves exactly once to a terminal state: `done`
//! (carrying the computation's result) or `error` (carrying a diagnostic).
//! The payload lives inside the status variant, so a job can never hold a
//! result and an error at the same time.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::DomainError;
use crate::id::JobId;

/// Status tag without payload, as stored in the `status` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatusKind {
    Pending,
    Done,
    Error,
}

impl JobStatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatusKind::Pending => "pending",
            JobStatusKind::Done => "done",
            JobStatusKind::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatusKind::Done | JobStatusKind::Error)
    }
}

impl core::fmt::Display for JobStatusKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatusKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatusKind::Pending),
            "done" => Ok(JobStatusKind::Done),
            "error" => Ok(JobStatusKind::Error),
            other => Err(DomainError::validation(format!("unknown job status: {other}"))),
        }
    }
}

/// Job execution status together with its terminal payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus<R> {
    /// Enqueued; no terminal write yet
    Pending,
    /// Completed successfully
    Done { result: R },
    /// Failed with a human-readable diagnostic
    Error { error: String },
}

impl<R> JobStatus<R> {
    pub fn kind(&self) -> JobStatusKind {
        match self {
            JobStatus::Pending => JobStatusKind::Pending,
            JobStatus::Done { .. } => JobStatusKind::Done,
            JobStatus::Error { .. } => JobStatusKind::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }
}

/// A job status record.
///
/// Serializes to the flat shape clients poll for:
/// `{"id": .., "status": "done", "result": .., "createdAt": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job<R = JsonValue> {
    pub id: JobId,
    #[serde(flatten)]
    pub status: JobStatus<R>,
    pub created_at: DateTime<Utc>,
}

impl<R> Job<R> {
    /// Create a new pending job with a fresh id.
    pub fn new() -> Self {
        Self::pending(JobId::new(), Utc::now())
    }

    /// Create a pending job with explicit id and creation time.
    pub fn pending(id: JobId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            created_at,
        }
    }

    pub fn kind(&self) -> JobStatusKind {
        self.status.kind()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The result, if the job is `done`.
    pub fn result(&self) -> Option<&R> {
        match &self.status {
            JobStatus::Done { result } => Some(result),
            _ => None,
        }
    }

    /// The diagnostic, if the job is `error`.
    pub fn error(&self) -> Option<&str> {
        match &self.status {
            JobStatus::Error { error } => Some(error),
            _ => None,
        }
    }

    /// Move to `done`. Only legal from `pending`.
    pub fn complete(self, result: R) -> Result<Self, DomainError> {
        self.transition(JobStatus::Done { result })
    }

    /// Move to `error`. Only legal from `pending`.
    pub fn fail(self, error: impl Into<String>) -> Result<Self, DomainError> {
        self.transition(JobStatus::Error {
            error: error.into(),
        })
    }

    fn transition(mut self, next: JobStatus<R>) -> Result<Self, DomainError> {
        if self.is_terminal() {
            return Err(DomainError::validation(format!(
                "job {} is already {}",
                self.id,
                self.kind()
            )));
        }
        self.status = next;
        Ok(self)
    }
}

impl<R> Default for Job<R> {
    fn default() -> Self {
        Self::new()
    }
}
