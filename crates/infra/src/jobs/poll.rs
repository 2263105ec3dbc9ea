//! Caller-side polling of job records.
//!
//! The store itself never retries. Pollers use this module to wait for a job
//! to become terminal: `StoreUnavailable` is treated as transient and retried
//! with backoff, `StoreRejected` is not, and a record that disappears after
//! having been seen `pending` is reported as expired rather than as a generic
//! failure.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use cosmo_core::{Job, JobId, JobStatus};

use super::store::{JobStatusStore, JobStoreError};
use crate::kv::HashStore;

/// Backoff strategy between polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    /// Same delay every time
    Fixed,
    /// base * attempt
    Linear,
    /// base * 2^(attempt - 1)
    #[default]
    Exponential,
}

/// How long and how often to poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// Total number of reads (at least one is always made)
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Cap applied after the strategy
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl PollPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Delay after the given (1-indexed) attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let factor = 2_u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }
}

/// What a poller learned about a job.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<R> {
    Done(R),
    Failed(String),
    /// The record vanished after being seen `pending`: the retention window
    /// elapsed before the job finished. Surface as "result expired".
    Expired,
    /// No record was ever observed for this id.
    Unknown,
    /// Still `pending` when the attempt budget ran out.
    TimedOut,
}

impl<R> PollOutcome<R> {
    /// Classify one read. `None` means the job is still pending.
    pub fn from_read(read: Option<Job<R>>, seen_pending: bool) -> Option<Self> {
        match read {
            Some(job) => match job.status {
                JobStatus::Pending => None,
                JobStatus::Done { result } => Some(PollOutcome::Done(result)),
                JobStatus::Error { error } => Some(PollOutcome::Failed(error)),
            },
            None if seen_pending => Some(PollOutcome::Expired),
            None => Some(PollOutcome::Unknown),
        }
    }
}

/// Poll `id` until it is terminal, gone, or the attempt budget is spent.
///
/// Transient store failures consume attempts; if the last attempt still fails
/// the error is returned. `StoreRejected` and `CorruptRecord` are returned
/// immediately.
pub async fn wait_for_completion<S, R>(
    store: &JobStatusStore<S, R>,
    id: &JobId,
    policy: &PollPolicy,
) -> Result<PollOutcome<R>, JobStoreError>
where
    S: HashStore,
    R: Serialize + DeserializeOwned + Send + Sync,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut seen_pending = false;

    for attempt in 1..=max_attempts {
        match store.get_job(id).await {
            Ok(read) => {
                let pending = read.as_ref().is_some_and(|job| !job.is_terminal());
                if let Some(outcome) = PollOutcome::from_read(read, seen_pending) {
                    return Ok(outcome);
                }
                seen_pending |= pending;
                debug!(job_id = %id, attempt, "job still pending");
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                warn!(job_id = %id, attempt, error = %e, "job store unavailable; will retry");
            }
            Err(e) => return Err(e),
        }

        if attempt < max_attempts {
            tokio::time::sleep(policy.delay_after(attempt)).await;
        }
    }

    Ok(PollOutcome::TimedOut)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::{Value as JsonValue, json};

    use super::*;
    use crate::kv::{Fields, InMemoryHashStore, KvError};

    /// Fails the first `failures` reads, then delegates.
    struct FlakyReads {
        inner: InMemoryHashStore,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl HashStore for FlakyReads {
        async fn replace(
            &self,
            key: &str,
            fields: &[(&str, &str)],
            ttl: Duration,
        ) -> Result<(), KvError> {
            self.inner.replace(key, fields, ttl).await
        }

        async fn update_existing(
            &self,
            key: &str,
            set: &[(&str, &str)],
            remove: &[&str],
            ttl: Duration,
        ) -> Result<bool, KvError> {
            self.inner.update_existing(key, set, remove, ttl).await
        }

        async fn read_all(&self, key: &str) -> Result<Option<Fields>, KvError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(KvError::Connection("connection refused".to_string()));
            }
            self.inner.read_all(key).await
        }
    }

    /// A key holding the wrong Redis type: every read is refused.
    #[derive(Default)]
    struct WrongTypeReads {
        inner: InMemoryHashStore,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl HashStore for WrongTypeReads {
        async fn replace(
            &self,
            key: &str,
            fields: &[(&str, &str)],
            ttl: Duration,
        ) -> Result<(), KvError> {
            self.inner.replace(key, fields, ttl).await
        }

        async fn update_existing(
            &self,
            key: &str,
            set: &[(&str, &str)],
            remove: &[&str],
            ttl: Duration,
        ) -> Result<bool, KvError> {
            self.inner.update_existing(key, set, remove, ttl).await
        }

        async fn read_all(&self, _key: &str) -> Result<Option<Fields>, KvError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Err(KvError::Command(
                "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
            ))
        }
    }

    #[test]
    fn exponential_delays_double_and_cap() {
        let policy = PollPolicy::exponential(10, Duration::from_millis(100), Duration::from_millis(500));

        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(4), Duration::from_millis(500));
        assert_eq!(policy.delay_after(40), Duration::from_millis(500));
    }

    #[test]
    fn linear_and_fixed_delays() {
        let linear = PollPolicy {
            strategy: BackoffStrategy::Linear,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            max_attempts: 5,
        };
        assert_eq!(linear.delay_after(3), Duration::from_millis(300));

        let fixed = PollPolicy::fixed(3, Duration::from_millis(50));
        assert_eq!(fixed.delay_after(1), fixed.delay_after(3));
    }

    #[test]
    fn missing_record_is_expired_only_after_pending() {
        assert_eq!(PollOutcome::<JsonValue>::from_read(None, true), Some(PollOutcome::Expired));
        assert_eq!(PollOutcome::<JsonValue>::from_read(None, false), Some(PollOutcome::Unknown));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_worker_result() {
        let store: Arc<JobStatusStore<InMemoryHashStore>> =
            Arc::new(JobStatusStore::new(InMemoryHashStore::new()));
        let job = store.create_job().await.unwrap();

        let worker = {
            let store = store.clone();
            let id = job.id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(700)).await;
                store.set_job_result(&id, &json!({"score": 42})).await
            })
        };

        let outcome = wait_for_completion(&*store, &job.id, &PollPolicy::fixed(10, Duration::from_millis(200)))
            .await
            .unwrap();

        assert_eq!(outcome, PollOutcome::Done(json!({"score": 42})));
        worker.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reports_failure_message() {
        let store: JobStatusStore<InMemoryHashStore> = JobStatusStore::new(InMemoryHashStore::new());
        let job = store.create_job().await.unwrap();
        store.set_job_error(&job.id, "classification failed").await.unwrap();

        let outcome = wait_for_completion(&store, &job.id, &PollPolicy::default()).await.unwrap();
        assert_eq!(outcome, PollOutcome::Failed("classification failed".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn detects_expiry_while_pending() {
        let store: JobStatusStore<InMemoryHashStore> =
            JobStatusStore::new(InMemoryHashStore::new()).with_retention(Duration::from_secs(1));
        let job = store.create_job().await.unwrap();

        let outcome = wait_for_completion(&store, &job.id, &PollPolicy::fixed(10, Duration::from_millis(400)))
            .await
            .unwrap();

        assert_eq!(outcome, PollOutcome::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_id_is_not_expired() {
        let store: JobStatusStore<InMemoryHashStore> = JobStatusStore::new(InMemoryHashStore::new());
        let id: JobId = "does-not-exist".parse().unwrap();

        let outcome = wait_for_completion(&store, &id, &PollPolicy::default()).await.unwrap();
        assert_eq!(outcome, PollOutcome::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_while_pending() {
        let store: JobStatusStore<InMemoryHashStore> = JobStatusStore::new(InMemoryHashStore::new());
        let job = store.create_job().await.unwrap();

        let outcome = wait_for_completion(&store, &job.id, &PollPolicy::fixed(3, Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(outcome, PollOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_store_failures() {
        let backend = FlakyReads {
            inner: InMemoryHashStore::new(),
            failures: AtomicUsize::new(2),
        };
        let store: JobStatusStore<FlakyReads> = JobStatusStore::new(backend);
        let job = store.create_job().await.unwrap();
        store.set_job_result(&job.id, &json!("ok")).await.unwrap();

        let outcome = wait_for_completion(&store, &job.id, &PollPolicy::fixed(5, Duration::from_millis(50)))
            .await
            .unwrap();
        assert_eq!(outcome, PollOutcome::Done(json!("ok")));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_when_store_stays_down() {
        let backend = FlakyReads {
            inner: InMemoryHashStore::new(),
            failures: AtomicUsize::new(100),
        };
        let store: JobStatusStore<FlakyReads> = JobStatusStore::new(backend);
        let job = store.create_job().await.unwrap();

        let err = wait_for_completion(&store, &job.id, &PollPolicy::fixed(3, Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_reads_are_not_retried() {
        let store: JobStatusStore<WrongTypeReads> = JobStatusStore::new(WrongTypeReads::default());
        let job = store.create_job().await.unwrap();

        let err = wait_for_completion(&store, &job.id, &PollPolicy::fixed(5, Duration::from_millis(50)))
            .await
            .unwrap_err();

        assert!(matches!(err, JobStoreError::StoreRejected(ref msg) if msg.starts_with("WRONGTYPE")));
        assert!(!err.is_transient());
        assert_eq!(store.backend().reads.load(Ordering::SeqCst), 1);
    }
}
