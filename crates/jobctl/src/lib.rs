//! `cosmo-jobctl`: operator tool for sustainability job records.
//!
//! ```bash
//! cosmo-jobctl create
//! cosmo-jobctl get 0190f3c2-...
//! cosmo-jobctl complete 0190f3c2-... '{"score": 42}'
//! cosmo-jobctl fail 0190f3c2-... "classification failed"
//! REDIS_URL=redis://cache:6379 cosmo-jobctl wait 0190f3c2-... --attempts 60
//! ```

use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{Value as JsonValue, json};

use cosmo_core::JobId;
use cosmo_infra::{HashStore, JobStatusStore};
use cosmo_infra::jobs::{BackoffStrategy, PollOutcome, PollPolicy, wait_for_completion};

/// Exit status for a job that does not exist (or has expired).
pub const EXIT_NOT_FOUND: u8 = 2;
/// Exit status for a job that finished with an error.
pub const EXIT_JOB_FAILED: u8 = 3;
/// Exit status for a job still pending after `wait`.
pub const EXIT_TIMED_OUT: u8 = 4;

#[derive(Debug, Parser)]
#[command(name = "cosmo-jobctl")]
#[command(about = "Inspect and repair sustainability job records")]
#[command(version)]
pub struct Cli {
    /// Redis connection URL (defaults to REDIS_URL, then redis://127.0.0.1:6379)
    #[arg(long, global = true)]
    pub redis_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Create a pending job and print it
    Create,
    /// Print a job
    Get { id: String },
    /// Mark a job done with a JSON result
    Complete { id: String, result: String },
    /// Mark a job failed with a message
    Fail { id: String, message: String },
    /// Poll a job until it finishes, expires or the attempts run out
    Wait {
        id: String,
        #[arg(long, default_value_t = 30)]
        attempts: u32,
        /// Initial delay between polls; doubles up to --max-delay-ms
        #[arg(long = "delay-ms", default_value_t = 250)]
        delay_ms: u64,
        #[arg(long = "max-delay-ms", default_value_t = 5000)]
        max_delay_ms: u64,
    },
}

/// What to print and how to exit.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub output: JsonValue,
    pub exit_code: u8,
}

impl Report {
    fn ok(output: JsonValue) -> Self {
        Self { output, exit_code: 0 }
    }

    fn with_code(output: JsonValue, exit_code: u8) -> Self {
        Self { output, exit_code }
    }
}

fn parse_id(raw: &str) -> anyhow::Result<JobId> {
    raw.parse().with_context(|| format!("invalid job id {raw:?}"))
}

/// Run one command against `store`.
pub async fn execute<S: HashStore>(
    store: &JobStatusStore<S>,
    command: Command,
) -> anyhow::Result<Report> {
    match command {
        Command::Create => {
            let job = store.create_job().await?;
            Ok(Report::ok(serde_json::to_value(&job)?))
        }
        Command::Get { id } => {
            let id = parse_id(&id)?;
            match store.get_job(&id).await? {
                Some(job) => Ok(Report::ok(serde_json::to_value(&job)?)),
                None => Ok(Report::with_code(
                    json!({"id": id, "error": "job not found or expired"}),
                    EXIT_NOT_FOUND,
                )),
            }
        }
        Command::Complete { id, result } => {
            let id = parse_id(&id)?;
            let result: JsonValue =
                serde_json::from_str(&result).context("result must be valid JSON")?;
            store.set_job_result(&id, &result).await?;
            Ok(Report::ok(json!({"id": id, "status": "done"})))
        }
        Command::Fail { id, message } => {
            let id = parse_id(&id)?;
            store.set_job_error(&id, &message).await?;
            Ok(Report::ok(json!({"id": id, "status": "error"})))
        }
        Command::Wait {
            id,
            attempts,
            delay_ms,
            max_delay_ms,
        } => {
            let id = parse_id(&id)?;
            let policy = PollPolicy {
                max_attempts: attempts,
                base_delay: Duration::from_millis(delay_ms),
                max_delay: Duration::from_millis(max_delay_ms.max(delay_ms)),
                strategy: BackoffStrategy::Exponential,
            };

            let report = match wait_for_completion(store, &id, &policy).await? {
                PollOutcome::Done(result) => {
                    Report::ok(json!({"id": id, "status": "done", "result": result}))
                }
                PollOutcome::Failed(error) => Report::with_code(
                    json!({"id": id, "status": "error", "error": error}),
                    EXIT_JOB_FAILED,
                ),
                PollOutcome::Expired => Report::with_code(
                    json!({"id": id, "error": "result expired"}),
                    EXIT_NOT_FOUND,
                ),
                PollOutcome::Unknown => Report::with_code(
                    json!({"id": id, "error": "job not found"}),
                    EXIT_NOT_FOUND,
                ),
                PollOutcome::TimedOut => Report::with_code(
                    json!({"id": id, "status": "pending"}),
                    EXIT_TIMED_OUT,
                ),
            };
            Ok(report)
        }
    }
}
