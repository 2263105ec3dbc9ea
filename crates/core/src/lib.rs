//! `cosmo-core`: domain building blocks for asynchronous sustainability jobs.
//!
//! This crate contains **pure domain** types (no infrastructure concerns). Storage
//! lives in `cosmo-infra`.

pub mod error;
pub mod id;
pub mod job;

pub use error::{DomainError, DomainResult};
pub use id::JobId;
pub use job::{Job, JobStatus, JobStatusKind};
