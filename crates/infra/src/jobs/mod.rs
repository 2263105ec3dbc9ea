//! Job status records for asynchronous sustainability analyses.
//!
//! ## Design
//!
//! - An API process creates a `pending` record and hands its id to the client
//! - A worker process later writes either a result (`done`) or a diagnostic
//!   (`error`) into the same record
//! - Clients poll the record by id until it is terminal or gone
//! - Every write (re)arms a retention TTL; records are never deleted explicitly
//!
//! ## Components
//!
//! - `JobStatusStore`: create/update/read records over any `HashStore`
//! - `codec`: mapping between `Job<R>` and the stored hash fields
//! - `poll`: caller-side polling with backoff and expiry detection

pub mod codec;
pub mod poll;
pub mod store;

pub use poll::{BackoffStrategy, PollOutcome, PollPolicy, wait_for_completion};
pub use store::{JobStatusStore, JobStoreError};
