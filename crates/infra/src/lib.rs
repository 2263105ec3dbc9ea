//! Infrastructure layer: key-value backends, job status persistence, config.

pub mod config;
pub mod jobs;
pub mod kv;

pub use config::{ConfigError, JobStoreConfig};
pub use jobs::{JobStatusStore, JobStoreError};
pub use kv::{HashStore, InMemoryHashStore, KvError};

#[cfg(feature = "redis")]
pub use kv::RedisHashStore;
