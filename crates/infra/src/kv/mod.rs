//! Shared key-value backends holding hashes of text fields with expiration.
//!
//! The job status store only needs three primitives from its backend, each of
//! which must be a single atomic operation against one key:
//!
//! - replace every field of a key and set its TTL
//! - update some fields of an *existing* key, drop others, refresh its TTL
//! - read every field of a key
//!
//! `InMemoryHashStore` serves tests and local development; `RedisHashStore`
//! (feature `redis`) is the shared store used across API and worker processes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use in_memory::InMemoryHashStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisHashStore;

/// Field name to text value, as read back from a hash.
pub type Fields = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KvError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("command error: {0}")]
    Command(String),
}

#[async_trait]
pub trait HashStore: Send + Sync {
    /// Replace all fields stored under `key` and (re)set its time-to-live.
    async fn replace(
        &self,
        key: &str,
        fields: &[(&str, &str)],
        ttl: Duration,
    ) -> Result<(), KvError>;

    /// Set `set`, delete `remove` and refresh the TTL, only if `key` is live.
    ///
    /// Returns `false` (and writes nothing) when the key does not exist.
    async fn update_existing(
        &self,
        key: &str,
        set: &[(&str, &str)],
        remove: &[&str],
        ttl: Duration,
    ) -> Result<bool, KvError>;

    /// Read every field stored under `key`; `None` if absent or expired.
    async fn read_all(&self, key: &str) -> Result<Option<Fields>, KvError>;
}

#[async_trait]
impl<S: HashStore + ?Sized> HashStore for Arc<S> {
    async fn replace(
        &self,
        key: &str,
        fields: &[(&str, &str)],
        ttl: Duration,
    ) -> Result<(), KvError> {
        (**self).replace(key, fields, ttl).await
    }

    async fn update_existing(
        &self,
        key: &str,
        set: &[(&str, &str)],
        remove: &[&str],
        ttl: Duration,
    ) -> Result<bool, KvError> {
        (**self).update_existing(key, set, remove, ttl).await
    }

    async fn read_all(&self, key: &str) -> Result<Option<Fields>, KvError> {
        (**self).read_all(key).await
    }
}
