//! In-process hash store with per-key expiration, for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{Fields, HashStore, KvError};

#[derive(Debug, Clone)]
struct Entry {
    fields: Fields,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory hash store.
///
/// Expired keys are hidden from reads immediately and dropped lazily on the
/// next write to the same key or by `purge_expired`. Time comes from
/// `tokio::time::Instant`, so a paused test clock drives expiration.
#[derive(Debug, Default)]
pub struct InMemoryHashStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryHashStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Drop every expired key. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, KvError> {
        let now = Instant::now();
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        Ok(before - entries.len())
    }

    /// Time left before `key` expires, if it is live.
    pub fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>, KvError> {
        let now = Instant::now();
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.expires_at - now))
    }

    /// Number of live keys.
    pub fn len(&self) -> Result<usize, KvError> {
        let now = Instant::now();
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.values().filter(|entry| entry.is_live(now)).count())
    }

    pub fn is_empty(&self) -> Result<bool, KvError> {
        Ok(self.len()? == 0)
    }
}

fn deadline(now: Instant, ttl: Duration) -> Result<Instant, KvError> {
    now.checked_add(ttl)
        .ok_or_else(|| KvError::Command(format!("ttl out of range: {ttl:?}")))
}

fn poisoned() -> KvError {
    KvError::Connection("in-memory store lock poisoned".to_string())
}

#[async_trait]
impl HashStore for InMemoryHashStore {
    async fn replace(
        &self,
        key: &str,
        fields: &[(&str, &str)],
        ttl: Duration,
    ) -> Result<(), KvError> {
        let entry = Entry {
            fields: fields
                .iter()
                .map(|(field, value)| (field.to_string(), value.to_string()))
                .collect(),
            expires_at: deadline(Instant::now(), ttl)?,
        };

        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn update_existing(
        &self,
        key: &str,
        set: &[(&str, &str)],
        remove: &[&str],
        ttl: Duration,
    ) -> Result<bool, KvError> {
        let now = Instant::now();
        let expires_at = deadline(now, ttl)?;
        let mut entries = self.entries.write().map_err(|_| poisoned())?;

        match entries.get(key).map(|entry| entry.is_live(now)) {
            Some(true) => {}
            Some(false) => {
                entries.remove(key);
                return Ok(false);
            }
            None => return Ok(false),
        }
        let Some(entry) = entries.get_mut(key) else {
            return Ok(false);
        };

        for (field, value) in set {
            entry.fields.insert(field.to_string(), value.to_string());
        }
        for field in remove {
            entry.fields.remove(*field);
        }
        entry.expires_at = expires_at;
        Ok(true)
    }

    async fn read_all(&self, key: &str) -> Result<Option<Fields>, KvError> {
        let now = Instant::now();
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now) && !entry.fields.is_empty())
            .map(|entry| entry.fields.clone()))
    }
}
