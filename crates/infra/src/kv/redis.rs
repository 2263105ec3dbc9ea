//! Redis-backed hash store (optional).
//!
//! One multiplexed connection is opened by `connect` and shared by every clone
//! of the handle. It is never reopened implicitly; callers construct the
//! handle at startup and `close` it at shutdown.
//!
//! ## Atomicity
//!
//! - `replace`: `DEL` + `HSET` + `PEXPIRE` in a `MULTI/EXEC` pipeline
//! - `update_existing`: a Lua script, so the existence check, field writes,
//!   field deletes and TTL refresh happen as one server-side step

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::{debug, info};

use super::{Fields, HashStore, KvError};

/// ARGV: ttl_ms, n_set, field_1, value_1, ..., field_n, value_n, remove_1, ...
const UPDATE_EXISTING_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
local n = tonumber(ARGV[2])
for i = 0, n - 1 do
  redis.call('HSET', KEYS[1], ARGV[3 + 2 * i], ARGV[4 + 2 * i])
end
for i = 3 + 2 * n, #ARGV do
  redis.call('HDEL', KEYS[1], ARGV[i])
end
redis.call('PEXPIRE', KEYS[1], ARGV[1])
return 1
"#;

#[derive(Clone)]
pub struct RedisHashStore {
    conn: MultiplexedConnection,
    update_script: Arc<redis::Script>,
}

impl fmt::Debug for RedisHashStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisHashStore").finish_non_exhaustive()
    }
}

impl RedisHashStore {
    /// Open the shared connection.
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub async fn connect(redis_url: impl AsRef<str>) -> Result<Self, KvError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(map_err)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(map_err)?;

        info!("connected to redis");

        Ok(Self {
            conn,
            update_script: Arc::new(redis::Script::new(UPDATE_EXISTING_SCRIPT)),
        })
    }

    /// Round-trip check used at startup.
    pub async fn ping(&self) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    /// Release this handle. The socket closes once every clone is dropped.
    pub fn close(self) {
        debug!("closing redis handle");
        drop(self);
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn map_err(e: redis::RedisError) -> KvError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
        KvError::Connection(e.to_string())
    } else {
        KvError::Command(e.to_string())
    }
}

#[async_trait]
impl HashStore for RedisHashStore {
    async fn replace(
        &self,
        key: &str,
        fields: &[(&str, &str)],
        ttl: Duration,
    ) -> Result<(), KvError> {
        if fields.is_empty() {
            return Err(KvError::Command("HSET requires at least one field".to_string()));
        }

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("DEL").arg(key).ignore();
        pipe.cmd("HSET").arg(key);
        for (field, value) in fields {
            pipe.arg(*field).arg(*value);
        }
        pipe.ignore();
        pipe.cmd("PEXPIRE").arg(key).arg(ttl_millis(ttl)).ignore();

        pipe.query_async::<_, ()>(&mut conn).await.map_err(map_err)
    }

    async fn update_existing(
        &self,
        key: &str,
        set: &[(&str, &str)],
        remove: &[&str],
        ttl: Duration,
    ) -> Result<bool, KvError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.update_script.key(key);
        invocation.arg(ttl_millis(ttl)).arg(set.len());
        for (field, value) in set {
            invocation.arg(*field).arg(*value);
        }
        for field in remove {
            invocation.arg(*field);
        }

        let updated: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(updated == 1)
    }

    async fn read_all(&self, key: &str) -> Result<Option<Fields>, KvError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(key).await.map_err(map_err)?;
        if fields.is_empty() {
            Ok(None)
        } else {
            Ok(Some(fields))
        }
    }
}
