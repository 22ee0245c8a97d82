//! Key-value backends behind the state cache.

use crate::chain::error::CacheError;
use async_trait::async_trait;
use log::{info, warn};
use moka::future::Cache;
use moka::Expiry;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Decrement that never goes below zero, atomically.
const DECR_FLOOR_SCRIPT: &str = r#"
local value = redis.call('DECR', KEYS[1])
if value < 0 then
    redis.call('SET', KEYS[1], 0)
    return 0
end
return value
"#;

/// Minimal key-value surface the cache needs.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value`; `ttl` of `None` means no expiry.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
        -> Result<(), CacheError>;

    /// Store `value` only if `key` is absent. Returns whether it was written.
    async fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn incr(&self, key: &str) -> Result<i64, CacheError>;

    /// Decrement, clamping the stored value at zero.
    async fn decr_floor(&self, key: &str) -> Result<i64, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

/// Redis-backed cache store.
pub struct RedisBackend {
    client: redis::Client,
    connection: RwLock<Option<redis::aio::MultiplexedConnection>>,
}

impl RedisBackend {
    pub fn new(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            connection: RwLock::new(None),
        })
    }

    /// Get or create the multiplexed connection.
    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CacheError> {
        {
            let guard = self.connection.read().await;
            if let Some(conn) = guard.as_ref() {
                return Ok(conn.clone());
            }
        }

        let conn = self.client.get_multiplexed_async_connection().await?;
        info!("Connected to redis");
        let mut guard = self.connection.write().await;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Drop the cached connection so the next call reconnects.
    async fn reset_on_error<T>(&self, result: Result<T, redis::RedisError>) -> Result<T, CacheError> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
                    warn!("Redis connection lost: {}", e);
                    let mut guard = self.connection.write().await;
                    *guard = None;
                }
                Err(e.into())
            }
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.connection().await?;
        let result: Result<Option<Vec<u8>>, _> = conn.get(key).await;
        self.reset_on_error(result).await
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let result: Result<(), _> = cmd.query_async(&mut conn).await;
        self.reset_on_error(result).await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        // Nil when the key already existed.
        let result: Result<Option<String>, _> = cmd.query_async(&mut conn).await;
        self.reset_on_error(result).await.map(|reply| reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let result: Result<(), _> = conn.del(key).await;
        self.reset_on_error(result).await
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        let mut conn = self.connection().await?;
        let result: Result<i64, _> = conn.incr(key, 1i64).await;
        self.reset_on_error(result).await
    }

    async fn decr_floor(&self, key: &str) -> Result<i64, CacheError> {
        let mut conn = self.connection().await?;
        let script = redis::Script::new(DECR_FLOOR_SCRIPT);
        let result: Result<i64, _> = script.key(key).invoke_async(&mut conn).await;
        self.reset_on_error(result).await
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let result: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        self.reset_on_error(result).await.map(|_| ())
    }
}

/// Upper bound on process-local entries.
const MEMORY_CAPACITY: u64 = 100_000;

#[derive(Clone)]
struct MemoryEntry {
    value: Arc<[u8]>,
    ttl: Option<Duration>,
    /// Counter updates keep whatever expiry the key already had.
    keep_expiry: bool,
}

struct EntryExpiry;

impl Expiry<String, MemoryEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &MemoryEntry,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        entry.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &MemoryEntry,
        _updated_at: std::time::Instant,
        duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        if entry.keep_expiry {
            duration_until_expiry
        } else {
            entry.ttl
        }
    }
}

/// Process-local cache store, used when no redis URL is configured.
pub struct MemoryBackend {
    entries: Cache<String, MemoryEntry>,
    /// Serializes counter read-modify-write.
    counter_lock: Mutex<()>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let entries = Cache::builder()
            .max_capacity(MEMORY_CAPACITY)
            .expire_after(EntryExpiry)
            .build();

        Self {
            entries,
            counter_lock: Mutex::new(()),
        }
    }

    fn entry(value: Vec<u8>, ttl: Option<Duration>) -> MemoryEntry {
        MemoryEntry {
            value: Arc::from(value),
            ttl,
            keep_expiry: false,
        }
    }

    fn parse_counter(entry: Option<&MemoryEntry>) -> Result<i64, CacheError> {
        match entry {
            None => Ok(0),
            Some(entry) => std::str::from_utf8(&entry.value)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| CacheError::Serialization("counter is not an integer".to_string())),
        }
    }

    async fn adjust(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        let _guard = self.counter_lock.lock().await;
        let current = self.entries.get(key).await;
        let next = (Self::parse_counter(current.as_ref())? + delta).max(0);
        self.entries
            .insert(
                key.to_string(),
                MemoryEntry {
                    value: Arc::from(next.to_string().into_bytes()),
                    ttl: None,
                    keep_expiry: true,
                },
            )
            .await;
        Ok(next)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.entries.get(key).await.map(|e| e.value.to_vec()))
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.entries
            .insert(key.to_string(), Self::entry(value, ttl))
            .await;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert(Self::entry(value, ttl))
            .await;
        Ok(entry.is_fresh())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.invalidate(key).await;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        self.adjust(key, 1).await
    }

    async fn decr_floor(&self, key: &str) -> Result<i64, CacheError> {
        self.adjust(key, -1).await
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_set_if_absent() {
        let backend = MemoryBackend::new();
        assert!(backend.set_if_absent("k", b"a".to_vec(), None).await.unwrap());
        assert!(!backend.set_if_absent("k", b"b".to_vec(), None).await.unwrap());
        assert_eq!(backend.get("k").await.unwrap(), Some(b"a".to_vec()));
    }

    #[tokio::test]
    async fn test_memory_counter_floor() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.decr_floor("c").await.unwrap(), 0);
        assert_eq!(backend.incr("c").await.unwrap(), 1);
        assert_eq!(backend.incr("c").await.unwrap(), 2);
        assert_eq!(backend.decr_floor("c").await.unwrap(), 1);
        assert_eq!(backend.decr_floor("c").await.unwrap(), 0);
        assert_eq!(backend.decr_floor("c").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_memory_entry_expires() {
        let backend = MemoryBackend::new();
        backend
            .set("k", b"v".to_vec(), Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert!(backend.get("k").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(backend.get("k").await.unwrap().is_none());
        // An expired key counts as absent.
        assert!(backend.set_if_absent("k", b"w".to_vec(), None).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_overwrite_replaces_ttl() {
        let backend = MemoryBackend::new();
        backend
            .set("k", b"v".to_vec(), Some(Duration::from_millis(100)))
            .await
            .unwrap();
        backend.set("k", b"w".to_vec(), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(backend.get("k").await.unwrap(), Some(b"w".to_vec()));
    }

    #[tokio::test]
    async fn test_memory_expired_entries_are_evicted() {
        let backend = MemoryBackend::new();
        for i in 0..1_000 {
            backend
                .set(
                    &format!("blacklist:7:{}", i),
                    b"true".to_vec(),
                    Some(Duration::from_millis(50)),
                )
                .await
                .unwrap();
        }
        backend.incr("viewers:7").await.unwrap();

        // Expiry is swept on the timer wheel's roughly one second ticks.
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert!(backend.get("blacklist:7:0").await.unwrap().is_none());
        backend.entries.run_pending_tasks().await;
        assert_eq!(backend.entries.entry_count(), 1);
        assert_eq!(backend.get("viewers:7").await.unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_redis_backend_rejects_bad_url() {
        assert!(RedisBackend::new("not a url").is_err());
    }
}
