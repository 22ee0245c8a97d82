//! TTL-bounded cache-aside store for ledger projections.
//!
//! The cache is an optimization, never a source of truth. Every value is
//! wrapped in a [`CacheEntry`] carrying its own expiry, so a stale entry is
//! discarded even if the backend failed to evict it. Backend failures flip
//! the cache into bypass mode, in which reads miss and cache-aside population
//! is skipped. Event writes always go to the backend; a key whose event write
//! failed is deleted before bypass mode is left.

use crate::chain::backend::CacheBackend;
use crate::chain::error::CacheError;
use crate::chain::types::{Gift, RoomSnapshot};
use crate::clock::Clock;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Key namespaces and their volatility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Room,
    Gifts,
    BanFlag,
    CoHosts,
    Viewers,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Room => "room",
            Namespace::Gifts => "gifts",
            Namespace::BanFlag => "blacklist",
            Namespace::CoHosts => "cohosts",
            Namespace::Viewers => "viewers",
        }
    }

    /// `None` means the entry never expires and is reset explicitly.
    pub fn default_ttl(&self) -> Option<Duration> {
        match self {
            Namespace::Room => Some(Duration::from_secs(60)),
            Namespace::Gifts => Some(Duration::from_secs(300)),
            Namespace::BanFlag => Some(Duration::from_secs(30)),
            Namespace::CoHosts => Some(Duration::from_secs(10)),
            Namespace::Viewers => None,
        }
    }
}

/// Serialized envelope stored under each key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub value: T,
    /// Milliseconds since the Unix epoch; `None` for no expiry.
    pub expires_at_ms: Option<i64>,
}

impl<T> CacheEntry<T> {
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        self.expires_at_ms.map_or(true, |expiry| now_ms < expiry)
    }
}

pub struct StateCache {
    backend: Arc<dyn CacheBackend>,
    prefix: String,
    clock: Arc<dyn Clock>,
    bypass: AtomicBool,
    /// Keys whose event write failed and may still hold pre-event state.
    stale: Mutex<HashSet<String>>,
}

impl StateCache {
    pub fn new(backend: Arc<dyn CacheBackend>, prefix: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
            clock,
            bypass: AtomicBool::new(false),
            stale: Mutex::new(HashSet::new()),
        }
    }

    pub fn key(&self, namespace: Namespace, id: &str) -> String {
        format!("{}{}:{}", self.prefix, namespace.as_str(), id)
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass.load(Ordering::Relaxed)
    }

    /// Probe the backend and update bypass mode accordingly. Bypass mode is
    /// only left once every stale key has been deleted.
    pub async fn ping(&self) -> bool {
        match self.backend.ping().await {
            Ok(()) => {
                if !self.clear_stale().await {
                    return false;
                }
                if self.bypass.swap(false, Ordering::Relaxed) {
                    info!("Cache backend recovered, leaving bypass mode");
                }
                true
            }
            Err(e) => {
                if !self.bypass.swap(true, Ordering::Relaxed) {
                    warn!("Cache backend unreachable, entering bypass mode: {}", e);
                }
                false
            }
        }
    }

    pub async fn stale_key_count(&self) -> usize {
        self.stale.lock().await.len()
    }

    async fn mark_stale(&self, key: String, e: &CacheError) {
        warn!("Cache write of {} failed, bypassing cache until it is cleared: {}", key, e);
        self.stale.lock().await.insert(key);
        self.bypass.store(true, Ordering::Relaxed);
    }

    async fn clear_stale(&self) -> bool {
        let mut stale = self.stale.lock().await;
        let keys: Vec<String> = stale.iter().cloned().collect();
        for key in keys {
            match self.backend.delete(&key).await {
                Ok(()) => {
                    stale.remove(&key);
                }
                Err(e) => {
                    warn!("Stale cache entry {} could not be cleared: {}", key, e);
                    return false;
                }
            }
        }
        true
    }

    /// Record the outcome of an event write.
    async fn track_write(&self, key: String, result: Result<(), CacheError>) -> Result<(), CacheError> {
        match result {
            Ok(()) => {
                self.stale.lock().await.remove(&key);
                Ok(())
            }
            Err(e) => {
                self.mark_stale(key, &e).await;
                Err(e)
            }
        }
    }

    fn envelope<T: Serialize>(&self, value: &T, ttl: Option<Duration>) -> Result<Vec<u8>, CacheError> {
        let entry = CacheEntry {
            value,
            expires_at_ms: ttl.map(|ttl| self.clock.now_ms() + ttl.as_millis() as i64),
        };
        Ok(serde_json::to_vec(&entry)?)
    }

    /// Read a value; misses on absence, expiry, bypass or any backend error.
    pub async fn get<T: DeserializeOwned>(&self, namespace: Namespace, id: &str) -> Option<T> {
        if self.is_bypassed() {
            return None;
        }
        let key = self.key(namespace, id);
        let bytes = match self.backend.get(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!("Cache read of {} failed, falling through: {}", key, e);
                return None;
            }
        };
        match serde_json::from_slice::<CacheEntry<T>>(&bytes) {
            Ok(entry) if entry.is_fresh(self.clock.now_ms()) => Some(entry.value),
            Ok(_) => {
                debug!("Discarding expired cache entry {}", key);
                None
            }
            Err(e) => {
                warn!("Discarding unreadable cache entry {}: {}", key, e);
                None
            }
        }
    }

    /// Unconditional write, used when the new value is known to be current.
    /// Attempted in bypass mode too.
    pub async fn set<T: Serialize>(
        &self,
        namespace: Namespace,
        id: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let key = self.key(namespace, id);
        let bytes = self.envelope(value, ttl)?;
        let result = self.backend.set(&key, bytes, ttl).await;
        self.track_write(key, result).await
    }

    /// Cache-aside population. Writes only if the key is absent, so a value
    /// written by an event handler is never replaced by an older ledger read.
    pub async fn populate<T: Serialize>(&self, namespace: Namespace, id: &str, value: &T) {
        if self.is_bypassed() {
            return;
        }
        let ttl = namespace.default_ttl();
        let key = self.key(namespace, id);
        let result = match self.envelope(value, ttl) {
            Ok(bytes) => self.backend.set_if_absent(&key, bytes, ttl).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(true) => debug!("Populated cache entry {}", key),
            Ok(false) => debug!("Cache entry {} already present, keeping it", key),
            Err(e) => warn!("Cache population of {} failed: {}", key, e),
        }
    }

    /// Attempted in bypass mode too.
    pub async fn invalidate(&self, namespace: Namespace, id: &str) -> Result<(), CacheError> {
        let key = self.key(namespace, id);
        let result = self.backend.delete(&key).await;
        self.track_write(key, result).await
    }

    // Rooms

    pub async fn room(&self, room_id: u64) -> Option<RoomSnapshot> {
        self.get(Namespace::Room, &room_id.to_string()).await
    }

    pub async fn populate_room(&self, room: &RoomSnapshot) {
        self.populate(Namespace::Room, &room.id.to_string(), room).await
    }

    pub async fn invalidate_room(&self, room_id: u64) -> Result<(), CacheError> {
        self.invalidate(Namespace::Room, &room_id.to_string()).await
    }

    // Gift catalog

    pub async fn gift_catalog(&self) -> Option<Vec<Gift>> {
        self.get(Namespace::Gifts, "all").await
    }

    pub async fn populate_gift_catalog(&self, gifts: &[Gift]) {
        self.populate(Namespace::Gifts, "all", &gifts).await
    }

    pub async fn invalidate_gift_catalog(&self) -> Result<(), CacheError> {
        self.invalidate(Namespace::Gifts, "all").await
    }

    // Ban flags

    fn ban_id(room_id: u64, address: &str) -> String {
        format!("{}:{}", room_id, address)
    }

    pub async fn ban_flag(&self, room_id: u64, address: &str) -> Option<bool> {
        self.get(Namespace::BanFlag, &Self::ban_id(room_id, address)).await
    }

    /// Write a ban flag known from a ledger event.
    pub async fn set_ban_flag(&self, room_id: u64, address: &str, banned: bool) -> Result<(), CacheError> {
        self.set(
            Namespace::BanFlag,
            &Self::ban_id(room_id, address),
            &banned,
            Namespace::BanFlag.default_ttl(),
        )
        .await
    }

    pub async fn populate_ban_flag(&self, room_id: u64, address: &str, banned: bool) {
        self.populate(Namespace::BanFlag, &Self::ban_id(room_id, address), &banned)
            .await
    }

    // Co-hosts

    pub async fn co_hosts(&self, room_id: u64) -> Option<Vec<String>> {
        self.get(Namespace::CoHosts, &room_id.to_string()).await
    }

    pub async fn populate_co_hosts(&self, room_id: u64, co_hosts: &[String]) {
        self.populate(Namespace::CoHosts, &room_id.to_string(), &co_hosts)
            .await
    }

    pub async fn invalidate_co_hosts(&self, room_id: u64) -> Result<(), CacheError> {
        self.invalidate(Namespace::CoHosts, &room_id.to_string()).await
    }

    // Live viewer counters. Stored as plain integers, authoritative only
    // for this process.

    pub async fn viewer_count(&self, room_id: u64) -> u64 {
        if self.is_bypassed() {
            return 0;
        }
        let key = self.key(Namespace::Viewers, &room_id.to_string());
        match self.backend.get(&key).await {
            Ok(Some(bytes)) => std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.trim().parse::<i64>().ok())
                .map_or(0, |n| n.max(0) as u64),
            Ok(None) => 0,
            Err(e) => {
                warn!("Viewer count read for room {} failed: {}", room_id, e);
                0
            }
        }
    }

    pub async fn increment_viewers(&self, room_id: u64) -> Result<u64, CacheError> {
        if self.is_bypassed() {
            return Err(CacheError::Bypassed);
        }
        let key = self.key(Namespace::Viewers, &room_id.to_string());
        let count = self.backend.incr(&key).await?;
        Ok(count.max(0) as u64)
    }

    /// Floors at zero.
    pub async fn decrement_viewers(&self, room_id: u64) -> Result<u64, CacheError> {
        if self.is_bypassed() {
            return Err(CacheError::Bypassed);
        }
        let key = self.key(Namespace::Viewers, &room_id.to_string());
        let count = self.backend.decr_floor(&key).await?;
        Ok(count.max(0) as u64)
    }

    pub async fn reset_viewers(&self, room_id: u64) -> Result<(), CacheError> {
        self.invalidate(Namespace::Viewers, &room_id.to_string()).await
    }
}

impl std::fmt::Debug for StateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCache")
            .field("prefix", &self.prefix)
            .field("bypass", &self.is_bypassed())
            .finish()
    }
}
