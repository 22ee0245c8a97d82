//! Ledger client for the livestream pallet.
//!
//! Owns the single connection to the ledger node. Concurrent callers of
//! [`LedgerClient::connect`] share one in-flight attempt; a lost connection
//! resets the client so the next caller reconnects. Read queries go through
//! the [`StateCache`] first and populate it on miss.

use crate::chain::cache::StateCache;
use crate::chain::codec::{self, parse_account, StorageKeys};
use crate::chain::error::ChainError;
use crate::chain::node::{LedgerConnection, LedgerNode};
use crate::chain::types::{Amount, Gift, RoomPage, RoomQuery, RoomSnapshot, RoomStatus};
use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use futures_util::stream::{self, StreamExt};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Shared handle to an established ledger connection.
pub type LedgerHandle = Arc<dyn LedgerConnection>;

/// Room lookups a single listing keeps in flight.
pub const ROOM_FETCH_CONCURRENCY: usize = 16;

type PendingConnect = Shared<BoxFuture<'static, Result<LedgerHandle, ChainError>>>;

enum ConnectionState {
    Idle,
    Connecting(PendingConnect),
    Connected(LedgerHandle),
}

pub struct LedgerClient {
    node: Arc<dyn LedgerNode>,
    cache: Arc<StateCache>,
    keys: StorageKeys,
    query_timeout: Duration,
    state: Mutex<ConnectionState>,
}

impl LedgerClient {
    /// Create a new ledger client. Connection is established lazily.
    pub fn new(
        node: Arc<dyn LedgerNode>,
        cache: Arc<StateCache>,
        keys: StorageKeys,
        query_timeout: Duration,
    ) -> Self {
        Self {
            node,
            cache,
            keys,
            query_timeout,
            state: Mutex::new(ConnectionState::Idle),
        }
    }

    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    /// Return the live handle, or join/start the single connection attempt.
    pub async fn connect(&self) -> Result<LedgerHandle, ChainError> {
        let pending = {
            let mut state = self.state.lock().await;
            match &*state {
                ConnectionState::Connected(handle) if handle.is_connected() => {
                    return Ok(handle.clone());
                }
                ConnectionState::Connecting(pending) => pending.clone(),
                _ => {
                    let node = self.node.clone();
                    let timeout = self.query_timeout;
                    let attempt = async move {
                        match tokio::time::timeout(timeout, node.connect()).await {
                            Ok(result) => result,
                            Err(_) => Err(ChainError::ConnectionFailed {
                                url: node.endpoint().to_string(),
                                reason: format!("timed out after {}ms", timeout.as_millis()),
                            }),
                        }
                    }
                    .boxed()
                    .shared();
                    *state = ConnectionState::Connecting(attempt.clone());
                    attempt
                }
            }
        };

        let result = pending.clone().await;

        let mut state = self.state.lock().await;
        if let ConnectionState::Connecting(current) = &*state {
            if current.ptr_eq(&pending) {
                *state = match &result {
                    Ok(handle) => ConnectionState::Connected(handle.clone()),
                    Err(e) => {
                        warn!("Ledger connection attempt failed: {}", e);
                        ConnectionState::Idle
                    }
                };
            }
        }
        result
    }

    pub async fn is_connected(&self) -> bool {
        matches!(&*self.state.lock().await, ConnectionState::Connected(handle) if handle.is_connected())
    }

    /// Forget the current connection so the next caller reconnects.
    pub async fn mark_disconnected(&self) {
        let mut state = self.state.lock().await;
        if matches!(&*state, ConnectionState::Connected(_)) {
            info!("Ledger connection dropped, will reconnect on next use");
            *state = ConnectionState::Idle;
        }
    }

    async fn fetch(&self, key: Vec<u8>) -> Result<Option<Vec<u8>>, ChainError> {
        let handle = self
            .connect()
            .await
            .map_err(|e| ChainError::Unavailable(e.to_string()))?;

        match tokio::time::timeout(self.query_timeout, handle.fetch_raw(key)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if !handle.is_connected() {
                    self.mark_disconnected().await;
                }
                Err(e)
            }
            Err(_) => Err(ChainError::Timeout {
                millis: self.query_timeout.as_millis() as u64,
            }),
        }
    }

    /// Room by id, cache-aside.
    pub async fn room(&self, room_id: u64) -> Result<Option<RoomSnapshot>, ChainError> {
        if let Some(room) = self.cache.room(room_id).await {
            debug!("Cache hit for room {}", room_id);
            return Ok(Some(room));
        }

        debug!("Cache miss for room {}, querying chain", room_id);
        let Some(data) = self.fetch(self.keys.live_room(room_id)).await? else {
            return Ok(None);
        };
        let room = codec::decode_room(&data)?;
        self.cache.populate_room(&room).await;
        Ok(Some(room))
    }

    pub async fn room_status(&self, room_id: u64) -> Result<Option<RoomStatus>, ChainError> {
        Ok(self.room(room_id).await?.map(|room| room.status))
    }

    pub async fn is_room_host(&self, room_id: u64, address: &str) -> Result<bool, ChainError> {
        let account = parse_account(address)?;
        Ok(self
            .room(room_id)
            .await?
            .is_some_and(|room| room.host == account.to_string()))
    }

    /// Rooms matching the filters, most viewed first, paged.
    pub async fn rooms(&self, query: RoomQuery) -> Result<RoomPage, ChainError> {
        let query = query.normalized();
        let next_room_id = match self.fetch(self.keys.next_room_id()).await? {
            Some(data) => codec::decode_u64(&data)?,
            None => 0,
        };

        let mut lookups = stream::iter(0..next_room_id)
            .map(|room_id| async move { (room_id, self.room(room_id).await) })
            .buffered(ROOM_FETCH_CONCURRENCY);
        let mut rooms: Vec<RoomSnapshot> = Vec::new();
        while let Some((room_id, result)) = lookups.next().await {
            match result {
                Ok(Some(room)) if query.matches(&room) => rooms.push(room),
                Ok(_) => {}
                Err(ChainError::DecodeError(e)) => {
                    warn!("Leaving room {} out of the listing: {}", room_id, e)
                }
                Err(e) => return Err(e),
            }
        }

        rooms.sort_by(|a, b| b.total_viewers.cmp(&a.total_viewers));

        let total = rooms.len();
        let start = ((query.page - 1) as usize).saturating_mul(query.limit as usize);
        let rooms = rooms
            .into_iter()
            .skip(start)
            .take(query.limit as usize)
            .collect();

        Ok(RoomPage {
            rooms,
            total,
            page: query.page,
            limit: query.limit,
        })
    }

    /// Ticket ownership is read straight from the ledger; a purchase must be
    /// visible immediately.
    pub async fn has_ticket(&self, room_id: u64, address: &str) -> Result<bool, ChainError> {
        let account = parse_account(address)?;
        let entry = self.fetch(self.keys.ticket_holder(room_id, &account)).await?;
        Ok(entry.is_some())
    }

    pub async fn is_banned(&self, room_id: u64, address: &str) -> Result<bool, ChainError> {
        let account = parse_account(address)?;
        let canonical = account.to_string();
        if let Some(banned) = self.cache.ban_flag(room_id, &canonical).await {
            return Ok(banned);
        }

        let banned = self
            .fetch(self.keys.blacklist(room_id, &account))
            .await?
            .is_some();
        self.cache.populate_ban_flag(room_id, &canonical, banned).await;
        Ok(banned)
    }

    pub async fn co_hosts(&self, room_id: u64) -> Result<Vec<String>, ChainError> {
        if let Some(co_hosts) = self.cache.co_hosts(room_id).await {
            return Ok(co_hosts);
        }

        let co_hosts = match self.fetch(self.keys.active_co_hosts(room_id)).await? {
            Some(data) => codec::decode_accounts(&data)?,
            None => Vec::new(),
        };
        self.cache.populate_co_hosts(room_id, &co_hosts).await;
        Ok(co_hosts)
    }

    pub async fn is_co_host(&self, room_id: u64, address: &str) -> Result<bool, ChainError> {
        let canonical = parse_account(address)?.to_string();
        Ok(self.co_hosts(room_id).await?.contains(&canonical))
    }

    pub async fn host_earnings(&self, address: &str) -> Result<Amount, ChainError> {
        let account = parse_account(address)?;
        match self.fetch(self.keys.host_earnings(&account)).await? {
            Some(data) => codec::decode_balance(&data),
            None => Ok(Amount(0)),
        }
    }

    pub async fn gift_catalog(&self) -> Result<Vec<Gift>, ChainError> {
        if let Some(gifts) = self.cache.gift_catalog().await {
            return Ok(gifts);
        }

        let next_gift_id = match self.fetch(self.keys.next_gift_id()).await? {
            Some(data) => codec::decode_u32(&data)?,
            None => 0,
        };
        let lookups = (0..next_gift_id).map(|gift_id| self.fetch(self.keys.gift(gift_id)));
        let mut gifts = Vec::new();
        for data in future::try_join_all(lookups).await?.into_iter().flatten() {
            gifts.push(codec::decode_gift(&data)?);
        }

        self.cache.populate_gift_catalog(&gifts).await;
        Ok(gifts)
    }
}

impl std::fmt::Debug for LedgerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerClient")
            .field("endpoint", &self.node.endpoint())
            .field("pallet", &self.keys.pallet())
            .field("query_timeout", &self.query_timeout)
            .finish()
    }
}
