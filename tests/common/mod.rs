#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use livegate::chain::codec::{account_to_address, ChainLiveRoom};
use livegate::chain::node::EventBatchStream;
use livegate::chain::signature::{signing_message, SignedScope};
use livegate::chain::{
    CacheBackend, CacheError, ChainError, CredentialIssuer, LedgerClient, LedgerConnection,
    LedgerEventDispatcher, LedgerNode, MemoryBackend, RawEvent, SignatureAuthenticator,
    SignedRequest, StateCache, StorageKeys,
};
use livegate::clock::ManualClock;
use livegate::media::{IssuedCredential, MediaGrant, MediaSessionProvider, ProviderError};
use livegate::realtime::RealtimeHub;
use scale::Encode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use subxt::utils::AccountId32;
use subxt_signer::sr25519::Keypair;
use tokio::sync::mpsc;

pub const T0: i64 = 1_700_000_000_000;
pub const PALLET: &str = "Livestream";

type EventItem = Result<Vec<RawEvent>, ChainError>;

/// Scripted ledger: a storage map, an availability switch and an event feed.
pub struct FakeLedgerState {
    storage: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    available: AtomicBool,
    pub connects: AtomicUsize,
    pub fetches: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    connect_delay: Mutex<Duration>,
    fetch_delay: Mutex<Duration>,
    event_tx: Mutex<Option<mpsc::UnboundedSender<EventItem>>>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<EventItem>>>,
}

impl FakeLedgerState {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            storage: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            connects: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            connect_delay: Mutex::new(Duration::ZERO),
            fetch_delay: Mutex::new(Duration::ZERO),
            event_tx: Mutex::new(Some(tx)),
            event_rx: Mutex::new(Some(rx)),
        })
    }

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        self.storage.lock().unwrap().insert(key, value);
    }

    pub fn remove(&self, key: &[u8]) {
        self.storage.lock().unwrap().remove(key);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = delay;
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Most storage reads ever outstanding at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn push_events(&self, batch: Vec<RawEvent>) {
        if let Some(tx) = self.event_tx.lock().unwrap().as_ref() {
            let _ = tx.send(Ok(batch));
        }
    }

    pub fn fail_subscription(&self, error: ChainError) {
        if let Some(tx) = self.event_tx.lock().unwrap().as_ref() {
            let _ = tx.send(Err(error));
        }
    }

    /// End the event stream, as a dropped node connection would.
    pub fn close_events(&self) {
        self.event_tx.lock().unwrap().take();
    }
}

pub struct FakeNode {
    pub state: Arc<FakeLedgerState>,
}

struct FakeConnection {
    state: Arc<FakeLedgerState>,
}

#[async_trait]
impl LedgerNode for FakeNode {
    async fn connect(&self) -> Result<Arc<dyn LedgerConnection>, ChainError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if !self.state.available.load(Ordering::SeqCst) {
            return Err(ChainError::ConnectionFailed {
                url: self.endpoint().to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(Arc::new(FakeConnection {
            state: self.state.clone(),
        }))
    }

    fn endpoint(&self) -> &str {
        "ws://fake-ledger"
    }
}

#[async_trait]
impl LedgerConnection for FakeConnection {
    async fn fetch_raw(&self, key: Vec<u8>) -> Result<Option<Vec<u8>>, ChainError> {
        self.state.fetches.fetch_add(1, Ordering::SeqCst);
        let outstanding = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(outstanding, Ordering::SeqCst);

        let delay = *self.state.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let result = if self.is_connected() {
            Ok(self.state.storage.lock().unwrap().get(&key).cloned())
        } else {
            Err(ChainError::Unavailable("node went away".to_string()))
        };

        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn subscribe_events(&self) -> Result<EventBatchStream, ChainError> {
        let rx = self
            .state
            .event_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ChainError::RpcError("already subscribed".to_string()))?;
        Ok(stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed())
    }

    fn is_connected(&self) -> bool {
        self.state.available.load(Ordering::SeqCst)
    }
}

/// Media provider that records grants instead of minting tokens.
#[derive(Default)]
pub struct RecordingProvider {
    pub grants: Mutex<Vec<MediaGrant>>,
}

impl RecordingProvider {
    pub fn issued(&self) -> usize {
        self.grants.lock().unwrap().len()
    }
}

#[async_trait]
impl MediaSessionProvider for RecordingProvider {
    async fn issue(&self, grant: &MediaGrant) -> Result<IssuedCredential, ProviderError> {
        self.grants.lock().unwrap().push(grant.clone());
        Ok(IssuedCredential {
            credential: format!("token-for-{}", grant.identity),
            media_server_url: self.server_url().to_string(),
            session_name: grant.session_name(),
            identity: grant.identity.clone(),
            room_id: grant.room_id,
            capabilities: grant.capabilities,
            expires_at_ms: T0 + 3_600_000,
        })
    }

    fn server_url(&self) -> &str {
        "wss://media.test"
    }
}

/// Cache backend whose every operation fails.
pub struct FailingBackend;

#[async_trait]
impl CacheBackend for FailingBackend {
    async fn get(&self, _: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Err(CacheError::Redis("broken pipe".into()))
    }
    async fn set(&self, _: &str, _: Vec<u8>, _: Option<Duration>) -> Result<(), CacheError> {
        Err(CacheError::Redis("broken pipe".into()))
    }
    async fn set_if_absent(&self, _: &str, _: Vec<u8>, _: Option<Duration>) -> Result<bool, CacheError> {
        Err(CacheError::Redis("broken pipe".into()))
    }
    async fn delete(&self, _: &str) -> Result<(), CacheError> {
        Err(CacheError::Redis("broken pipe".into()))
    }
    async fn incr(&self, _: &str) -> Result<i64, CacheError> {
        Err(CacheError::Redis("broken pipe".into()))
    }
    async fn decr_floor(&self, _: &str) -> Result<i64, CacheError> {
        Err(CacheError::Redis("broken pipe".into()))
    }
    async fn ping(&self) -> Result<(), CacheError> {
        Err(CacheError::Redis("broken pipe".into()))
    }
}

/// In-process backend that can be taken down. `set_ping_down` fails only
/// the health check; `set_down` fails every operation.
pub struct FlakyBackend {
    inner: MemoryBackend,
    down: AtomicBool,
    ping_down: AtomicBool,
}

impl FlakyBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryBackend::new(),
            down: AtomicBool::new(false),
            ping_down: AtomicBool::new(false),
        })
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn set_ping_down(&self, down: bool) {
        self.ping_down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.down.load(Ordering::SeqCst) {
            Err(CacheError::Redis("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheBackend for FlakyBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.check()?;
        self.inner.get(key).await
    }
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }
    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<bool, CacheError> {
        self.check()?;
        self.inner.set_if_absent(key, value, ttl).await
    }
    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.check()?;
        self.inner.delete(key).await
    }
    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        self.check()?;
        self.inner.incr(key).await
    }
    async fn decr_floor(&self, key: &str) -> Result<i64, CacheError> {
        self.check()?;
        self.inner.decr_floor(key).await
    }
    async fn ping(&self) -> Result<(), CacheError> {
        self.check()?;
        if self.ping_down.load(Ordering::SeqCst) {
            return Err(CacheError::Redis("ping timed out".into()));
        }
        self.inner.ping().await
    }
}

/// In-process backend that panics when deleting a key containing `poison`.
pub struct PanickingBackend {
    inner: MemoryBackend,
    poison: String,
}

impl PanickingBackend {
    pub fn new(poison: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryBackend::new(),
            poison: poison.to_string(),
        })
    }
}

#[async_trait]
impl CacheBackend for PanickingBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.inner.get(key).await
    }
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.inner.set(key, value, ttl).await
    }
    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<bool, CacheError> {
        self.inner.set_if_absent(key, value, ttl).await
    }
    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        if key.contains(&self.poison) {
            panic!("backend corrupted while deleting {}", key);
        }
        self.inner.delete(key).await
    }
    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        self.inner.incr(key).await
    }
    async fn decr_floor(&self, key: &str) -> Result<i64, CacheError> {
        self.inner.decr_floor(key).await
    }
    async fn ping(&self) -> Result<(), CacheError> {
        self.inner.ping().await
    }
}

/// Everything wired together over fakes.
pub struct Fixture {
    pub clock: Arc<ManualClock>,
    pub chain: Arc<FakeLedgerState>,
    pub keys: StorageKeys,
    pub cache: Arc<StateCache>,
    pub ledger: Arc<LedgerClient>,
    pub hub: Arc<RealtimeHub>,
    pub authenticator: Arc<SignatureAuthenticator>,
    pub provider: Arc<RecordingProvider>,
    pub issuer: Arc<CredentialIssuer>,
    pub dispatcher: Arc<LedgerEventDispatcher>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()))
    }

    pub fn with_backend(backend: Arc<dyn CacheBackend>) -> Self {
        let clock = Arc::new(ManualClock::new(T0));
        let chain = FakeLedgerState::new();
        let keys = StorageKeys::new(PALLET);
        let cache = Arc::new(StateCache::new(backend, "test:", clock.clone()));
        let ledger = Arc::new(LedgerClient::new(
            Arc::new(FakeNode {
                state: chain.clone(),
            }),
            cache.clone(),
            keys.clone(),
            Duration::from_secs(2),
        ));
        let hub = Arc::new(RealtimeHub::new());
        let authenticator = Arc::new(SignatureAuthenticator::new(300_000, clock.clone()));
        let provider = Arc::new(RecordingProvider::default());
        let issuer = Arc::new(CredentialIssuer::new(
            authenticator.clone(),
            ledger.clone(),
            cache.clone(),
            provider.clone(),
        ));
        let dispatcher = Arc::new(LedgerEventDispatcher::new(
            ledger.clone(),
            cache.clone(),
            hub.clone(),
        ));

        Self {
            clock,
            chain,
            keys,
            cache,
            ledger,
            hub,
            authenticator,
            provider,
            issuer,
            dispatcher,
        }
    }

    pub fn put_room(&self, room: &ChainLiveRoom) {
        self.chain.put(self.keys.live_room(room.id), room.encode());
    }

    pub fn set_next_room_id(&self, next: u64) {
        self.chain.put(self.keys.next_room_id(), next.encode());
    }

    pub fn give_ticket(&self, room_id: u64, keypair: &Keypair) {
        self.chain
            .put(self.keys.ticket_holder(room_id, &account(keypair)), 1u32.encode());
    }

    pub fn ban(&self, room_id: u64, keypair: &Keypair) {
        self.chain
            .put(self.keys.blacklist(room_id, &account(keypair)), ().encode());
    }

    pub fn set_co_hosts(&self, room_id: u64, co_hosts: &[&Keypair]) {
        let accounts: Vec<[u8; 32]> = co_hosts.iter().map(|k| k.public_key().0).collect();
        self.chain
            .put(self.keys.active_co_hosts(room_id), accounts.encode());
    }
}

pub fn account(keypair: &Keypair) -> AccountId32 {
    AccountId32(keypair.public_key().0)
}

pub fn address(keypair: &Keypair) -> String {
    account_to_address(&keypair.public_key().0)
}

/// Room `id` hosted by `host`. Status and kind are SCALE variant indices.
pub fn chain_room(id: u64, host: &Keypair, status: u8, room_type: u8) -> ChainLiveRoom {
    ChainLiveRoom {
        id,
        host: host.public_key().0,
        title: format!("room {}", id).into_bytes(),
        description: None,
        room_type,
        status,
        cover_cid: None,
        total_viewers: 0,
        peak_viewers: 0,
        total_gifts: 0,
        ticket_price: if room_type == 1 { Some(1_000) } else { None },
        created_at: 10,
        started_at: None,
        ended_at: None,
    }
}

pub fn signed(keypair: &Keypair, room_id: u64, timestamp_ms: i64) -> SignedRequest {
    let message = signing_message(SignedScope::Room(room_id), timestamp_ms);
    SignedRequest {
        room_id,
        address: address(keypair),
        signature: hex::encode(keypair.sign(message.as_bytes()).0),
        timestamp_ms,
    }
}

pub fn session_signature(keypair: &Keypair, timestamp_ms: i64) -> String {
    let message = signing_message(SignedScope::Session, timestamp_ms);
    format!("0x{}", hex::encode(keypair.sign(message.as_bytes()).0))
}

pub fn raw_event(variant: &str, fields: Vec<u8>) -> RawEvent {
    RawEvent {
        block_number: 1,
        pallet: PALLET.to_string(),
        variant: variant.to_string(),
        fields,
    }
}
