//! Ledger bridge for the livestream pallet.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────────┐
//! │ LedgerClient │────▶│  StateCache  │◀────│ EventDispatcher  │
//! │   (subxt)    │     │ (redis/mem)  │     │  (block events)  │
//! └──────────────┘     └──────────────┘     └──────────────────┘
//!        │                                          │
//!        ▼                                          ▼
//! ┌──────────────────┐                     ┌─────────────────┐
//! │ CredentialIssuer │                     │   RealtimeHub   │
//! │ (sr25519 + auth) │                     │   (websocket)   │
//! └──────────────────┘                     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use livegate::chain::{LedgerClient, StateCache, StorageKeys, SubstrateNode};
//!
//! let cache = Arc::new(StateCache::new(backend, "stardust:", clock));
//! let ledger = Arc::new(LedgerClient::new(
//!     Arc::new(SubstrateNode::new("ws://127.0.0.1:9944")),
//!     cache.clone(),
//!     StorageKeys::new("Livestream"),
//!     Duration::from_secs(10),
//! ));
//!
//! if let Some(room) = ledger.room(7).await? {
//!     println!("{} is {}", room.title, room.status);
//! }
//! ```

pub mod backend;
pub mod cache;
pub mod client;
pub mod codec;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod issuer;
pub mod node;
pub mod signature;
pub mod types;

pub use backend::{CacheBackend, MemoryBackend, RedisBackend};
pub use cache::{Namespace, StateCache};
pub use client::{LedgerClient, LedgerHandle};
pub use codec::StorageKeys;
pub use dispatcher::{DispatcherState, LedgerEventDispatcher};
pub use error::{AuthError, CacheError, ChainError, IssueError};
pub use events::LedgerEvent;
pub use issuer::CredentialIssuer;
pub use node::{LedgerConnection, LedgerNode, RawEvent, SubstrateNode};
pub use signature::SignatureAuthenticator;
pub use types::{Amount, CredentialRole, Gift, RoomKind, RoomPage, RoomQuery, RoomSnapshot, RoomStatus, SignedRequest};
