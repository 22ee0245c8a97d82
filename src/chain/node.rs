//! Transport seam between the ledger client and a Substrate node.
//!
//! [`LedgerNode`] opens connections, [`LedgerConnection`] serves raw storage
//! reads and the block event stream. [`SubstrateNode`] is the subxt-backed
//! implementation used in production.

use crate::chain::error::ChainError;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use subxt::{OnlineClient, SubstrateConfig};

/// A pallet event as it came off the chain, fields still SCALE-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub block_number: u64,
    pub pallet: String,
    pub variant: String,
    pub fields: Vec<u8>,
}

/// Events of one block, in block order.
pub type EventBatchStream = BoxStream<'static, Result<Vec<RawEvent>, ChainError>>;

/// A live connection to a ledger node.
#[async_trait]
pub trait LedgerConnection: Send + Sync {
    /// Read a raw storage value at the latest block.
    async fn fetch_raw(&self, key: Vec<u8>) -> Result<Option<Vec<u8>>, ChainError>;

    /// Open a block event subscription. The stream ends when the
    /// connection drops.
    async fn subscribe_events(&self) -> Result<EventBatchStream, ChainError>;

    fn is_connected(&self) -> bool;
}

/// Factory for ledger connections.
#[async_trait]
pub trait LedgerNode: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn LedgerConnection>, ChainError>;

    fn endpoint(&self) -> &str;
}

/// Substrate node reached over websocket RPC.
#[derive(Debug, Clone)]
pub struct SubstrateNode {
    rpc_url: String,
}

impl SubstrateNode {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
        }
    }
}

#[async_trait]
impl LedgerNode for SubstrateNode {
    async fn connect(&self) -> Result<Arc<dyn LedgerConnection>, ChainError> {
        info!("Connecting to chain RPC at {}", self.rpc_url);

        let client = OnlineClient::<SubstrateConfig>::from_url(&self.rpc_url)
            .await
            .map_err(|e| ChainError::ConnectionFailed {
                url: self.rpc_url.clone(),
                reason: e.to_string(),
            })?;

        info!(
            "Connected to chain at {} (spec version {})",
            self.rpc_url,
            client.runtime_version().spec_version
        );

        Ok(Arc::new(SubstrateConnection {
            client,
            connected: Arc::new(AtomicBool::new(true)),
        }))
    }

    fn endpoint(&self) -> &str {
        &self.rpc_url
    }
}

/// subxt client plus a liveness flag flipped on transport failures.
pub struct SubstrateConnection {
    client: OnlineClient<SubstrateConfig>,
    connected: Arc<AtomicBool>,
}

impl SubstrateConnection {
    fn rpc_failure(&self, e: subxt::Error) -> ChainError {
        if matches!(e, subxt::Error::Rpc(_)) {
            warn!("Chain RPC transport failed, marking connection lost: {}", e);
            self.connected.store(false, Ordering::SeqCst);
            ChainError::Unavailable(e.to_string())
        } else {
            ChainError::RpcError(e.to_string())
        }
    }
}

#[async_trait]
impl LedgerConnection for SubstrateConnection {
    async fn fetch_raw(&self, key: Vec<u8>) -> Result<Option<Vec<u8>>, ChainError> {
        let storage = self
            .client
            .storage()
            .at_latest()
            .await
            .map_err(|e| self.rpc_failure(e))?;

        debug!("Fetching storage key 0x{}", hex::encode(&key));

        storage.fetch_raw(key).await.map_err(|e| self.rpc_failure(e))
    }

    async fn subscribe_events(&self) -> Result<EventBatchStream, ChainError> {
        let blocks = self
            .client
            .blocks()
            .subscribe_best()
            .await
            .map_err(|e| self.rpc_failure(e))?;

        let connected = self.connected.clone();
        let stream = blocks
            .then(move |block| {
                let connected = connected.clone();
                async move {
                    let block = match block {
                        Ok(block) => block,
                        Err(e) => {
                            connected.store(false, Ordering::SeqCst);
                            return Err(ChainError::Unavailable(e.to_string()));
                        }
                    };
                    let block_number: u64 = block.number().into();
                    let events = block
                        .events()
                        .await
                        .map_err(|e| ChainError::RpcError(e.to_string()))?;

                    let mut batch = Vec::new();
                    for event in events.iter() {
                        let event = event.map_err(|e| ChainError::DecodeError(e.to_string()))?;
                        batch.push(RawEvent {
                            block_number,
                            pallet: event.pallet_name().to_string(),
                            variant: event.variant_name().to_string(),
                            fields: event.field_bytes().to_vec(),
                        });
                    }
                    Ok(batch)
                }
            })
            .boxed();

        Ok(stream)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
