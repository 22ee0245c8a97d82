//! Ledger event dispatcher.
//!
//! Drains the block event subscription of the livestream pallet, keeps the
//! [`StateCache`] consistent with what each event changed and fans the
//! events out to realtime clients. Events are handled one at a time in
//! delivery order; a failing or panicking handler is logged and skipped.

use crate::chain::cache::StateCache;
use crate::chain::client::LedgerClient;
use crate::chain::error::{CacheError, ChainError};
use crate::chain::events::LedgerEvent;
use crate::chain::node::{EventBatchStream, RawEvent};
use crate::realtime::RealtimeHub;
use futures_util::{FutureExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Stopped,
    Subscribing,
    Listening,
}

impl DispatcherState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => DispatcherState::Subscribing,
            2 => DispatcherState::Listening,
            _ => DispatcherState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            DispatcherState::Stopped => 0,
            DispatcherState::Subscribing => 1,
            DispatcherState::Listening => 2,
        }
    }
}

struct Listener {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct LedgerEventDispatcher {
    ledger: Arc<LedgerClient>,
    cache: Arc<StateCache>,
    hub: Arc<RealtimeHub>,
    pallet: String,
    state: AtomicU8,
    listener: Mutex<Option<Listener>>,
}

impl LedgerEventDispatcher {
    pub fn new(ledger: Arc<LedgerClient>, cache: Arc<StateCache>, hub: Arc<RealtimeHub>) -> Self {
        let pallet = ledger.keys().pallet().to_string();
        Self {
            ledger,
            cache,
            hub,
            pallet,
            state: AtomicU8::new(DispatcherState::Stopped.as_u8()),
            listener: Mutex::new(None),
        }
    }

    pub fn state(&self) -> DispatcherState {
        DispatcherState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: DispatcherState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Open the event subscription and start the receive loop. A no-op
    /// while a loop is already running.
    pub async fn start_listening(self: &Arc<Self>) -> Result<(), ChainError> {
        let mut listener = self.listener.lock().await;
        if let Some(running) = listener.as_ref() {
            if !running.handle.is_finished() {
                debug!("Event dispatcher already listening");
                return Ok(());
            }
        }

        self.set_state(DispatcherState::Subscribing);
        let stream = match self.subscribe().await {
            Ok(stream) => stream,
            Err(e) => {
                self.set_state(DispatcherState::Stopped);
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        self.set_state(DispatcherState::Listening);
        let this = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { this.run(stream, token).await });
        *listener = Some(Listener { cancel, handle });

        info!("Listening for {} events", self.pallet);
        Ok(())
    }

    /// Cancel the subscription and wait for the receive loop to exit.
    /// Idempotent.
    pub async fn stop_listening(&self) {
        let running = self.listener.lock().await.take();
        if let Some(listener) = running {
            listener.cancel.cancel();
            if let Err(e) = listener.handle.await {
                error!("Event dispatcher task failed: {}", e);
            }
            info!("Stopped listening for {} events", self.pallet);
        }
        self.set_state(DispatcherState::Stopped);
    }

    async fn subscribe(&self) -> Result<EventBatchStream, ChainError> {
        let handle = self.ledger.connect().await?;
        handle.subscribe_events().await
    }

    async fn run(self: Arc<Self>, mut stream: EventBatchStream, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Event subscription cancelled");
                    return;
                }
                next = stream.next() => match next {
                    Some(Ok(batch)) => {
                        for raw in &batch {
                            self.dispatch_raw(raw).await;
                        }
                    }
                    Some(Err(e)) if !e.is_unavailable() => {
                        error!("Skipping undecodable block events: {}", e);
                    }
                    Some(Err(e)) => {
                        error!("Event subscription failed: {}", e);
                        break;
                    }
                    None => {
                        warn!("Event subscription ended");
                        break;
                    }
                }
            }
        }
        self.ledger.mark_disconnected().await;
        self.set_state(DispatcherState::Stopped);
    }

    /// Filter to the pallet and decode. Other pallets and unknown variants
    /// are ignored.
    pub async fn dispatch_raw(&self, raw: &RawEvent) {
        if raw.pallet != self.pallet {
            return;
        }
        match LedgerEvent::decode(&raw.variant, &raw.fields) {
            Ok(Some(event)) => self.dispatch(event).await,
            Ok(None) => debug!("Ignoring {}.{}", raw.pallet, raw.variant),
            Err(e) => error!(
                "Failed to decode {}.{} in block {}: {} (0x{})",
                raw.pallet,
                raw.variant,
                raw.block_number,
                e,
                hex::encode(&raw.fields)
            ),
        }
    }

    /// Run the handler for one event, containing any failure.
    pub async fn dispatch(&self, event: LedgerEvent) {
        debug!("Dispatching {:?}", event);
        match AssertUnwindSafe(self.handle(&event)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Handler for {} failed: {} ({:?})", event.name(), e, event),
            Err(_) => error!("Handler for {} panicked ({:?})", event.name(), event),
        }
    }

    async fn handle(&self, event: &LedgerEvent) -> Result<(), CacheError> {
        match event {
            LedgerEvent::RoomCreated { host, room_id, kind } => {
                self.hub
                    .broadcast_to_all(
                        "room:created",
                        json!({ "roomId": room_id, "host": host, "roomType": kind }),
                    )
                    .await;
                Ok(())
            }
            LedgerEvent::LiveStarted { room_id, started_at } => {
                let result = self.cache.invalidate_room(*room_id).await;
                self.hub
                    .broadcast_to_room(
                        *room_id,
                        "live:started",
                        json!({ "roomId": room_id, "startedAt": started_at }),
                    )
                    .await;
                self.hub
                    .broadcast_to_all("room:live", json!({ "roomId": room_id }))
                    .await;
                result
            }
            LedgerEvent::LivePaused { room_id } => {
                let result = self.cache.invalidate_room(*room_id).await;
                self.hub
                    .broadcast_to_room(*room_id, "live:paused", json!({ "roomId": room_id }))
                    .await;
                result
            }
            LedgerEvent::LiveResumed { room_id } => {
                let result = self.cache.invalidate_room(*room_id).await;
                self.hub
                    .broadcast_to_room(*room_id, "live:resumed", json!({ "roomId": room_id }))
                    .await;
                result
            }
            LedgerEvent::LiveEnded {
                room_id,
                duration,
                total_viewers,
                peak_viewers,
                total_gifts,
            } => {
                let result = self
                    .cache
                    .invalidate_room(*room_id)
                    .await
                    .and(self.cache.reset_viewers(*room_id).await);
                self.hub
                    .broadcast_to_room(
                        *room_id,
                        "live:ended",
                        json!({
                            "roomId": room_id,
                            "duration": duration,
                            "totalViewers": total_viewers,
                            "peakViewers": peak_viewers,
                            "totalGifts": total_gifts,
                        }),
                    )
                    .await;
                result
            }
            LedgerEvent::RoomUpdated { room_id } | LedgerEvent::LiveStatsSynced { room_id, .. } => {
                self.cache.invalidate_room(*room_id).await
            }
            LedgerEvent::TicketPurchased {
                room_id,
                buyer,
                price,
            } => {
                self.hub
                    .notify_identity(
                        buyer,
                        "ticket:purchased",
                        json!({ "roomId": room_id, "price": price }),
                    )
                    .await;
                Ok(())
            }
            LedgerEvent::GiftSent {
                room_id,
                sender,
                receiver,
                gift_id,
                quantity,
                value,
            } => {
                let result = self.cache.invalidate_room(*room_id).await;
                self.hub
                    .broadcast_to_room(
                        *room_id,
                        "gift:received",
                        json!({
                            "roomId": room_id,
                            "sender": sender,
                            "receiver": receiver,
                            "giftId": gift_id,
                            "quantity": quantity,
                            "value": value,
                        }),
                    )
                    .await;
                result
            }
            LedgerEvent::ViewerKicked { room_id, viewer } => {
                // The new value is known, so write it instead of invalidating.
                let result = self.cache.set_ban_flag(*room_id, viewer, true).await;
                self.hub
                    .notify_identity(
                        viewer,
                        "viewer:kicked",
                        json!({
                            "roomId": room_id,
                            "message": "You have been kicked from the room",
                        }),
                    )
                    .await;
                result
            }
            LedgerEvent::ViewerUnbanned { room_id, viewer } => {
                self.cache.set_ban_flag(*room_id, viewer, false).await
            }
            LedgerEvent::RoomBanned { room_id, reason } => {
                let result = self.cache.invalidate_room(*room_id).await;
                self.hub
                    .broadcast_to_room(
                        *room_id,
                        "room:banned",
                        json!({ "roomId": room_id, "reason": reason }),
                    )
                    .await;
                result
            }
            LedgerEvent::CoHostStarted { room_id, co_host } => {
                let result = self.cache.invalidate_co_hosts(*room_id).await;
                self.hub
                    .broadcast_to_room(
                        *room_id,
                        "cohost:started",
                        json!({ "roomId": room_id, "coHost": co_host }),
                    )
                    .await;
                result
            }
            LedgerEvent::CoHostEnded { room_id, co_host } => {
                let result = self.cache.invalidate_co_hosts(*room_id).await;
                self.hub
                    .broadcast_to_room(
                        *room_id,
                        "cohost:ended",
                        json!({ "roomId": room_id, "coHost": co_host }),
                    )
                    .await;
                result
            }
            LedgerEvent::GiftCreated { .. } | LedgerEvent::GiftUpdated { .. } => {
                self.cache.invalidate_gift_catalog().await
            }
        }
    }
}

impl std::fmt::Debug for LedgerEventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerEventDispatcher")
            .field("pallet", &self.pallet)
            .field("state", &self.state())
            .finish()
    }
}
