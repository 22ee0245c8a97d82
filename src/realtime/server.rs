//! Websocket transport for the realtime hub.
//!
//! One task per connection runs a `select!` loop over inbound frames and the
//! connection's outbound hub channel. Text frames carry JSON control
//! messages; each gets exactly one reply on the same connection.

use crate::chain::cache::StateCache;
use crate::chain::client::LedgerClient;
use crate::chain::error::{ChainError, IssueError};
use crate::chain::issuer::CredentialIssuer;
use crate::chain::signature::{SignatureAuthenticator, SignedScope};
use crate::realtime::hub::{ConnectionId, PushMessage, RealtimeHub};
use crate::realtime::protocol::{error_reply, ok_reply, room_query, signed_request, ClientMessage};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_native_tls::TlsAcceptor;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] native_tls::Error),
}

trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub fn load_tls_acceptor(cert_path: &str, key_path: &str) -> Result<TlsAcceptor, TransportError> {
    let cert = std::fs::read(cert_path)?;
    let key = std::fs::read(key_path)?;

    let identity = native_tls::Identity::from_pkcs8(&cert, &key)?;
    let acceptor = native_tls::TlsAcceptor::new(identity)?;

    Ok(TlsAcceptor::from(acceptor))
}

/// Request handling shared by every connection.
pub struct Gateway {
    hub: Arc<RealtimeHub>,
    ledger: Arc<LedgerClient>,
    cache: Arc<StateCache>,
    authenticator: Arc<SignatureAuthenticator>,
    issuer: Arc<CredentialIssuer>,
}

fn ledger_error_reply(e: ChainError) -> PushMessage {
    let e = IssueError::from(e);
    error_reply(e.code(), e.to_string())
}

impl Gateway {
    pub fn new(
        hub: Arc<RealtimeHub>,
        ledger: Arc<LedgerClient>,
        cache: Arc<StateCache>,
        authenticator: Arc<SignatureAuthenticator>,
        issuer: Arc<CredentialIssuer>,
    ) -> Self {
        Self {
            hub,
            ledger,
            cache,
            authenticator,
            issuer,
        }
    }

    pub fn hub(&self) -> &Arc<RealtimeHub> {
        &self.hub
    }

    pub async fn handle_text(&self, id: ConnectionId, text: &str) -> PushMessage {
        match ClientMessage::parse(text) {
            Ok(message) => self.handle_control(id, message).await,
            Err(e) => {
                debug!("Connection {} sent an unreadable message: {}", id, e);
                error_reply("BAD_REQUEST", e.to_string())
            }
        }
    }

    pub async fn handle_control(&self, id: ConnectionId, message: ClientMessage) -> PushMessage {
        match message {
            ClientMessage::Authenticate {
                address,
                signature,
                timestamp,
            } => match self.authenticator.verify_scoped(
                SignedScope::Session,
                &address,
                &signature,
                timestamp,
            ) {
                Ok(account) => {
                    let identity = account.to_string();
                    self.hub.on_authenticate(id, &identity).await;
                    PushMessage::new("authenticated", json!({ "address": identity }))
                }
                Err(e) => {
                    let e = IssueError::from(e);
                    error_reply(e.code(), e.to_string())
                }
            },
            ClientMessage::Join { room_id } => {
                self.hub.on_join_room(id, room_id).await;
                ok_reply("join")
            }
            ClientMessage::Leave { room_id } => {
                self.hub.on_leave_room(id, room_id).await;
                ok_reply("leave")
            }
            ClientMessage::Credential {
                role,
                room_id,
                address,
                signature,
                timestamp,
            } => {
                let request = signed_request(room_id, address, signature, timestamp);
                match self.issuer.issue(role, &request).await {
                    Ok(credential) => PushMessage::new("credential", json!(credential)),
                    Err(e) => {
                        info!("Credential for room {} rejected: {}", room_id, e.code());
                        error_reply(e.code(), e.to_string())
                    }
                }
            }
            ClientMessage::ViewerLeave {
                room_id,
                address,
                signature,
                timestamp,
            } => {
                let request = signed_request(room_id, address, signature, timestamp);
                match self.issuer.viewer_leave(&request).await {
                    Ok(viewers) => PushMessage::new(
                        "ok",
                        json!({ "action": "viewerLeave", "roomId": room_id, "viewers": viewers }),
                    ),
                    Err(e) => error_reply(e.code(), e.to_string()),
                }
            }
            ClientMessage::Room { room_id } => match self.ledger.room(room_id).await {
                Ok(Some(room)) => {
                    let viewers = self.cache.viewer_count(room_id).await;
                    PushMessage::new("room", json!({ "room": room, "liveViewers": viewers }))
                }
                Ok(None) => {
                    let e = IssueError::RoomNotFound { room_id };
                    error_reply(e.code(), e.to_string())
                }
                Err(e) => ledger_error_reply(e),
            },
            ClientMessage::Rooms {
                status,
                kind,
                page,
                limit,
            } => match self.ledger.rooms(room_query(status, kind, page, limit)).await {
                Ok(page) => {
                    let mut rooms = Vec::with_capacity(page.rooms.len());
                    for room in &page.rooms {
                        let mut entry = json!(room);
                        entry["liveViewers"] = json!(self.cache.viewer_count(room.id).await);
                        rooms.push(entry);
                    }
                    PushMessage::new(
                        "rooms",
                        json!({
                            "rooms": rooms,
                            "total": page.total,
                            "page": page.page,
                            "limit": page.limit,
                        }),
                    )
                }
                Err(e) => ledger_error_reply(e),
            },
            ClientMessage::Gifts => match self.ledger.gift_catalog().await {
                Ok(gifts) => PushMessage::new("gifts", json!({ "gifts": gifts })),
                Err(e) => ledger_error_reply(e),
            },
            ClientMessage::Earnings { address } => match self.ledger.host_earnings(&address).await {
                Ok(amount) => PushMessage::new(
                    "earnings",
                    json!({ "address": address, "amount": amount }),
                ),
                Err(e) => ledger_error_reply(e),
            },
        }
    }
}

/// Accept connections until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    gateway: Arc<Gateway>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Realtime listener stopped accepting connections");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                };
                let tls_acceptor = tls_acceptor.clone();
                let gateway = gateway.clone();

                tokio::spawn(async move {
                    let stream: Box<dyn AsyncStream> = if let Some(tls_acceptor) = tls_acceptor {
                        match tls_acceptor.accept(stream).await {
                            Ok(tls_stream) => Box::new(tls_stream),
                            Err(e) => {
                                warn!("TLS handshake with {} failed: {}", peer, e);
                                return;
                            }
                        }
                    } else {
                        Box::new(stream)
                    };

                    match tokio_tungstenite::accept_async(stream).await {
                        Ok(ws_stream) => handle_websocket(ws_stream, gateway).await,
                        Err(e) => warn!("Websocket handshake with {} failed: {}", peer, e),
                    }
                });
            }
        }
    }
}

async fn send_push<S>(ws_stream: &mut WebSocketStream<S>, message: &PushMessage) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to serialize {}: {}", message.event, e);
            return true;
        }
    };
    ws_stream.send(Message::Text(text)).await.is_ok()
}

pub async fn handle_websocket<S>(mut ws_stream: WebSocketStream<S>, gateway: Arc<Gateway>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (id, mut outgoing_rx) = gateway.hub.on_connect().await;

    loop {
        tokio::select! {
            incoming = ws_stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let reply = gateway.handle_text(id, &text).await;
                        if !send_push(&mut ws_stream, &reply).await {
                            warn!("Failed to send reply to connection {}", id);
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Connection {} read error: {}", id, e);
                        break;
                    }
                    None => break,
                }
            }
            outgoing = outgoing_rx.recv() => {
                match outgoing {
                    Some(message) => {
                        if !send_push(&mut ws_stream, &message).await {
                            warn!("Failed to push {} to connection {}", message.event, id);
                            break;
                        }
                    }
                    None => {
                        let _ = ws_stream.close(None).await;
                        break;
                    }
                }
            }
        }
    }

    gateway.hub.on_disconnect(id).await;
}
