//! JSON control messages exchanged over the realtime transport.

use crate::chain::types::{CredentialRole, RoomKind, RoomQuery, RoomStatus, SignedRequest, DEFAULT_PAGE_LIMIT};
use crate::realtime::hub::PushMessage;
use serde::Deserialize;
use serde_json::json;

/// Messages a client may send. Tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Bind this connection to an identity. The signature covers
    /// `livestream:session:{timestamp}`.
    Authenticate {
        address: String,
        signature: String,
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    Join { room_id: u64 },
    #[serde(rename_all = "camelCase")]
    Leave { room_id: u64 },
    #[serde(rename_all = "camelCase")]
    Credential {
        role: CredentialRole,
        room_id: u64,
        address: String,
        signature: String,
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    ViewerLeave {
        room_id: u64,
        address: String,
        signature: String,
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    Room { room_id: u64 },
    Rooms {
        status: Option<RoomStatus>,
        kind: Option<RoomKind>,
        page: Option<u32>,
        limit: Option<u32>,
    },
    Gifts,
    Earnings { address: String },
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

pub fn signed_request(room_id: u64, address: String, signature: String, timestamp_ms: i64) -> SignedRequest {
    SignedRequest {
        room_id,
        address,
        signature,
        timestamp_ms,
    }
}

pub fn room_query(
    status: Option<RoomStatus>,
    kind: Option<RoomKind>,
    page: Option<u32>,
    limit: Option<u32>,
) -> RoomQuery {
    RoomQuery {
        status,
        kind,
        page: page.unwrap_or(1),
        limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT),
    }
    .normalized()
}

pub fn ok_reply(action: &str) -> PushMessage {
    PushMessage::new("ok", json!({ "action": action }))
}

pub fn error_reply(code: &str, message: impl Into<String>) -> PushMessage {
    PushMessage::new(
        "error",
        json!({ "code": code, "message": message.into() }),
    )
}
