//! Error types for the ledger bridge and credential gateway.

use thiserror::Error;

/// Errors specific to ledger connectivity, queries and decoding.
///
/// `Clone` because a single in-flight connection attempt is shared by every
/// caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("Failed to connect to chain RPC at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Ledger query timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("RPC request failed: {0}")]
    RpcError(String),

    #[error("Failed to decode chain data: {0}")]
    DecodeError(String),

    #[error("Invalid account address: {0}")]
    InvalidAddress(String),
}

impl ChainError {
    /// True for every failure that means "the ledger could not answer",
    /// as opposed to "the ledger answered something we cannot read".
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ChainError::ConnectionFailed { .. }
                | ChainError::Unavailable(_)
                | ChainError::Timeout { .. }
                | ChainError::RpcError(_)
        )
    }
}

/// Errors related to cache backend operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis operation failed: {0}")]
    Redis(String),

    #[error("Cache entry could not be (de)serialized: {0}")]
    Serialization(String),

    #[error("Cache is in bypass mode")]
    Bypassed,
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        CacheError::Redis(e.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

/// Signature verification failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Signature expired: age {age_ms}ms exceeds {max_age_ms}ms")]
    Expired { age_ms: i64, max_age_ms: i64 },

    #[error("Invalid signature: {reason}")]
    Invalid { reason: String },
}

/// Rejections returned by credential issuance.
///
/// Every variant maps to a stable upper-snake code through [`IssueError::code`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IssueError {
    #[error("Signature expired")]
    SignatureExpired,

    #[error("Signature verification failed: {0}")]
    InvalidSignature(String),

    #[error("Room {room_id} not found")]
    RoomNotFound { room_id: u64 },

    #[error("You are not the host of this room")]
    NotRoomHost,

    #[error("Room is not available for streaming")]
    RoomNotAvailable,

    #[error("Room is not live")]
    RoomNotLive,

    #[error("You need to buy a ticket first")]
    TicketRequired,

    #[error("You are banned from this room")]
    ViewerBanned,

    #[error("You are not approved as co-host")]
    NotCoHost,

    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("Ledger data could not be decoded: {0}")]
    Decode(String),

    #[error("Media session provider failed: {0}")]
    Provider(String),
}

impl IssueError {
    pub fn code(&self) -> &'static str {
        match self {
            IssueError::SignatureExpired => "SIGNATURE_EXPIRED",
            IssueError::InvalidSignature(_) => "INVALID_SIGNATURE",
            IssueError::RoomNotFound { .. } => "ROOM_NOT_FOUND",
            IssueError::NotRoomHost => "NOT_ROOM_HOST",
            IssueError::RoomNotAvailable => "ROOM_NOT_AVAILABLE",
            IssueError::RoomNotLive => "ROOM_NOT_LIVE",
            IssueError::TicketRequired => "TICKET_REQUIRED",
            IssueError::ViewerBanned => "VIEWER_BANNED",
            IssueError::NotCoHost => "NOT_CO_HOST",
            IssueError::LedgerUnavailable(_) => "LEDGER_UNAVAILABLE",
            IssueError::Decode(_) => "DECODE_ERROR",
            IssueError::Provider(_) => "PROVIDER_FAILED",
        }
    }
}

impl From<AuthError> for IssueError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Expired { .. } => IssueError::SignatureExpired,
            AuthError::Invalid { reason } => IssueError::InvalidSignature(reason),
        }
    }
}

impl From<ChainError> for IssueError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::DecodeError(reason) => IssueError::Decode(reason),
            ChainError::InvalidAddress(reason) => IssueError::InvalidSignature(reason),
            other => IssueError::LedgerUnavailable(other.to_string()),
        }
    }
}
