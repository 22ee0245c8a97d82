//! External media-session provider.
//!
//! The gateway never touches media transport; it only asks the provider for
//! a role-scoped, time-boxed credential that the provider enforces on its own.

pub mod livekit;

use crate::chain::types::CredentialRole;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use livekit::LiveKitProvider;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Failed to sign media credential: {0}")]
    Signing(String),

    #[error("Media provider misconfigured: {0}")]
    Config(String),
}

/// Capabilities granted inside one media session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub join: bool,
    pub publish: bool,
    pub subscribe: bool,
    pub publish_data: bool,
}

impl Capabilities {
    pub fn for_role(role: CredentialRole) -> Self {
        match role {
            CredentialRole::Publisher | CredentialRole::CoHost => Capabilities {
                join: true,
                publish: true,
                subscribe: true,
                publish_data: true,
            },
            CredentialRole::Viewer => Capabilities {
                join: true,
                publish: false,
                subscribe: true,
                publish_data: true,
            },
        }
    }
}

/// Name of the media session backing a room.
pub fn session_name(room_id: u64) -> String {
    format!("room-{}", room_id)
}

/// What the gateway asks the provider for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaGrant {
    pub identity: String,
    pub room_id: u64,
    pub role: CredentialRole,
    pub capabilities: Capabilities,
}

impl MediaGrant {
    pub fn new(role: CredentialRole, room_id: u64, identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            room_id,
            role,
            capabilities: Capabilities::for_role(role),
        }
    }

    pub fn session_name(&self) -> String {
        session_name(self.room_id)
    }
}

/// A credential handed back to the caller. Not stored by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCredential {
    #[serde(rename = "token")]
    pub credential: String,
    #[serde(rename = "url")]
    pub media_server_url: String,
    #[serde(rename = "roomName")]
    pub session_name: String,
    pub identity: String,
    pub room_id: u64,
    pub capabilities: Capabilities,
    #[serde(rename = "expiresAt")]
    pub expires_at_ms: i64,
}

#[async_trait]
pub trait MediaSessionProvider: Send + Sync {
    async fn issue(&self, grant: &MediaGrant) -> Result<IssuedCredential, ProviderError>;

    fn server_url(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_capabilities() {
        let viewer = Capabilities::for_role(CredentialRole::Viewer);
        assert!(viewer.join && viewer.subscribe && viewer.publish_data);
        assert!(!viewer.publish);

        let publisher = Capabilities::for_role(CredentialRole::Publisher);
        assert_eq!(publisher, Capabilities::for_role(CredentialRole::CoHost));
        assert!(publisher.publish);
    }

    #[test]
    fn test_session_name() {
        assert_eq!(MediaGrant::new(CredentialRole::Viewer, 7, "x").session_name(), "room-7");
    }
}
