//! LiveKit access tokens.
//!
//! A LiveKit token is an HS256 JWT signed with the API secret, carrying the
//! API key as issuer, the participant identity as subject and a `video`
//! grant describing what the participant may do in one room.

use crate::clock::Clock;
use crate::media::{IssuedCredential, MediaGrant, MediaSessionProvider, ProviderError};
use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrant {
    pub room: String,
    pub room_join: bool,
    pub can_publish: bool,
    pub can_subscribe: bool,
    pub can_publish_data: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub iss: String,
    pub sub: String,
    pub name: String,
    pub nbf: i64,
    pub exp: i64,
    pub video: VideoGrant,
}

pub struct LiveKitProvider {
    server_url: String,
    api_key: String,
    api_secret: String,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl LiveKitProvider {
    pub fn new(
        server_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        let api_secret = api_secret.into();
        if api_key.is_empty() || api_secret.is_empty() {
            return Err(ProviderError::Config(
                "LiveKit API key and secret are required".to_string(),
            ));
        }
        Ok(Self {
            server_url: server_url.into(),
            api_key,
            api_secret,
            ttl,
            clock,
        })
    }

    fn claims(&self, grant: &MediaGrant, now_secs: i64) -> AccessClaims {
        AccessClaims {
            iss: self.api_key.clone(),
            sub: grant.identity.clone(),
            name: grant.identity.clone(),
            nbf: now_secs,
            exp: now_secs + self.ttl.as_secs() as i64,
            video: VideoGrant {
                room: grant.session_name(),
                room_join: grant.capabilities.join,
                can_publish: grant.capabilities.publish,
                can_subscribe: grant.capabilities.subscribe,
                can_publish_data: grant.capabilities.publish_data,
            },
        }
    }
}

#[async_trait]
impl MediaSessionProvider for LiveKitProvider {
    async fn issue(&self, grant: &MediaGrant) -> Result<IssuedCredential, ProviderError> {
        let now_secs = self.clock.now_ms() / 1000;
        let claims = self.claims(grant, now_secs);
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.api_secret.as_bytes()),
        )
        .map_err(|e| ProviderError::Signing(e.to_string()))?;

        debug!(
            "Minted {} credential for {} in {}",
            grant.role, grant.identity, claims.video.room
        );

        Ok(IssuedCredential {
            credential: token,
            media_server_url: self.server_url.clone(),
            session_name: claims.video.room,
            identity: grant.identity.clone(),
            room_id: grant.room_id,
            capabilities: grant.capabilities,
            expires_at_ms: claims.exp * 1000,
        })
    }

    fn server_url(&self) -> &str {
        &self.server_url
    }
}

impl std::fmt::Debug for LiveKitProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveKitProvider")
            .field("server_url", &self.server_url)
            .field("api_key", &self.api_key)
            .field("ttl", &self.ttl)
            .finish()
    }
}
