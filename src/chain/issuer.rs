//! Media-session credential issuance.
//!
//! Every request is checked in a fixed order and stops at the first failure:
//! signature, room existence, then the role's authorization rules. Only a
//! request that passes all of them reaches the media-session provider.

use crate::chain::cache::StateCache;
use crate::chain::client::LedgerClient;
use crate::chain::error::IssueError;
use crate::chain::signature::SignatureAuthenticator;
use crate::chain::types::{CredentialRole, RoomKind, RoomSnapshot, RoomStatus, SignedRequest};
use crate::media::{IssuedCredential, MediaGrant, MediaSessionProvider};
use log::{info, warn};
use std::sync::Arc;

pub struct CredentialIssuer {
    authenticator: Arc<SignatureAuthenticator>,
    ledger: Arc<LedgerClient>,
    cache: Arc<StateCache>,
    provider: Arc<dyn MediaSessionProvider>,
}

impl CredentialIssuer {
    pub fn new(
        authenticator: Arc<SignatureAuthenticator>,
        ledger: Arc<LedgerClient>,
        cache: Arc<StateCache>,
        provider: Arc<dyn MediaSessionProvider>,
    ) -> Self {
        Self {
            authenticator,
            ledger,
            cache,
            provider,
        }
    }

    pub async fn issue(
        &self,
        role: CredentialRole,
        request: &SignedRequest,
    ) -> Result<IssuedCredential, IssueError> {
        let account = self.authenticator.verify(
            request.room_id,
            &request.address,
            &request.signature,
            request.timestamp_ms,
        )?;
        let identity = account.to_string();

        let room = self
            .ledger
            .room(request.room_id)
            .await?
            .ok_or(IssueError::RoomNotFound {
                room_id: request.room_id,
            })?;

        match role {
            CredentialRole::Publisher => self.authorize_publisher(&room, &identity)?,
            CredentialRole::Viewer => self.authorize_viewer(&room, &identity).await?,
            CredentialRole::CoHost => self.authorize_co_host(&room, &identity).await?,
        }

        let grant = MediaGrant::new(role, room.id, identity);
        let credential = self
            .provider
            .issue(&grant)
            .await
            .map_err(|e| IssueError::Provider(e.to_string()))?;

        if role == CredentialRole::Viewer {
            match self.cache.increment_viewers(room.id).await {
                Ok(count) => info!("Room {} now has {} live viewers", room.id, count),
                Err(e) => warn!("Viewer counter for room {} not updated: {}", room.id, e),
            }
        }

        info!(
            "Issued {} credential for room {} to {}",
            role, room.id, grant.identity
        );
        Ok(credential)
    }

    /// A viewer leaving the media session. Returns the updated live count.
    pub async fn viewer_leave(&self, request: &SignedRequest) -> Result<u64, IssueError> {
        self.authenticator.verify(
            request.room_id,
            &request.address,
            &request.signature,
            request.timestamp_ms,
        )?;
        match self.cache.decrement_viewers(request.room_id).await {
            Ok(count) => Ok(count),
            Err(e) => {
                warn!("Viewer counter for room {} not updated: {}", request.room_id, e);
                Ok(self.cache.viewer_count(request.room_id).await)
            }
        }
    }

    fn authorize_publisher(&self, room: &RoomSnapshot, identity: &str) -> Result<(), IssueError> {
        if room.host != identity {
            return Err(IssueError::NotRoomHost);
        }
        if !matches!(room.status, RoomStatus::Preparing | RoomStatus::Live) {
            return Err(IssueError::RoomNotAvailable);
        }
        Ok(())
    }

    // A cached ban flag rejects before the ticket lookup reaches the ledger.
    async fn authorize_viewer(&self, room: &RoomSnapshot, identity: &str) -> Result<(), IssueError> {
        if room.status != RoomStatus::Live {
            return Err(IssueError::RoomNotLive);
        }
        if self.ledger.is_banned(room.id, identity).await? {
            return Err(IssueError::ViewerBanned);
        }
        if room.kind == RoomKind::Paid && !self.ledger.has_ticket(room.id, identity).await? {
            return Err(IssueError::TicketRequired);
        }
        Ok(())
    }

    async fn authorize_co_host(&self, room: &RoomSnapshot, identity: &str) -> Result<(), IssueError> {
        if room.status != RoomStatus::Live {
            return Err(IssueError::RoomNotLive);
        }
        if !self.ledger.is_co_host(room.id, identity).await? {
            return Err(IssueError::NotCoHost);
        }
        Ok(())
    }
}

impl std::fmt::Debug for CredentialIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialIssuer")
            .field("media_server", &self.provider.server_url())
            .finish()
    }
}
