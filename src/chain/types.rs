//! Ledger projections and request types.

use crate::chain::error::ChainError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Room lifecycle status as stored by the livestream pallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomStatus {
    Preparing,
    Live,
    Paused,
    Ended,
    Banned,
}

impl RoomStatus {
    /// Decode the SCALE variant index. Unknown indices are a hard error.
    pub fn from_tag(tag: u8) -> Result<Self, ChainError> {
        match tag {
            0 => Ok(RoomStatus::Preparing),
            1 => Ok(RoomStatus::Live),
            2 => Ok(RoomStatus::Paused),
            3 => Ok(RoomStatus::Ended),
            4 => Ok(RoomStatus::Banned),
            other => Err(ChainError::DecodeError(format!(
                "unknown room status tag {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Preparing => "Preparing",
            RoomStatus::Live => "Live",
            RoomStatus::Paused => "Paused",
            RoomStatus::Ended => "Ended",
            RoomStatus::Banned => "Banned",
        }
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Preparing" => Ok(RoomStatus::Preparing),
            "Live" => Ok(RoomStatus::Live),
            "Paused" => Ok(RoomStatus::Paused),
            "Ended" => Ok(RoomStatus::Ended),
            "Banned" => Ok(RoomStatus::Banned),
            other => Err(format!("unknown room status {}", other)),
        }
    }
}

/// Room kind as stored by the livestream pallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomKind {
    Normal,
    Paid,
    Private,
    MultiHost,
}

impl RoomKind {
    /// Decode the SCALE variant index. Unknown indices are a hard error.
    pub fn from_tag(tag: u8) -> Result<Self, ChainError> {
        match tag {
            0 => Ok(RoomKind::Normal),
            1 => Ok(RoomKind::Paid),
            2 => Ok(RoomKind::Private),
            3 => Ok(RoomKind::MultiHost),
            other => Err(ChainError::DecodeError(format!(
                "unknown room kind tag {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoomKind::Normal => "Normal",
            RoomKind::Paid => "Paid",
            RoomKind::Private => "Private",
            RoomKind::MultiHost => "MultiHost",
        }
    }
}

impl fmt::Display for RoomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Normal" => Ok(RoomKind::Normal),
            "Paid" => Ok(RoomKind::Paid),
            "Private" => Ok(RoomKind::Private),
            "MultiHost" => Ok(RoomKind::MultiHost),
            other => Err(format!("unknown room kind {}", other)),
        }
    }
}

/// On-chain balance. Serialized as a decimal string so that JSON clients
/// never lose precision on u128 values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Amount(pub u128);

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<u128>()
            .map(Amount)
            .map_err(serde::de::Error::custom)
    }
}

/// Projection of a `LiveRooms` entry. Superseded wholesale on re-fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub id: u64,
    /// SS58 address of the host.
    pub host: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    pub kind: RoomKind,
    pub status: RoomStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cover_cid: Option<String>,
    pub total_viewers: u64,
    pub peak_viewers: u32,
    pub total_gifts: Amount,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ticket_price: Option<Amount>,
    /// Block numbers.
    pub created_at: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub started_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ended_at: Option<u64>,
}

/// Entry of the gift catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gift {
    pub id: u32,
    pub name: String,
    pub price: Amount,
    pub icon_cid: String,
    pub enabled: bool,
}

/// Filters and paging for the room listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomQuery {
    pub status: Option<RoomStatus>,
    pub kind: Option<RoomKind>,
    /// 1-based.
    pub page: u32,
    pub limit: u32,
}

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

impl Default for RoomQuery {
    fn default() -> Self {
        Self {
            status: None,
            kind: None,
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl RoomQuery {
    /// Clamp page and limit to their valid ranges.
    pub fn normalized(mut self) -> Self {
        self.page = self.page.max(1);
        self.limit = self.limit.clamp(1, MAX_PAGE_LIMIT);
        self
    }

    pub fn matches(&self, room: &RoomSnapshot) -> bool {
        self.status.map_or(true, |s| s == room.status) && self.kind.map_or(true, |k| k == room.kind)
    }
}

/// One page of the room listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomPage {
    pub rooms: Vec<RoomSnapshot>,
    pub total: usize,
    pub page: u32,
    pub limit: u32,
}

/// Role a media-session credential is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CredentialRole {
    Publisher,
    Viewer,
    #[serde(alias = "co-host", alias = "cohost")]
    CoHost,
}

impl fmt::Display for CredentialRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialRole::Publisher => f.write_str("publisher"),
            CredentialRole::Viewer => f.write_str("viewer"),
            CredentialRole::CoHost => f.write_str("coHost"),
        }
    }
}

/// Room-scoped, identity-bound, timestamped proof. Validated once and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedRequest {
    pub room_id: u64,
    /// SS58 address of the signer.
    pub address: String,
    /// Hex-encoded sr25519 signature, with or without `0x`.
    pub signature: String,
    pub timestamp_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_tags_are_exhaustive() {
        let decoded: Vec<RoomStatus> = (0..5).map(|t| RoomStatus::from_tag(t).unwrap()).collect();
        assert_eq!(
            decoded,
            vec![
                RoomStatus::Preparing,
                RoomStatus::Live,
                RoomStatus::Paused,
                RoomStatus::Ended,
                RoomStatus::Banned
            ]
        );
        assert!(matches!(
            RoomStatus::from_tag(5),
            Err(ChainError::DecodeError(_))
        ));
    }

    #[test]
    fn test_kind_tags_are_exhaustive() {
        assert_eq!(RoomKind::from_tag(1).unwrap(), RoomKind::Paid);
        assert_eq!(RoomKind::from_tag(3).unwrap(), RoomKind::MultiHost);
        assert!(RoomKind::from_tag(4).is_err());
    }

    #[test]
    fn test_amount_serializes_as_string() {
        let json = serde_json::to_string(&Amount(340282366920938463463374607431768211455)).unwrap();
        assert_eq!(json, "\"340282366920938463463374607431768211455\"");
        let back: Amount = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(back, Amount(42));
    }

    #[test]
    fn test_room_query_normalization() {
        let query = RoomQuery {
            page: 0,
            limit: 1000,
            ..RoomQuery::default()
        }
        .normalized();
        assert_eq!(query.page, 1);
        assert_eq!(query.limit, MAX_PAGE_LIMIT);
    }

    #[test]
    fn test_role_aliases() {
        let role: CredentialRole = serde_json::from_str("\"co-host\"").unwrap();
        assert_eq!(role, CredentialRole::CoHost);
        let role: CredentialRole = serde_json::from_str("\"viewer\"").unwrap();
        assert_eq!(role, CredentialRole::Viewer);
    }
}
