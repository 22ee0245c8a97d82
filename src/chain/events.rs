//! Livestream pallet events.
//!
//! [`wire`] mirrors the SCALE field layout of each event variant;
//! [`LedgerEvent`] is the decoded, address-rendered form the dispatcher
//! routes on.

use crate::chain::codec::account_to_address;
use crate::chain::error::ChainError;
use crate::chain::types::{Amount, RoomKind};
use scale::DecodeAll;

/// SCALE layouts of the pallet's event fields, in declaration order.
pub mod wire {
    use scale::{Decode, Encode};

    #[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
    pub struct RoomCreated {
        pub host: [u8; 32],
        pub room_id: u64,
        pub room_type: u8,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
    pub struct LiveStarted {
        pub room_id: u64,
        pub started_at: u32,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
    pub struct RoomOnly {
        pub room_id: u64,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
    pub struct LiveEnded {
        pub room_id: u64,
        pub duration: u64,
        pub total_viewers: u64,
        pub peak_viewers: u32,
        pub total_gifts: u128,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
    pub struct TicketPurchased {
        pub room_id: u64,
        pub buyer: [u8; 32],
        pub price: u128,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
    pub struct GiftSent {
        pub room_id: u64,
        pub sender: [u8; 32],
        pub receiver: [u8; 32],
        pub gift_id: u32,
        pub quantity: u32,
        pub value: u128,
    }

    /// Shared by `ViewerKicked`, `ViewerUnbanned`, `CoHostStarted`, `CoHostEnded`.
    #[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
    pub struct RoomMember {
        pub room_id: u64,
        pub account: [u8; 32],
    }

    #[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
    pub struct RoomBanned {
        pub room_id: u64,
        pub reason: Vec<u8>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
    pub struct GiftCreated {
        pub gift_id: u32,
        pub price: u128,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
    pub struct GiftUpdated {
        pub gift_id: u32,
        pub enabled: bool,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
    pub struct LiveStatsSynced {
        pub room_id: u64,
        pub total_viewers: u64,
        pub peak_viewers: u32,
    }
}

/// A decoded event the dispatcher acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    RoomCreated { host: String, room_id: u64, kind: RoomKind },
    LiveStarted { room_id: u64, started_at: u64 },
    LivePaused { room_id: u64 },
    LiveResumed { room_id: u64 },
    LiveEnded {
        room_id: u64,
        duration: u64,
        total_viewers: u64,
        peak_viewers: u32,
        total_gifts: Amount,
    },
    RoomUpdated { room_id: u64 },
    TicketPurchased { room_id: u64, buyer: String, price: Amount },
    GiftSent {
        room_id: u64,
        sender: String,
        receiver: String,
        gift_id: u32,
        quantity: u32,
        value: Amount,
    },
    ViewerKicked { room_id: u64, viewer: String },
    ViewerUnbanned { room_id: u64, viewer: String },
    RoomBanned { room_id: u64, reason: String },
    CoHostStarted { room_id: u64, co_host: String },
    CoHostEnded { room_id: u64, co_host: String },
    GiftCreated { gift_id: u32 },
    GiftUpdated { gift_id: u32, enabled: bool },
    LiveStatsSynced {
        room_id: u64,
        total_viewers: u64,
        peak_viewers: u32,
    },
}

fn fields<T: DecodeAll>(variant: &str, data: &[u8]) -> Result<T, ChainError> {
    T::decode_all(&mut &data[..]).map_err(|e| {
        ChainError::DecodeError(format!("{} fields ({}): 0x{}", variant, e, hex::encode(data)))
    })
}

impl LedgerEvent {
    /// Decode an event of the livestream pallet by variant name.
    ///
    /// Returns `Ok(None)` for variants the dispatcher does not act on.
    pub fn decode(variant: &str, data: &[u8]) -> Result<Option<Self>, ChainError> {
        let event = match variant {
            "RoomCreated" => {
                let f: wire::RoomCreated = fields(variant, data)?;
                LedgerEvent::RoomCreated {
                    host: account_to_address(&f.host),
                    room_id: f.room_id,
                    kind: RoomKind::from_tag(f.room_type)?,
                }
            }
            "LiveStarted" => {
                let f: wire::LiveStarted = fields(variant, data)?;
                LedgerEvent::LiveStarted {
                    room_id: f.room_id,
                    started_at: u64::from(f.started_at),
                }
            }
            "LivePaused" => {
                let f: wire::RoomOnly = fields(variant, data)?;
                LedgerEvent::LivePaused { room_id: f.room_id }
            }
            "LiveResumed" => {
                let f: wire::RoomOnly = fields(variant, data)?;
                LedgerEvent::LiveResumed { room_id: f.room_id }
            }
            "LiveEnded" => {
                let f: wire::LiveEnded = fields(variant, data)?;
                LedgerEvent::LiveEnded {
                    room_id: f.room_id,
                    duration: f.duration,
                    total_viewers: f.total_viewers,
                    peak_viewers: f.peak_viewers,
                    total_gifts: Amount(f.total_gifts),
                }
            }
            "RoomUpdated" => {
                let f: wire::RoomOnly = fields(variant, data)?;
                LedgerEvent::RoomUpdated { room_id: f.room_id }
            }
            "TicketPurchased" => {
                let f: wire::TicketPurchased = fields(variant, data)?;
                LedgerEvent::TicketPurchased {
                    room_id: f.room_id,
                    buyer: account_to_address(&f.buyer),
                    price: Amount(f.price),
                }
            }
            "GiftSent" => {
                let f: wire::GiftSent = fields(variant, data)?;
                LedgerEvent::GiftSent {
                    room_id: f.room_id,
                    sender: account_to_address(&f.sender),
                    receiver: account_to_address(&f.receiver),
                    gift_id: f.gift_id,
                    quantity: f.quantity,
                    value: Amount(f.value),
                }
            }
            "ViewerKicked" => {
                let f: wire::RoomMember = fields(variant, data)?;
                LedgerEvent::ViewerKicked {
                    room_id: f.room_id,
                    viewer: account_to_address(&f.account),
                }
            }
            "ViewerUnbanned" => {
                let f: wire::RoomMember = fields(variant, data)?;
                LedgerEvent::ViewerUnbanned {
                    room_id: f.room_id,
                    viewer: account_to_address(&f.account),
                }
            }
            "RoomBanned" => {
                let f: wire::RoomBanned = fields(variant, data)?;
                LedgerEvent::RoomBanned {
                    room_id: f.room_id,
                    reason: String::from_utf8_lossy(&f.reason).into_owned(),
                }
            }
            "CoHostStarted" => {
                let f: wire::RoomMember = fields(variant, data)?;
                LedgerEvent::CoHostStarted {
                    room_id: f.room_id,
                    co_host: account_to_address(&f.account),
                }
            }
            "CoHostEnded" => {
                let f: wire::RoomMember = fields(variant, data)?;
                LedgerEvent::CoHostEnded {
                    room_id: f.room_id,
                    co_host: account_to_address(&f.account),
                }
            }
            "GiftCreated" => {
                let f: wire::GiftCreated = fields(variant, data)?;
                LedgerEvent::GiftCreated { gift_id: f.gift_id }
            }
            "GiftUpdated" => {
                let f: wire::GiftUpdated = fields(variant, data)?;
                LedgerEvent::GiftUpdated {
                    gift_id: f.gift_id,
                    enabled: f.enabled,
                }
            }
            "LiveStatsSynced" => {
                let f: wire::LiveStatsSynced = fields(variant, data)?;
                LedgerEvent::LiveStatsSynced {
                    room_id: f.room_id,
                    total_viewers: f.total_viewers,
                    peak_viewers: f.peak_viewers,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::RoomCreated { .. } => "RoomCreated",
            LedgerEvent::LiveStarted { .. } => "LiveStarted",
            LedgerEvent::LivePaused { .. } => "LivePaused",
            LedgerEvent::LiveResumed { .. } => "LiveResumed",
            LedgerEvent::LiveEnded { .. } => "LiveEnded",
            LedgerEvent::RoomUpdated { .. } => "RoomUpdated",
            LedgerEvent::TicketPurchased { .. } => "TicketPurchased",
            LedgerEvent::GiftSent { .. } => "GiftSent",
            LedgerEvent::ViewerKicked { .. } => "ViewerKicked",
            LedgerEvent::ViewerUnbanned { .. } => "ViewerUnbanned",
            LedgerEvent::RoomBanned { .. } => "RoomBanned",
            LedgerEvent::CoHostStarted { .. } => "CoHostStarted",
            LedgerEvent::CoHostEnded { .. } => "CoHostEnded",
            LedgerEvent::GiftCreated { .. } => "GiftCreated",
            LedgerEvent::GiftUpdated { .. } => "GiftUpdated",
            LedgerEvent::LiveStatsSynced { .. } => "LiveStatsSynced",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scale::Encode;

    #[test]
    fn test_decode_viewer_kicked() {
        let data = wire::RoomMember {
            room_id: 7,
            account: [3u8; 32],
        }
        .encode();
        let event = LedgerEvent::decode("ViewerKicked", &data).unwrap().unwrap();
        assert_eq!(
            event,
            LedgerEvent::ViewerKicked {
                room_id: 7,
                viewer: account_to_address(&[3u8; 32]),
            }
        );
    }

    #[test]
    fn test_decode_live_ended() {
        let data = wire::LiveEnded {
            room_id: 2,
            duration: 3600,
            total_viewers: 50,
            peak_viewers: 20,
            total_gifts: 1_000,
        }
        .encode();
        match LedgerEvent::decode("LiveEnded", &data).unwrap() {
            Some(LedgerEvent::LiveEnded {
                room_id,
                total_gifts,
                ..
            }) => {
                assert_eq!(room_id, 2);
                assert_eq!(total_gifts, Amount(1_000));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_live_stats_synced() {
        let data = wire::LiveStatsSynced {
            room_id: 4,
            total_viewers: 120,
            peak_viewers: 45,
        }
        .encode();
        assert_eq!(
            LedgerEvent::decode("LiveStatsSynced", &data).unwrap(),
            Some(LedgerEvent::LiveStatsSynced {
                room_id: 4,
                total_viewers: 120,
                peak_viewers: 45,
            })
        );
    }

    #[test]
    fn test_unknown_variant_is_ignored() {
        assert_eq!(LedgerEvent::decode("EarningsWithdrawn", &[1, 2, 3]).unwrap(), None);
    }

    #[test]
    fn test_unknown_room_kind_is_decode_error() {
        let data = wire::RoomCreated {
            host: [1u8; 32],
            room_id: 1,
            room_type: 7,
        }
        .encode();
        assert!(matches!(
            LedgerEvent::decode("RoomCreated", &data),
            Err(ChainError::DecodeError(_))
        ));
    }

    #[test]
    fn test_truncated_fields_are_decode_error() {
        assert!(LedgerEvent::decode("LiveStarted", &[7, 0, 0]).is_err());
    }
}
