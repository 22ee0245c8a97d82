//! Storage key derivation and SCALE decoding for the livestream pallet.
//!
//! Storage maps in the pallet use `Blake2_128Concat` hashing, so a map key is
//! `twox_128(pallet) ++ twox_128(item) ++ blake2_128(k) ++ k` with `k` SCALE
//! encoded. Double maps repeat the hashed suffix for the second key.

use crate::chain::error::ChainError;
use crate::chain::types::{Amount, Gift, RoomKind, RoomSnapshot, RoomStatus};
use scale::{Decode, DecodeAll, Encode};
use std::str::FromStr;
use subxt::utils::AccountId32;

/// Parse an SS58 address into its raw account id.
pub fn parse_account(address: &str) -> Result<AccountId32, ChainError> {
    AccountId32::from_str(address.trim())
        .map_err(|e| ChainError::InvalidAddress(format!("{}: {:?}", address, e)))
}

/// Canonical SS58 rendering of a raw account id.
pub fn account_to_address(account: &[u8; 32]) -> String {
    AccountId32(*account).to_string()
}

/// Compute TwoX 128-bit hash (Substrate standard for pallet/item names).
pub fn twox_128(data: &[u8]) -> [u8; 16] {
    use std::hash::Hasher;
    use twox_hash::XxHash64;

    // TwoX128 = XxHash64(seed=0) || XxHash64(seed=1)
    let mut h0 = XxHash64::with_seed(0);
    let mut h1 = XxHash64::with_seed(1);
    h0.write(data);
    h1.write(data);

    let mut result = [0u8; 16];
    result[..8].copy_from_slice(&h0.finish().to_le_bytes());
    result[8..].copy_from_slice(&h1.finish().to_le_bytes());
    result
}

/// Compute Blake2b 128-bit hash.
pub fn blake2_128(data: &[u8]) -> [u8; 16] {
    use blake2::{digest::consts::U16, Blake2b, Digest};

    let mut hasher = Blake2b::<U16>::new();
    hasher.update(data);
    let result = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&result);
    bytes
}

fn blake2_128_concat(out: &mut Vec<u8>, key: &impl Encode) {
    let encoded = key.encode();
    out.extend_from_slice(&blake2_128(&encoded));
    out.extend_from_slice(&encoded);
}

/// Storage key builder bound to one pallet instance name.
#[derive(Debug, Clone)]
pub struct StorageKeys {
    pallet: String,
}

impl StorageKeys {
    pub fn new(pallet: impl Into<String>) -> Self {
        Self {
            pallet: pallet.into(),
        }
    }

    pub fn pallet(&self) -> &str {
        &self.pallet
    }

    fn prefix(&self, item: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(64);
        key.extend_from_slice(&twox_128(self.pallet.as_bytes()));
        key.extend_from_slice(&twox_128(item.as_bytes()));
        key
    }

    fn map(&self, item: &str, k: &impl Encode) -> Vec<u8> {
        let mut key = self.prefix(item);
        blake2_128_concat(&mut key, k);
        key
    }

    fn double_map(&self, item: &str, k1: &impl Encode, k2: &impl Encode) -> Vec<u8> {
        let mut key = self.prefix(item);
        blake2_128_concat(&mut key, k1);
        blake2_128_concat(&mut key, k2);
        key
    }

    pub fn live_room(&self, room_id: u64) -> Vec<u8> {
        self.map("LiveRooms", &room_id)
    }

    pub fn next_room_id(&self) -> Vec<u8> {
        self.prefix("NextRoomId")
    }

    pub fn gift(&self, gift_id: u32) -> Vec<u8> {
        self.map("Gifts", &gift_id)
    }

    pub fn next_gift_id(&self) -> Vec<u8> {
        self.prefix("NextGiftId")
    }

    pub fn ticket_holder(&self, room_id: u64, account: &AccountId32) -> Vec<u8> {
        self.double_map("TicketHolders", &room_id, &account.0)
    }

    pub fn blacklist(&self, room_id: u64, account: &AccountId32) -> Vec<u8> {
        self.double_map("RoomBlacklist", &room_id, &account.0)
    }

    pub fn active_co_hosts(&self, room_id: u64) -> Vec<u8> {
        self.map("ActiveCoHosts", &room_id)
    }

    pub fn host_earnings(&self, account: &AccountId32) -> Vec<u8> {
        self.map("HostEarnings", &account.0)
    }
}

/// Storage layout of a `LiveRooms` value. Enum fields are kept as raw
/// variant indices so that decoding them goes through one explicit table.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ChainLiveRoom {
    pub id: u64,
    pub host: [u8; 32],
    pub title: Vec<u8>,
    pub description: Option<Vec<u8>>,
    pub room_type: u8,
    pub status: u8,
    pub cover_cid: Option<Vec<u8>>,
    pub total_viewers: u64,
    pub peak_viewers: u32,
    pub total_gifts: u128,
    pub ticket_price: Option<u128>,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub ended_at: Option<u64>,
}

/// Storage layout of a `Gifts` value.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ChainGift {
    pub id: u32,
    pub name: Vec<u8>,
    pub price: u128,
    pub icon_cid: Vec<u8>,
    pub enabled: bool,
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn decode_exact<T: DecodeAll>(what: &str, data: &[u8]) -> Result<T, ChainError> {
    T::decode_all(&mut &data[..]).map_err(|e| {
        ChainError::DecodeError(format!("{} ({}): 0x{}", what, e, hex::encode(data)))
    })
}

/// Decode a `LiveRooms` entry into a snapshot.
pub fn decode_room(data: &[u8]) -> Result<RoomSnapshot, ChainError> {
    let raw: ChainLiveRoom = decode_exact("LiveRoom", data)?;

    Ok(RoomSnapshot {
        id: raw.id,
        host: account_to_address(&raw.host),
        title: text(&raw.title),
        description: raw.description.as_deref().map(text),
        kind: RoomKind::from_tag(raw.room_type)?,
        status: RoomStatus::from_tag(raw.status)?,
        cover_cid: raw.cover_cid.as_deref().map(text),
        total_viewers: raw.total_viewers,
        peak_viewers: raw.peak_viewers,
        total_gifts: Amount(raw.total_gifts),
        ticket_price: raw.ticket_price.map(Amount),
        created_at: raw.created_at,
        started_at: raw.started_at,
        ended_at: raw.ended_at,
    })
}

/// Decode a `Gifts` entry.
pub fn decode_gift(data: &[u8]) -> Result<Gift, ChainError> {
    let raw: ChainGift = decode_exact("Gift", data)?;
    Ok(Gift {
        id: raw.id,
        name: text(&raw.name),
        price: Amount(raw.price),
        icon_cid: text(&raw.icon_cid),
        enabled: raw.enabled,
    })
}

/// Decode a `BoundedVec<AccountId>` into SS58 addresses.
pub fn decode_accounts(data: &[u8]) -> Result<Vec<String>, ChainError> {
    let raw: Vec<[u8; 32]> = decode_exact("AccountList", data)?;
    Ok(raw.iter().map(account_to_address).collect())
}

pub fn decode_u64(data: &[u8]) -> Result<u64, ChainError> {
    decode_exact("u64", data)
}

pub fn decode_u32(data: &[u8]) -> Result<u32, ChainError> {
    decode_exact("u32", data)
}

pub fn decode_balance(data: &[u8]) -> Result<Amount, ChainError> {
    decode_exact::<u128>("Balance", data).map(Amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_room(status: u8, room_type: u8) -> ChainLiveRoom {
        ChainLiveRoom {
            id: 7,
            host: [1u8; 32],
            title: b"evening show".to_vec(),
            description: None,
            room_type,
            status,
            cover_cid: Some(b"bafy".to_vec()),
            total_viewers: 12,
            peak_viewers: 9,
            total_gifts: 500,
            ticket_price: Some(10),
            created_at: 100,
            started_at: Some(120),
            ended_at: None,
        }
    }

    #[test]
    fn test_twox_128() {
        // Well-known prefix of `System` pallet.
        assert_eq!(
            hex::encode(twox_128(b"System")),
            "26aa394eea5630e07c48ae0c9558cef7"
        );
    }

    #[test]
    fn test_blake2_128() {
        let data = b"test_data";
        let hash = blake2_128(data);
        assert_eq!(hash.len(), 16);
        assert_eq!(hash, blake2_128(data));
    }

    #[test]
    fn test_map_key_layout() {
        let keys = StorageKeys::new("Livestream");
        let key = keys.live_room(7);
        // 16 + 16 prefix, 16 hash, 8 byte u64
        assert_eq!(key.len(), 56);
        assert_eq!(&key[..16], &twox_128(b"Livestream"));
        assert_eq!(&key[16..32], &twox_128(b"LiveRooms"));
        assert_eq!(&key[48..], &7u64.to_le_bytes());
        assert_ne!(key, keys.live_room(8));
    }

    #[test]
    fn test_double_map_key_layout() {
        let keys = StorageKeys::new("Livestream");
        let account = AccountId32([2u8; 32]);
        let key = keys.blacklist(7, &account);
        assert_eq!(key.len(), 32 + 16 + 8 + 16 + 32);
        assert_ne!(key, keys.ticket_holder(7, &account));
    }

    #[test]
    fn test_decode_room() {
        let encoded = sample_room(1, 1).encode();
        let room = decode_room(&encoded).unwrap();
        assert_eq!(room.id, 7);
        assert_eq!(room.status, RoomStatus::Live);
        assert_eq!(room.kind, RoomKind::Paid);
        assert_eq!(room.title, "evening show");
        assert_eq!(room.host, account_to_address(&[1u8; 32]));
        assert_eq!(room.ticket_price, Some(Amount(10)));
    }

    #[test]
    fn test_decode_room_rejects_unknown_status() {
        let encoded = sample_room(9, 0).encode();
        assert!(matches!(
            decode_room(&encoded),
            Err(ChainError::DecodeError(_))
        ));
    }

    #[test]
    fn test_decode_room_rejects_trailing_bytes() {
        let mut encoded = sample_room(0, 0).encode();
        encoded.push(0xFF);
        assert!(decode_room(&encoded).is_err());
    }

    #[test]
    fn test_account_round_trip() {
        let address = account_to_address(&[5u8; 32]);
        let parsed = parse_account(&address).unwrap();
        assert_eq!(parsed.0, [5u8; 32]);
        assert!(parse_account("not-an-address").is_err());
    }

    #[test]
    fn test_decode_accounts() {
        let encoded = vec![[1u8; 32], [2u8; 32]].encode();
        let accounts = decode_accounts(&encoded).unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[1], account_to_address(&[2u8; 32]));
    }
}
