//! Replay-window signature verification.
//!
//! Clients sign `livestream:{roomId}:{timestampMs}` (or
//! `livestream:session:{timestampMs}` for realtime authentication) with the
//! sr25519 key behind their SS58 address. Verification is pure: no network
//! I/O, so it always runs before any ledger or cache query.

use crate::chain::codec::parse_account;
use crate::chain::error::AuthError;
use crate::clock::Clock;
use std::sync::Arc;
use subxt::utils::AccountId32;
use subxt_signer::sr25519;

/// Domain tag bound into every signed message.
pub const SIGNING_DOMAIN: &str = "livestream";

/// Default replay window: five minutes.
pub const DEFAULT_MAX_SIGNATURE_AGE_MS: i64 = 5 * 60 * 1000;

/// What a signature is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedScope {
    Room(u64),
    Session,
}

/// Build the exact message a client must sign.
pub fn signing_message(scope: SignedScope, timestamp_ms: i64) -> String {
    match scope {
        SignedScope::Room(room_id) => format!("{}:{}:{}", SIGNING_DOMAIN, room_id, timestamp_ms),
        SignedScope::Session => format!("{}:session:{}", SIGNING_DOMAIN, timestamp_ms),
    }
}

fn decode_signature(signature: &str) -> Result<sr25519::Signature, AuthError> {
    let trimmed = signature.trim();
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(hex_part).map_err(|e| AuthError::Invalid {
        reason: format!("signature is not hex: {}", e),
    })?;
    let bytes: [u8; 64] = bytes.try_into().map_err(|b: Vec<u8>| AuthError::Invalid {
        reason: format!("signature must be 64 bytes, got {}", b.len()),
    })?;
    Ok(sr25519::Signature(bytes))
}

pub struct SignatureAuthenticator {
    max_age_ms: i64,
    clock: Arc<dyn Clock>,
}

impl SignatureAuthenticator {
    pub fn new(max_age_ms: i64, clock: Arc<dyn Clock>) -> Self {
        Self { max_age_ms, clock }
    }

    pub fn max_age_ms(&self) -> i64 {
        self.max_age_ms
    }

    /// Verify a room-scoped signature. Returns the signer's account on success.
    pub fn verify(
        &self,
        room_id: u64,
        address: &str,
        signature: &str,
        timestamp_ms: i64,
    ) -> Result<AccountId32, AuthError> {
        self.verify_scoped(SignedScope::Room(room_id), address, signature, timestamp_ms)
    }

    pub fn verify_scoped(
        &self,
        scope: SignedScope,
        address: &str,
        signature: &str,
        timestamp_ms: i64,
    ) -> Result<AccountId32, AuthError> {
        // Freshness is checked first and independently of the signature.
        let age_ms = self.clock.now_ms().saturating_sub(timestamp_ms).saturating_abs();
        if age_ms > self.max_age_ms {
            return Err(AuthError::Expired {
                age_ms,
                max_age_ms: self.max_age_ms,
            });
        }

        let account = parse_account(address).map_err(|e| AuthError::Invalid {
            reason: e.to_string(),
        })?;
        let signature = decode_signature(signature)?;
        let public_key = sr25519::PublicKey(account.0);

        let message = signing_message(scope, timestamp_ms);
        // Browser extensions sign the message wrapped in <Bytes> tags.
        let wrapped = format!("<Bytes>{}</Bytes>", message);
        if sr25519::verify(&signature, message.as_bytes(), &public_key)
            || sr25519::verify(&signature, wrapped.as_bytes(), &public_key)
        {
            Ok(account)
        } else {
            Err(AuthError::Invalid {
                reason: "signature does not match address".to_string(),
            })
        }
    }
}

impl std::fmt::Debug for SignatureAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureAuthenticator")
            .field("max_age_ms", &self.max_age_ms)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::codec::account_to_address;
    use crate::clock::ManualClock;
    use subxt_signer::sr25519::dev;

    const T0: i64 = 1_700_000_000_000;

    fn sign(keypair: &sr25519::Keypair, scope: SignedScope, ts: i64) -> String {
        hex::encode(keypair.sign(signing_message(scope, ts).as_bytes()).0)
    }

    fn address(keypair: &sr25519::Keypair) -> String {
        account_to_address(&keypair.public_key().0)
    }

    fn authenticator(clock: Arc<ManualClock>) -> SignatureAuthenticator {
        SignatureAuthenticator::new(DEFAULT_MAX_SIGNATURE_AGE_MS, clock)
    }

    #[test]
    fn test_signing_message_format() {
        assert_eq!(signing_message(SignedScope::Room(7), 123), "livestream:7:123");
        assert_eq!(signing_message(SignedScope::Session, 123), "livestream:session:123");
    }

    #[test]
    fn test_valid_signature_accepted() {
        let alice = dev::alice();
        let auth = authenticator(Arc::new(ManualClock::new(T0)));
        let sig = sign(&alice, SignedScope::Room(7), T0);
        let account = auth.verify(7, &address(&alice), &sig, T0).unwrap();
        assert_eq!(account.0, alice.public_key().0);
    }

    #[test]
    fn test_prefixed_and_wrapped_signatures_accepted() {
        let alice = dev::alice();
        let auth = authenticator(Arc::new(ManualClock::new(T0)));
        let prefixed = format!("0x{}", sign(&alice, SignedScope::Room(7), T0));
        assert!(auth.verify(7, &address(&alice), &prefixed, T0).is_ok());

        let wrapped = format!("<Bytes>{}</Bytes>", signing_message(SignedScope::Room(7), T0));
        let sig = hex::encode(alice.sign(wrapped.as_bytes()).0);
        assert!(auth.verify(7, &address(&alice), &sig, T0).is_ok());
    }

    #[test]
    fn test_window_boundary() {
        let alice = dev::alice();
        let clock = Arc::new(ManualClock::new(T0));
        let auth = authenticator(clock.clone());
        let sig = sign(&alice, SignedScope::Room(7), T0);

        clock.set(T0 + DEFAULT_MAX_SIGNATURE_AGE_MS);
        assert!(auth.verify(7, &address(&alice), &sig, T0).is_ok());

        clock.set(T0 + DEFAULT_MAX_SIGNATURE_AGE_MS + 1);
        assert!(matches!(
            auth.verify(7, &address(&alice), &sig, T0),
            Err(AuthError::Expired { .. })
        ));
    }

    #[test]
    fn test_future_timestamp_outside_window_rejected() {
        let alice = dev::alice();
        let auth = authenticator(Arc::new(ManualClock::new(T0)));
        let ts = T0 + DEFAULT_MAX_SIGNATURE_AGE_MS + 1;
        let sig = sign(&alice, SignedScope::Room(7), ts);
        assert!(matches!(
            auth.verify(7, &address(&alice), &sig, ts),
            Err(AuthError::Expired { .. })
        ));
    }

    #[test]
    fn test_expiry_reported_even_for_garbage_signature() {
        let auth = authenticator(Arc::new(ManualClock::new(T0)));
        assert!(matches!(
            auth.verify(7, "nonsense", "zz", T0 - DEFAULT_MAX_SIGNATURE_AGE_MS - 1),
            Err(AuthError::Expired { .. })
        ));
    }

    #[test]
    fn test_signature_bound_to_room() {
        let alice = dev::alice();
        let auth = authenticator(Arc::new(ManualClock::new(T0)));
        let sig = sign(&alice, SignedScope::Room(7), T0);
        assert!(matches!(
            auth.verify(8, &address(&alice), &sig, T0),
            Err(AuthError::Invalid { .. })
        ));
        assert!(auth
            .verify_scoped(SignedScope::Session, &address(&alice), &sig, T0)
            .is_err());
    }

    #[test]
    fn test_signature_bound_to_signer() {
        let alice = dev::alice();
        let bob = dev::bob();
        let auth = authenticator(Arc::new(ManualClock::new(T0)));
        let sig = sign(&alice, SignedScope::Room(7), T0);
        assert!(matches!(
            auth.verify(7, &address(&bob), &sig, T0),
            Err(AuthError::Invalid { .. })
        ));
    }

    #[test]
    fn test_malformed_inputs_rejected() {
        let alice = dev::alice();
        let auth = authenticator(Arc::new(ManualClock::new(T0)));
        assert!(auth.verify(7, &address(&alice), "not-hex", T0).is_err());
        assert!(auth.verify(7, &address(&alice), "abcd", T0).is_err());
        assert!(auth.verify(7, "bad-address", &"00".repeat(64), T0).is_err());
    }
}
