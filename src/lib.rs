//! Livestream ledger gateway.
//!
//! Relays livestream pallet events into a read cache and realtime push
//! notifications, and gates media-session credentials behind sr25519
//! signatures and ledger-side authorization.

pub mod chain;
pub mod clock;
pub mod media;
pub mod realtime;
pub mod settings;

pub use settings::Settings;
