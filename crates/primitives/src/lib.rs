//! Core primitive types for the conduit data-transfer coordinator.
//!
//! This crate defines the basic types shared by every other conduit crate:
//! channel identity, content addressing, opaque typed payloads (vouchers and
//! voucher results), the channel status machine vocabulary, and the persisted
//! channel record.

#![warn(missing_docs)]

/// Channel and transfer identity.
pub mod transfer;
pub use transfer::*;

/// Content addressing and selectors.
pub mod content;
pub use content::*;

/// Opaque typed payloads (vouchers, voucher results).
pub mod payload;
pub use payload::*;

/// Channel status and classifiers.
pub mod status;
pub use status::*;

/// Channel events.
pub mod event;
pub use event::*;

/// The persisted channel record.
pub mod channel;
pub use channel::*;

/// Base58 serde for [`PeerId`].
pub mod serde_peer_id;

/// Hex-string serde for opaque byte payloads.
pub mod serde_hex;

/// Re-export of the peer identity type used throughout conduit.
pub use libp2p_identity::PeerId;

/// Re-exports from alloy-primitives to ensure consistent usage.
pub use alloy_primitives::B256;
