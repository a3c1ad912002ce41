//! Interfaces between the conduit core and its collaborators.
//!
//! The core is generic over the byte-level wire transport, the peer network
//! and voucher semantics; everything it needs from them is expressed here.

#![warn(missing_docs)]

/// The wire transport consumed by the core.
pub mod transport;
pub use transport::*;

/// The peer network consumed by the core.
pub mod network;
pub use network::*;

/// Voucher validation interfaces.
pub mod voucher;
pub use voucher::*;

/// Event subscription aliases.
pub mod events;
pub use events::*;
