//! Peer-link engines shipped with the crate.
//!
//! Production engines live outside this crate and implement
//! [`PeerLink`](crate::core::PeerLink) and
//! [`DataChannel`](crate::core::DataChannel) directly.

#[cfg(feature = "memory")]
#[cfg_attr(docsrs, doc(cfg(feature = "memory")))]
pub mod memory;
