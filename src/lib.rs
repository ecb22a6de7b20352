//! # web-udp
//!
//! Unreliable, unordered datagram channels multiplexed over a single peer
//! link.
//!
//! A [`Peer`] wraps one link engine (anything implementing
//! [`PeerLink`](core::PeerLink)) and provides:
//!
//! - **Handshake**: offer/answer creation and remote description and
//!   candidate application, with local candidates surfaced through a callback
//! - **Channels**: named datagram channels opened by either side, at most one
//!   open channel per label
//! - **Lifecycle**: one idempotent close that tears down the link and every
//!   channel, triggered locally or by the link failing
//!
//! Signaling transport is left to the caller: descriptions and candidates are
//! plain values to be carried over whatever channel the application has.
//!
//! ## Feature Flags
//!
//! - `memory` (default): in-process link engine for loopback pairs and tests
//!
//! ## Modules
//!
//! - [`core`]: Engine traits, shared types, constants and errors
//! - [`notify`]: Multi-subscriber event dispatch
//! - [`channel`]: Channel wrapper
//! - [`peer`]: Peer adapter and its configuration
//! - [`link`]: Bundled link engines
//!
//! ## Example Usage
//!
//! ```rust
//! # #[cfg(feature = "memory")]
//! # async fn run() -> Result<(), web_udp::PeerError> {
//! use web_udp::prelude::*;
//! use web_udp::link::memory::MemoryLink;
//!
//! let (left, right) = MemoryLink::pair();
//! let caller = Peer::builder(left).build();
//! let callee = Peer::builder(right).build();
//!
//! let offer = caller.offer().await?;
//! let answer = callee.accept(offer).await?;
//! caller.set_remote_description(answer).await?;
//!
//! let chat = caller.channel("chat", ChannelOptions::default()).await?;
//! chat.send(&b"hello"[..])?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

pub mod channel;
pub mod link;
pub mod notify;
pub mod peer;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::channel::Channel;
    pub use crate::core::*;
    pub use crate::notify::{Notifier, SubscriptionId};
    pub use crate::peer::{ChannelOptions, Peer, PeerBuilder, PeerConfig};
}

// Re-export commonly used items at crate root
pub use channel::Channel;
pub use core::{ChannelError, Connection, PeerError, PeerResult};
pub use peer::{ChannelOptions, Peer, PeerBuilder, PeerConfig};
