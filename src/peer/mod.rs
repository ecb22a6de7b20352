//! Peer adapter: one peer link, its handshake, and its channel registry.

mod config;
#[allow(clippy::module_inception)]
mod peer;
mod registry;

pub use config::*;
pub use peer::*;
