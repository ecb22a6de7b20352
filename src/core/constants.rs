//! Fixed values used by the peer adapter.

use super::types::{BinaryType, DataChannelInit};

/// Delivery configuration requested for every channel: unordered, no
/// retransmission. Message boundaries are preserved by the engine.
pub const DATA_CHANNEL_INIT: DataChannelInit = DataChannelInit::unreliable();

/// Binary representation used when a channel request does not name one.
pub const DEFAULT_BINARY_TYPE: BinaryType = BinaryType::ArrayBuffer;
