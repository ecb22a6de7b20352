//! Peer configuration and per-channel options.

use std::time::Duration;

use crate::core::{BinaryType, DEFAULT_BINARY_TYPE};

/// Peer-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    /// How long `channel()` waits for the underlying channel to open.
    /// `None` waits indefinitely.
    pub open_timeout: Option<Duration>,

    /// Binary representation for channels that do not request one, including
    /// channels opened by the remote side.
    pub binary_type: BinaryType,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            open_timeout: None,
            binary_type: DEFAULT_BINARY_TYPE,
        }
    }
}

/// Options for a single `channel()` request. Unset fields fall back to the
/// [`PeerConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Binary representation for this channel.
    pub binary_type: Option<BinaryType>,
    /// Open timeout for this request.
    pub open_timeout: Option<Duration>,
}

impl ChannelOptions {
    /// Options with every field unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the binary representation.
    pub fn binary_type(mut self, binary_type: BinaryType) -> Self {
        self.binary_type = Some(binary_type);
        self
    }

    /// Set the open timeout.
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = Some(timeout);
        self
    }

    pub(crate) fn resolve(&self, config: &PeerConfig) -> (BinaryType, Option<Duration>) {
        (
            self.binary_type.unwrap_or(config.binary_type),
            self.open_timeout.or(config.open_timeout),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PeerConfig::default();
        assert_eq!(config.open_timeout, None);
        assert_eq!(config.binary_type, BinaryType::ArrayBuffer);
    }

    #[test]
    fn test_options_override_config() {
        let config = PeerConfig {
            open_timeout: Some(Duration::from_secs(10)),
            binary_type: BinaryType::ArrayBuffer,
        };

        let (binary_type, timeout) = ChannelOptions::new().resolve(&config);
        assert_eq!(binary_type, BinaryType::ArrayBuffer);
        assert_eq!(timeout, Some(Duration::from_secs(10)));

        let options = ChannelOptions::new()
            .binary_type(BinaryType::Blob)
            .open_timeout(Duration::from_millis(250));
        let (binary_type, timeout) = options.resolve(&config);
        assert_eq!(binary_type, BinaryType::Blob);
        assert_eq!(timeout, Some(Duration::from_millis(250)));
    }
}
