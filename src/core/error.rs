//! Error types for the peer and channel adapters.

use std::time::Duration;

use thiserror::Error;

/// Boxed error reported by a link engine.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by [`Peer`](crate::peer::Peer) and
/// [`Channel`](crate::channel::Channel) operations.
#[derive(Debug, Error)]
pub enum PeerError {
    /// The peer has been closed.
    #[error("peer closed")]
    Closed,

    /// A channel with this label is pending or open on this peer.
    #[error("channel label already in use: {0}")]
    DuplicateLabel(String),

    /// The underlying channel closed before it opened.
    #[error("channel closed before opening: {0}")]
    ChannelClosed(String),

    /// The underlying channel did not open in time.
    #[error("channel {label} did not open within {timeout:?}")]
    OpenTimeout {
        /// Requested label.
        label: String,
        /// Configured timeout.
        timeout: Duration,
    },

    /// Offer or answer generation failed.
    #[error("handshake failed: {0}")]
    Handshake(#[source] BoxError),

    /// The link engine rejected an operation.
    #[error("link error: {0}")]
    Link(#[source] BoxError),
}

impl PeerError {
    /// Wrap an engine error raised while generating a description.
    pub fn handshake<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        PeerError::Handshake(Box::new(err))
    }

    /// Wrap any other engine error.
    pub fn link<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        PeerError::Link(Box::new(err))
    }

    /// Check if this error means the peer is unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PeerError::Closed)
    }
}

/// Result type for peer operations.
pub type PeerResult<T> = Result<T, PeerError>;

/// Error reported by an underlying channel, dispatched on a channel's errors
/// stream. It does not close the channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("channel error: {message}")]
pub struct ChannelError {
    /// Engine-provided description.
    pub message: String,
}

impl ChannelError {
    /// Create a channel error from an engine description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::io;

    #[test]
    fn test_handshake_error_keeps_source() {
        let err = PeerError::handshake(io::Error::other("no transceivers"));
        assert_eq!(err.to_string(), "handshake failed: no transceivers");
        assert!(err.source().is_some());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_open_timeout_display() {
        let err = PeerError::OpenTimeout {
            label: "chat".into(),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "channel chat did not open within 5s");
    }

    #[test]
    fn test_channel_error_display() {
        let err = ChannelError::new("sctp abort");
        assert_eq!(err.to_string(), "channel error: sctp abort");
        assert!(PeerError::Closed.is_fatal());
    }
}
