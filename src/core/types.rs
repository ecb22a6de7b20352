//! Value types shared by the peer adapter and the link engines.
//!
//! Descriptions and candidates are opaque here: their contents are defined by
//! the handshake protocol of the underlying engine.

use std::fmt;

/// Kind of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdpType {
    /// Generated by the initiating side.
    Offer,
    /// Provisional answer.
    Pranswer,
    /// Final answer from the receiving side.
    Answer,
    /// Rolls back a pending offer.
    Rollback,
}

impl SdpType {
    /// Wire name of the description kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Pranswer => "pranswer",
            SdpType::Answer => "answer",
            SdpType::Rollback => "rollback",
        }
    }
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A session description produced by `offer()`/`answer()` and exchanged
/// out-of-band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    /// Description kind.
    pub sdp_type: SdpType,
    /// Opaque negotiation payload.
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer description.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Create an answer description.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Check if this is an offer.
    pub fn is_offer(&self) -> bool {
        self.sdp_type == SdpType::Offer
    }
}

/// A connectivity-path descriptor exchanged out-of-band.
///
/// The end of candidate gathering is signalled with `None` wherever an
/// `Option<IceCandidate>` is accepted or produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    /// Opaque candidate line.
    pub candidate: String,
    /// Media stream identification tag.
    pub sdp_mid: Option<String>,
    /// Index of the media description the candidate belongs to.
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    /// Create a candidate from its candidate line.
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }
}

/// Aggregate connection state of the underlying peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Freshly created, nothing negotiated yet.
    #[default]
    New,
    /// Transports are being established.
    Connecting,
    /// At least one transport is usable.
    Connected,
    /// Connectivity lost, may recover.
    Disconnected,
    /// Connectivity could not be established or was lost for good.
    Failed,
    /// The link was closed.
    Closed,
}

impl ConnectionState {
    /// States in which the peer tears itself down.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed
        )
    }
}

/// Offer/answer negotiation state of the underlying peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SignalingState {
    /// No exchange in progress.
    #[default]
    Stable,
    /// A local offer was applied.
    HaveLocalOffer,
    /// A remote offer was applied.
    HaveRemoteOffer,
    /// A local provisional answer was applied.
    HaveLocalPranswer,
    /// A remote provisional answer was applied.
    HaveRemotePranswer,
    /// The link was closed.
    Closed,
}

/// Readiness of an underlying datagram channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReadyState {
    /// Created, not usable yet.
    #[default]
    Connecting,
    /// Usable for sending.
    Open,
    /// Close in progress.
    Closing,
    /// Closed.
    Closed,
}

impl ReadyState {
    /// `true` for `Closing` and `Closed`.
    pub fn is_closing_or_closed(&self) -> bool {
        matches!(self, ReadyState::Closing | ReadyState::Closed)
    }
}

/// Representation requested for incoming binary payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BinaryType {
    /// Raw byte buffer.
    #[default]
    ArrayBuffer,
    /// Opaque blob handle, for engines that distinguish it.
    Blob,
}

/// Delivery configuration requested when creating a datagram channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataChannelInit {
    /// Deliver messages in send order.
    pub ordered: bool,
    /// Retransmission limit; `None` retransmits until delivered.
    pub max_retransmits: Option<u16>,
}

impl DataChannelInit {
    /// Unordered delivery without retransmission.
    pub const fn unreliable() -> Self {
        Self {
            ordered: false,
            max_retransmits: Some(0),
        }
    }

    /// Check if this configuration gives datagram semantics.
    pub fn is_unreliable(&self) -> bool {
        !self.ordered && self.max_retransmits == Some(0)
    }
}

impl Default for DataChannelInit {
    fn default() -> Self {
        Self::unreliable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(ConnectionState::Disconnected.is_terminal());
        assert!(ConnectionState::Failed.is_terminal());
        assert!(ConnectionState::Closed.is_terminal());

        assert!(!ConnectionState::New.is_terminal());
        assert!(!ConnectionState::Connecting.is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
    }

    #[test]
    fn test_ready_state_closing() {
        assert!(ReadyState::Closing.is_closing_or_closed());
        assert!(ReadyState::Closed.is_closing_or_closed());
        assert!(!ReadyState::Open.is_closing_or_closed());
        assert!(!ReadyState::Connecting.is_closing_or_closed());
    }

    #[test]
    fn test_default_init_is_unreliable() {
        let init = DataChannelInit::default();
        assert!(!init.ordered);
        assert_eq!(init.max_retransmits, Some(0));
        assert!(init.is_unreliable());

        let reliable = DataChannelInit {
            ordered: true,
            max_retransmits: None,
        };
        assert!(!reliable.is_unreliable());
    }

    #[test]
    fn test_sdp_type_display() {
        assert_eq!(SessionDescription::offer("v=0").sdp_type.to_string(), "offer");
        assert_eq!(SdpType::Answer.as_str(), "answer");
        assert!(SessionDescription::offer("v=0").is_offer());
        assert!(!SessionDescription::answer("v=0").is_offer());
    }
}
