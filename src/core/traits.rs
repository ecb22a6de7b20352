//! Capability surfaces at the seams of the crate.
//!
//! [`PeerLink`] and [`DataChannel`] describe what the crate consumes from a
//! peer-link engine (ICE/SCTP equivalent). A production engine and a test
//! double both satisfy them; see [`link::memory`](crate::link::memory).
//!
//! [`Connection`] describes what the crate produces for each channel.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;

use super::error::{ChannelError, PeerResult};
use super::types::{
    BinaryType, ConnectionState, DataChannelInit, IceCandidate, ReadyState, SessionDescription,
    SignalingState,
};
use crate::notify::Notifier;

/// Callback registered on an engine object.
///
/// Engines invoke handlers synchronously from whatever context raised the
/// event and MUST NOT hold internal locks while doing so: handlers re-enter
/// the engine (closing a channel from its message handler, for example).
pub type EventHandler<T> = Arc<dyn Fn(T) + Send + Sync + 'static>;

/// One underlying datagram channel.
///
/// Registering a handler replaces the previous one; `None` detaches it.
pub trait DataChannel: Send + Sync + 'static {
    /// Engine error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Label given at creation.
    fn label(&self) -> &str;

    /// Current readiness.
    fn ready_state(&self) -> ReadyState;

    /// Representation used for incoming binary payloads.
    fn set_binary_type(&self, binary_type: BinaryType);

    /// Queue one message for transmission.
    fn send(&self, data: &Bytes) -> Result<(), Self::Error>;

    /// Start closing the channel.
    fn close(&self);

    /// Channel became usable.
    fn on_open(&self, handler: Option<EventHandler<()>>);

    /// A message arrived.
    fn on_message(&self, handler: Option<EventHandler<Bytes>>);

    /// The engine reported an error, with its description.
    fn on_error(&self, handler: Option<EventHandler<String>>);

    /// The channel closed.
    fn on_close(&self, handler: Option<EventHandler<()>>);
}

/// One underlying peer link.
pub trait PeerLink: Send + Sync + 'static {
    /// Datagram channel type created by this engine.
    type Channel: DataChannel;

    /// Engine error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Generate a local offer description.
    fn create_offer(
        &self,
    ) -> impl Future<Output = Result<SessionDescription, Self::Error>> + Send;

    /// Generate a local answer description. Requires an applied remote offer.
    fn create_answer(
        &self,
    ) -> impl Future<Output = Result<SessionDescription, Self::Error>> + Send;

    /// Apply a locally generated description.
    fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Apply a description received from the remote side.
    fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Add a candidate received from the remote side.
    fn add_ice_candidate(
        &self,
        candidate: IceCandidate,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Create a named datagram channel.
    fn create_data_channel(
        &self,
        label: &str,
        init: DataChannelInit,
    ) -> Result<Arc<Self::Channel>, Self::Error>;

    /// Current aggregate connection state.
    fn connection_state(&self) -> ConnectionState;

    /// Current negotiation state.
    fn signaling_state(&self) -> SignalingState;

    /// Close the link.
    fn close(&self);

    /// A local candidate was discovered; `None` ends gathering.
    fn on_ice_candidate(&self, handler: Option<EventHandler<Option<IceCandidate>>>);

    /// Signaling or connection state changed. Read the new state from the link.
    fn on_state_change(&self, handler: Option<EventHandler<()>>);

    /// The remote side opened a channel.
    fn on_data_channel(&self, handler: Option<EventHandler<Arc<Self::Channel>>>);

    /// The link closed.
    fn on_close(&self, handler: Option<EventHandler<()>>);
}

/// A message connection as seen by the application.
///
/// Implemented by [`Channel`](crate::channel::Channel); code that only moves
/// messages can be written against this trait.
pub trait Connection {
    /// Connection identifier.
    fn id(&self) -> &str;

    /// Send one message.
    fn send(&self, message: Bytes) -> PeerResult<()>;

    /// Close the connection.
    fn close(&self);

    /// Incoming messages.
    fn messages(&self) -> &Notifier<Bytes>;

    /// Transmission errors.
    fn errors(&self) -> &Notifier<ChannelError>;

    /// Close notification, dispatched once.
    fn closed(&self) -> &Notifier<()>;
}
