//! Channel adapter.
//!
//! Wraps one underlying datagram channel and exposes its traffic on three
//! notification streams: `messages`, `errors`, and `closed`.
//!
//! # Lifecycle
//!
//! A channel is open from construction until its close sequence runs. The
//! sequence runs exactly once, whichever side triggered it:
//!
//! 1. the open flag is cleared (it never becomes true again)
//! 2. the message listener is detached, so late deliveries are dropped
//! 3. the underlying channel is closed unless it is already closing or closed
//! 4. one `closed` notification is dispatched

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;

use crate::core::{
    BinaryType, ChannelError, Connection, DataChannel, PeerError, PeerResult, ReadyState,
};
use crate::notify::Notifier;

struct ChannelInner<C: DataChannel> {
    label: String,
    data_channel: Arc<C>,
    binary_type: BinaryType,
    open: AtomicBool,
    messages: Notifier<Bytes>,
    errors: Notifier<ChannelError>,
    closed: Notifier<()>,
}

/// A named, unordered, unreliable message channel.
///
/// Cloning yields another handle to the same channel.
pub struct Channel<C: DataChannel> {
    inner: Arc<ChannelInner<C>>,
}

impl<C: DataChannel> Channel<C> {
    /// Wrap an underlying channel and start forwarding its events.
    pub(crate) fn new(data_channel: Arc<C>, binary_type: BinaryType) -> Self {
        let inner = Arc::new(ChannelInner {
            label: data_channel.label().to_owned(),
            data_channel: data_channel.clone(),
            binary_type,
            open: AtomicBool::new(true),
            messages: Notifier::new(),
            errors: Notifier::new(),
            closed: Notifier::new(),
        });

        let weak = Arc::downgrade(&inner);
        data_channel.on_message(Some(Arc::new(move |data: Bytes| {
            if let Some(inner) = weak.upgrade() {
                inner.on_message(data);
            }
        })));

        let weak = Arc::downgrade(&inner);
        data_channel.on_error(Some(Arc::new(move |message: String| {
            if let Some(inner) = weak.upgrade() {
                inner.on_error(message);
            }
        })));

        let weak = Arc::downgrade(&inner);
        data_channel.on_close(Some(Arc::new(move |()| {
            if let Some(inner) = weak.upgrade() {
                inner.close();
            }
        })));

        Self { inner }
    }

    /// The channel label.
    pub fn id(&self) -> &str {
        &self.inner.label
    }

    /// Send one message.
    ///
    /// Silently does nothing if the underlying channel is closing or closed.
    /// Engine failures on an open channel are returned as [`PeerError::Link`].
    pub fn send(&self, message: impl Into<Bytes>) -> PeerResult<()> {
        let state = self.inner.data_channel.ready_state();
        if state.is_closing_or_closed() {
            return Ok(());
        }

        let message = message.into();
        tracing::trace!(label = %self.inner.label, len = message.len(), "send");
        self.inner
            .data_channel
            .send(&message)
            .map_err(PeerError::link)
    }

    /// Run the close sequence. Later calls do nothing.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Check if the close sequence has not run yet.
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Readiness of the underlying channel.
    pub fn ready_state(&self) -> ReadyState {
        self.inner.data_channel.ready_state()
    }

    /// Binary representation configured on the underlying channel.
    pub fn binary_type(&self) -> BinaryType {
        self.inner.binary_type
    }

    /// Incoming payloads, unchanged.
    pub fn messages(&self) -> &Notifier<Bytes> {
        &self.inner.messages
    }

    /// Errors reported by the underlying channel.
    pub fn errors(&self) -> &Notifier<ChannelError> {
        &self.inner.errors
    }

    /// Dispatched once when the channel closes.
    pub fn closed(&self) -> &Notifier<()> {
        &self.inner.closed
    }

    /// The underlying channel.
    pub fn data_channel(&self) -> &Arc<C> {
        &self.inner.data_channel
    }

    /// Check if two handles refer to the same channel.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<C: DataChannel> ChannelInner<C> {
    fn on_message(&self, data: Bytes) {
        if !self.open.load(Ordering::SeqCst) {
            return;
        }
        tracing::trace!(label = %self.label, len = data.len(), "message");
        self.messages.dispatch(&data);
    }

    fn on_error(&self, message: String) {
        tracing::debug!(label = %self.label, error = %message, "channel error");
        self.errors.dispatch(&ChannelError::new(message));
    }

    fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }

        self.data_channel.on_message(None);

        if !self.data_channel.ready_state().is_closing_or_closed() {
            self.data_channel.close();
        }

        tracing::debug!(label = %self.label, "channel closed");
        self.closed.dispatch(&());
    }
}

impl<C: DataChannel> Clone for Channel<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: DataChannel> fmt::Debug for Channel<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.label)
            .field("open", &self.is_open())
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

impl<C: DataChannel> Connection for Channel<C> {
    fn id(&self) -> &str {
        Channel::id(self)
    }

    fn send(&self, message: Bytes) -> PeerResult<()> {
        Channel::send(self, message)
    }

    fn close(&self) {
        Channel::close(self)
    }

    fn messages(&self) -> &Notifier<Bytes> {
        Channel::messages(self)
    }

    fn errors(&self) -> &Notifier<ChannelError> {
        Channel::errors(self)
    }

    fn closed(&self) -> &Notifier<()> {
        Channel::closed(self)
    }
}
