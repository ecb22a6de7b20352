//! Peer adapter.
//!
//! Owns one peer link, the channels multiplexed over it, and the handshake
//! calls needed to establish it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::config::{ChannelOptions, PeerConfig};
use super::registry::{Pending, Registry};
use crate::channel::Channel;
use crate::core::{
    BinaryType, ConnectionState, DATA_CHANNEL_INIT, DataChannel, IceCandidate, PeerError,
    PeerLink, PeerResult, ReadyState, SessionDescription, SignalingState,
};

/// Called with every channel registered on the peer, local or remote.
pub type OnChannel<C> = Arc<dyn Fn(Channel<C>) + Send + Sync + 'static>;

/// Called when the peer closes.
pub type OnClose = Arc<dyn Fn() + Send + Sync + 'static>;

/// Called with every local candidate; `None` ends gathering.
pub type OnIce = Arc<dyn Fn(Option<IceCandidate>) + Send + Sync + 'static>;

struct Callbacks<C: DataChannel> {
    on_channel: Option<OnChannel<C>>,
    on_close: Option<OnClose>,
    on_ice: Option<OnIce>,
}

struct PeerInner<L: PeerLink> {
    link: Arc<L>,
    config: PeerConfig,
    registry: Mutex<Registry<L::Channel>>,
    callbacks: Callbacks<L::Channel>,
    closed: AtomicBool,
}

/// Builder for a [`Peer`].
pub struct PeerBuilder<L: PeerLink> {
    link: Arc<L>,
    config: PeerConfig,
    callbacks: Callbacks<L::Channel>,
}

impl<L: PeerLink> PeerBuilder<L> {
    /// Start building a peer around a freshly created link.
    pub fn new(link: Arc<L>) -> Self {
        Self {
            link,
            config: PeerConfig::default(),
            callbacks: Callbacks {
                on_channel: None,
                on_close: None,
                on_ice: None,
            },
        }
    }

    /// Set the channel callback.
    pub fn on_channel<F>(mut self, f: F) -> Self
    where
        F: Fn(Channel<L::Channel>) + Send + Sync + 'static,
    {
        self.callbacks.on_channel = Some(Arc::new(f));
        self
    }

    /// Set the close callback.
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(f));
        self
    }

    /// Set the candidate callback.
    pub fn on_ice<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<IceCandidate>) + Send + Sync + 'static,
    {
        self.callbacks.on_ice = Some(Arc::new(f));
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: PeerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default open timeout for `channel()`.
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.config.open_timeout = Some(timeout);
        self
    }

    /// Set the default binary representation.
    pub fn binary_type(mut self, binary_type: BinaryType) -> Self {
        self.config.binary_type = binary_type;
        self
    }

    /// Build the peer and subscribe to the link's events.
    pub fn build(self) -> Peer<L> {
        let inner = Arc::new(PeerInner {
            link: self.link,
            config: self.config,
            registry: Mutex::new(Registry::new()),
            callbacks: self.callbacks,
            closed: AtomicBool::new(false),
        });

        let link = &inner.link;

        let weak = Arc::downgrade(&inner);
        link.on_ice_candidate(Some(Arc::new(move |candidate| {
            if let Some(inner) = weak.upgrade() {
                inner.on_ice_candidate(candidate);
            }
        })));

        let weak = Arc::downgrade(&inner);
        link.on_data_channel(Some(Arc::new(move |data_channel| {
            if let Some(inner) = weak.upgrade() {
                inner.on_remote_channel(data_channel);
            }
        })));

        let weak = Arc::downgrade(&inner);
        link.on_state_change(Some(Arc::new(move |()| {
            if let Some(inner) = weak.upgrade() {
                inner.on_state_change();
            }
        })));

        let weak = Arc::downgrade(&inner);
        link.on_close(Some(Arc::new(move |()| {
            if let Some(inner) = weak.upgrade() {
                tracing::debug!("link closed");
                inner.close();
            }
        })));

        Peer { inner }
    }
}

/// A peer connection multiplexing named datagram channels over one link.
///
/// Cloning yields another handle to the same peer.
///
/// # Example
///
/// ```ignore
/// let peer = PeerBuilder::new(link)
///     .on_channel(|channel| println!("channel {}", channel.id()))
///     .on_ice(move |candidate| signaling.send_candidate(candidate))
///     .on_close(|| println!("peer closed"))
///     .build();
///
/// let offer = peer.offer().await?;
/// signaling.send_offer(offer);
/// peer.set_remote_description(signaling.recv_answer().await).await?;
///
/// let chat = peer.channel("chat", ChannelOptions::default()).await?;
/// chat.send(&b"hello"[..])?;
/// ```
pub struct Peer<L: PeerLink> {
    inner: Arc<PeerInner<L>>,
}

impl<L: PeerLink> Peer<L> {
    /// Start building a peer around `link`.
    pub fn builder(link: Arc<L>) -> PeerBuilder<L> {
        PeerBuilder::new(link)
    }

    /// Open a named channel and wait for it to become usable.
    ///
    /// The channel is unordered and unreliable. Once the underlying channel
    /// opens it is registered under `label`, `on_channel` fires, and this
    /// call completes with it.
    ///
    /// # Errors
    ///
    /// - [`PeerError::Closed`]: the peer is closed, or closed while waiting
    /// - [`PeerError::DuplicateLabel`]: `label` is pending or open
    /// - [`PeerError::ChannelClosed`]: the channel closed before opening
    /// - [`PeerError::OpenTimeout`]: the configured timeout elapsed
    /// - [`PeerError::Link`]: the engine refused to create the channel
    ///
    /// Without a timeout the call waits for as long as the channel stays
    /// pending. Dropping the returned future does not cancel the request.
    pub async fn channel(
        &self,
        label: &str,
        options: ChannelOptions,
    ) -> PeerResult<Channel<L::Channel>> {
        let (binary_type, open_timeout) = options.resolve(&self.inner.config);
        let (data_channel, mut completion) = self.inner.begin_open(label, binary_type)?;

        let outcome = match open_timeout {
            None => completion.await.ok(),
            Some(timeout) => match tokio::time::timeout(timeout, &mut completion).await {
                Ok(outcome) => outcome.ok(),
                Err(_) if self.inner.abandon(&data_channel) => {
                    tracing::debug!(label, ?timeout, "channel open timed out");
                    return Err(PeerError::OpenTimeout {
                        label: label.to_owned(),
                        timeout,
                    });
                }
                // Settled between the deadline and the abandon.
                Err(_) => completion.try_recv().ok(),
            },
        };

        outcome.ok_or_else(|| {
            if self.inner.is_closed() {
                PeerError::Closed
            } else {
                PeerError::ChannelClosed(label.to_owned())
            }
        })
    }

    /// Create an offer and apply it as the local description.
    ///
    /// Failures are logged and returned as [`PeerError::Handshake`].
    pub async fn offer(&self) -> PeerResult<SessionDescription> {
        let description = self.inner.link.create_offer().await.map_err(|err| {
            tracing::warn!(error = %err, "failed to create offer");
            PeerError::handshake(err)
        })?;
        self.apply_local(description).await
    }

    /// Create an answer and apply it as the local description.
    ///
    /// Requires a remote offer applied with [`Peer::set_remote_description`].
    /// Failures are logged and returned as [`PeerError::Handshake`].
    pub async fn answer(&self) -> PeerResult<SessionDescription> {
        let description = self.inner.link.create_answer().await.map_err(|err| {
            tracing::warn!(error = %err, "failed to create answer");
            PeerError::handshake(err)
        })?;
        self.apply_local(description).await
    }

    /// Apply a remote offer and answer it.
    pub async fn accept(&self, offer: SessionDescription) -> PeerResult<SessionDescription> {
        self.set_remote_description(offer).await?;
        self.answer().await
    }

    /// Apply a description received from the remote side.
    pub async fn set_remote_description(&self, description: SessionDescription) -> PeerResult<()> {
        tracing::debug!(sdp_type = %description.sdp_type, "applying remote description");
        self.inner
            .link
            .set_remote_description(description)
            .await
            .map_err(PeerError::link)
    }

    /// Add a candidate received from the remote side.
    ///
    /// `None`, the end-of-candidates marker, is ignored.
    pub async fn add_ice_candidate(&self, candidate: Option<IceCandidate>) -> PeerResult<()> {
        let Some(candidate) = candidate else {
            return Ok(());
        };
        self.inner
            .link
            .add_ice_candidate(candidate)
            .await
            .map_err(PeerError::link)
    }

    /// Close the link and every channel, then call `on_close`.
    ///
    /// Runs once per peer, however many times or from wherever it is
    /// triggered.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Check if the close sequence has run.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Registered channel with this label.
    pub fn get(&self, label: &str) -> Option<Channel<L::Channel>> {
        self.inner.registry.lock().get(label)
    }

    /// Registered labels, sorted.
    pub fn labels(&self) -> Vec<String> {
        self.inner.registry.lock().labels()
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Check if no channel is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `channel()` requests waiting for their channel to open.
    pub fn pending(&self) -> usize {
        self.inner.registry.lock().pending_len()
    }

    /// Connection state of the link.
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.link.connection_state()
    }

    /// Negotiation state of the link.
    pub fn signaling_state(&self) -> SignalingState {
        self.inner.link.signaling_state()
    }

    /// The wrapped link.
    pub fn link(&self) -> &Arc<L> {
        &self.inner.link
    }

    /// Peer configuration.
    pub fn config(&self) -> &PeerConfig {
        &self.inner.config
    }

    async fn apply_local(&self, description: SessionDescription) -> PeerResult<SessionDescription> {
        self.inner
            .link
            .set_local_description(description.clone())
            .await
            .map_err(|err| {
                tracing::warn!(error = %err, "failed to apply local description");
                PeerError::handshake(err)
            })?;
        tracing::debug!(sdp_type = %description.sdp_type, "local description applied");
        Ok(description)
    }
}

impl<L: PeerLink> PeerInner<L> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Create the underlying channel and park a pending request for it.
    fn begin_open(
        self: &Arc<Self>,
        label: &str,
        binary_type: BinaryType,
    ) -> PeerResult<(Arc<L::Channel>, oneshot::Receiver<Channel<L::Channel>>)> {
        {
            let registry = self.registry.lock();
            if self.is_closed() {
                return Err(PeerError::Closed);
            }
            if registry.is_taken(label) {
                return Err(PeerError::DuplicateLabel(label.to_owned()));
            }
        }

        let data_channel = self
            .link
            .create_data_channel(label, DATA_CHANNEL_INIT)
            .map_err(PeerError::link)?;
        data_channel.set_binary_type(binary_type);

        let (tx, rx) = oneshot::channel();
        let refused = {
            let mut registry = self.registry.lock();
            if self.is_closed() {
                Some(PeerError::Closed)
            } else if registry.is_taken(label) {
                Some(PeerError::DuplicateLabel(label.to_owned()))
            } else {
                registry.begin(
                    label,
                    Pending {
                        data_channel: data_channel.clone(),
                        binary_type,
                        completion: tx,
                    },
                );
                None
            }
        };
        if let Some(err) = refused {
            data_channel.close();
            return Err(err);
        }
        tracing::debug!(label, "channel requested");

        let weak = Arc::downgrade(self);
        let weak_channel = Arc::downgrade(&data_channel);
        data_channel.on_open(Some(Arc::new(move |()| {
            if let (Some(inner), Some(data_channel)) = (weak.upgrade(), weak_channel.upgrade()) {
                inner.complete_open(&data_channel);
            }
        })));

        let weak = Arc::downgrade(self);
        let weak_channel = Arc::downgrade(&data_channel);
        data_channel.on_close(Some(Arc::new(move |()| {
            if let (Some(inner), Some(data_channel)) = (weak.upgrade(), weak_channel.upgrade()) {
                if inner.abandon(&data_channel) {
                    tracing::debug!(label = data_channel.label(), "channel closed before opening");
                }
            }
        })));

        // The engine may have opened or closed it before we were listening.
        match data_channel.ready_state() {
            ReadyState::Open => self.complete_open(&data_channel),
            ReadyState::Closing | ReadyState::Closed => {
                self.abandon(&data_channel);
            }
            ReadyState::Connecting => {}
        }

        Ok((data_channel, rx))
    }

    /// Register a locally requested channel once its open event fires.
    fn complete_open(&self, data_channel: &Arc<L::Channel>) {
        let (channel, completion) = {
            let mut registry = self.registry.lock();
            let Some(pending) = registry.take_pending(data_channel) else {
                return;
            };
            let channel = Channel::new(pending.data_channel, pending.binary_type);
            registry.insert(channel.clone());
            (channel, pending.completion)
        };
        data_channel.on_open(None);

        tracing::debug!(label = channel.id(), "channel registered");
        self.emit_channel(channel.clone());
        // The caller may have stopped waiting; the channel stays registered.
        let _ = completion.send(channel);
    }

    /// Drop the pending request for this channel and close it. Returns
    /// `false` if it was no longer pending.
    fn abandon(&self, data_channel: &Arc<L::Channel>) -> bool {
        let pending = self.registry.lock().take_pending(data_channel);
        let Some(pending) = pending else {
            return false;
        };
        data_channel.on_open(None);
        data_channel.on_close(None);
        if !data_channel.ready_state().is_closing_or_closed() {
            data_channel.close();
        }
        drop(pending);
        true
    }

    fn on_ice_candidate(&self, candidate: Option<IceCandidate>) {
        if self.is_closed() {
            return;
        }
        tracing::trace!(end = candidate.is_none(), "local candidate");
        if let Some(on_ice) = &self.callbacks.on_ice {
            on_ice(candidate);
        }
    }

    fn on_remote_channel(&self, data_channel: Arc<L::Channel>) {
        let label = data_channel.label().to_owned();
        let registered = {
            let mut registry = self.registry.lock();
            if self.is_closed() {
                None
            } else if registry.is_taken(&label) {
                tracing::debug!(%label, "remote channel ignored, label in use");
                return;
            } else {
                data_channel.set_binary_type(self.config.binary_type);
                let channel = Channel::new(data_channel.clone(), self.config.binary_type);
                registry.insert(channel.clone());
                Some(channel)
            }
        };

        match registered {
            Some(channel) => {
                tracing::debug!(%label, "remote channel registered");
                self.emit_channel(channel);
            }
            None => data_channel.close(),
        }
    }

    fn on_state_change(&self) {
        let state = self.link.connection_state();
        tracing::trace!(?state, "link state changed");
        if state.is_terminal() {
            tracing::debug!(?state, "link lost");
            self.close();
        }
    }

    fn emit_channel(&self, channel: Channel<L::Channel>) {
        if let Some(on_channel) = &self.callbacks.on_channel {
            on_channel(channel);
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("closing peer");

        if self.link.connection_state() != ConnectionState::Closed {
            self.link.close();
        }

        let (channels, pending) = self.registry.lock().drain();
        for request in pending {
            let data_channel = &request.data_channel;
            data_channel.on_open(None);
            data_channel.on_close(None);
            if !data_channel.ready_state().is_closing_or_closed() {
                data_channel.close();
            }
        }
        for channel in channels {
            channel.close();
        }

        if let Some(on_close) = &self.callbacks.on_close {
            on_close();
        }
    }
}

impl<L: PeerLink> Clone for Peer<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: PeerLink> fmt::Debug for Peer<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("channels", &self.labels())
            .field("closed", &self.is_closed())
            .field("config", &self.inner.config)
            .finish()
    }
}
