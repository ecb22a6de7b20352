//! In-process peer-link engine.
//!
//! [`MemoryLink`] and [`MemoryChannel`] implement [`PeerLink`] and
//! [`DataChannel`] without any network. They serve two purposes:
//!
//! - **Loopback pairs**: [`MemoryLink::pair`] wires two links together. The
//!   offer/answer exchange connects them, channels created on one side surface
//!   on the other, and sends are delivered to the counterpart channel.
//! - **Scripted links**: a standalone [`MemoryLink::new`] never changes state
//!   on its own. Tests drive it with [`MemoryLink::set_connection_state`],
//!   [`MemoryLink::inject_remote_channel`], [`MemoryChannel::deliver`] and
//!   friends, and inspect what the peer adapter did through the counters.
//!
//! Events fire synchronously on the calling thread. Delivery is in order and
//! lossless, which is one valid behavior of an unordered, unreliable channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;

use crate::core::{
    BinaryType, ConnectionState, DataChannel, DataChannelInit, EventHandler, IceCandidate,
    PeerLink, ReadyState, SdpType, SessionDescription, SignalingState,
};

/// Base port used for gathered host candidates.
const CANDIDATE_BASE_PORT: u64 = 50_000;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Errors raised by the in-memory engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// The link was closed.
    #[error("link closed")]
    LinkClosed,

    /// The operation is not valid in the current signaling state.
    #[error("invalid signaling state: {0}")]
    InvalidState(&'static str),

    /// Description generation was scripted to fail.
    #[error("description generation failed: {0}")]
    Generation(String),

    /// The channel is not open.
    #[error("channel not open: {0}")]
    NotOpen(String),
}

// =============================================================================
// CHANNEL
// =============================================================================

#[derive(Debug)]
struct ChannelState {
    ready_state: ReadyState,
    binary_type: BinaryType,
    sent: Vec<Bytes>,
    close_count: usize,
}

#[derive(Default)]
struct ChannelHandlers {
    on_open: Option<EventHandler<()>>,
    on_message: Option<EventHandler<Bytes>>,
    on_error: Option<EventHandler<String>>,
    on_close: Option<EventHandler<()>>,
}

/// In-memory datagram channel.
pub struct MemoryChannel {
    label: String,
    init: DataChannelInit,
    state: Mutex<ChannelState>,
    handlers: Mutex<ChannelHandlers>,
    counterpart: Mutex<Weak<MemoryChannel>>,
}

impl MemoryChannel {
    /// Create a standalone channel in the `Connecting` state.
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Self::with_init(label, DataChannelInit::default())
    }

    /// Create a standalone channel with an explicit delivery configuration.
    pub fn with_init(label: impl Into<String>, init: DataChannelInit) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            init,
            state: Mutex::new(ChannelState {
                ready_state: ReadyState::Connecting,
                binary_type: BinaryType::default(),
                sent: Vec::new(),
                close_count: 0,
            }),
            handlers: Mutex::new(ChannelHandlers::default()),
            counterpart: Mutex::new(Weak::new()),
        })
    }

    /// Wire two channels so that sends and closes reach the other side.
    fn connect(a: &Arc<Self>, b: &Arc<Self>) {
        *a.counterpart.lock() = Arc::downgrade(b);
        *b.counterpart.lock() = Arc::downgrade(a);
    }

    /// Transition `Connecting` → `Open` and fire the open event.
    pub fn open(&self) {
        {
            let mut state = self.state.lock();
            if state.ready_state != ReadyState::Connecting {
                return;
            }
            state.ready_state = ReadyState::Open;
        }
        let handler = self.handlers.lock().on_open.clone();
        if let Some(handler) = handler {
            handler(());
        }
    }

    /// Fire a message event, whatever the ready state.
    pub fn deliver(&self, data: impl Into<Bytes>) {
        let handler = self.handlers.lock().on_message.clone();
        if let Some(handler) = handler {
            handler(data.into());
        }
    }

    /// Fire an error event.
    pub fn emit_error(&self, message: impl Into<String>) {
        let handler = self.handlers.lock().on_error.clone();
        if let Some(handler) = handler {
            handler(message.into());
        }
    }

    /// Overwrite the ready state without firing events.
    pub fn set_ready_state(&self, ready_state: ReadyState) {
        self.state.lock().ready_state = ready_state;
    }

    /// Close initiated by the other side: the state becomes `Closed` and the
    /// close event fires, unless it was already closed.
    pub fn remote_close(&self) {
        {
            let mut state = self.state.lock();
            if state.ready_state == ReadyState::Closed {
                return;
            }
            state.ready_state = ReadyState::Closed;
        }
        let handler = self.handlers.lock().on_close.clone();
        if let Some(handler) = handler {
            handler(());
        }
    }

    /// Payloads accepted by `send`, in call order.
    pub fn sent(&self) -> Vec<Bytes> {
        self.state.lock().sent.clone()
    }

    /// Number of `close` calls.
    pub fn close_count(&self) -> usize {
        self.state.lock().close_count
    }

    /// Delivery configuration requested at creation.
    pub fn init(&self) -> DataChannelInit {
        self.init
    }

    /// Binary representation last configured.
    pub fn binary_type(&self) -> BinaryType {
        self.state.lock().binary_type
    }

    /// Check if a message handler is attached.
    pub fn has_message_handler(&self) -> bool {
        self.handlers.lock().on_message.is_some()
    }
}

impl DataChannel for MemoryChannel {
    type Error = MemoryError;

    fn label(&self) -> &str {
        &self.label
    }

    fn ready_state(&self) -> ReadyState {
        self.state.lock().ready_state
    }

    fn set_binary_type(&self, binary_type: BinaryType) {
        self.state.lock().binary_type = binary_type;
    }

    fn send(&self, data: &Bytes) -> Result<(), MemoryError> {
        {
            let mut state = self.state.lock();
            if state.ready_state != ReadyState::Open {
                return Err(MemoryError::NotOpen(self.label.clone()));
            }
            state.sent.push(data.clone());
        }
        let counterpart = self.counterpart.lock().upgrade();
        if let Some(counterpart) = counterpart {
            if counterpart.ready_state() == ReadyState::Open {
                counterpart.deliver(data.clone());
            }
        }
        Ok(())
    }

    fn close(&self) {
        {
            let mut state = self.state.lock();
            state.close_count += 1;
            if state.ready_state == ReadyState::Closed {
                return;
            }
            state.ready_state = ReadyState::Closed;
        }
        let handler = self.handlers.lock().on_close.clone();
        if let Some(handler) = handler {
            handler(());
        }
        let counterpart = self.counterpart.lock().upgrade();
        if let Some(counterpart) = counterpart {
            counterpart.remote_close();
        }
    }

    fn on_open(&self, handler: Option<EventHandler<()>>) {
        self.handlers.lock().on_open = handler;
    }

    fn on_message(&self, handler: Option<EventHandler<Bytes>>) {
        self.handlers.lock().on_message = handler;
    }

    fn on_error(&self, handler: Option<EventHandler<String>>) {
        self.handlers.lock().on_error = handler;
    }

    fn on_close(&self, handler: Option<EventHandler<()>>) {
        self.handlers.lock().on_close = handler;
    }
}

impl std::fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("label", &self.label)
            .field("state", &*self.state.lock())
            .finish()
    }
}

// =============================================================================
// LINK
// =============================================================================

#[derive(Debug)]
struct LinkState {
    connection_state: ConnectionState,
    signaling_state: SignalingState,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    added_candidates: Vec<IceCandidate>,
    channels: Vec<Arc<MemoryChannel>>,
    pending_channels: Vec<Arc<MemoryChannel>>,
    close_count: usize,
    fail_next_offer: bool,
    fail_next_answer: bool,
    version: u64,
}

#[derive(Default)]
struct LinkHandlers {
    on_ice_candidate: Option<EventHandler<Option<IceCandidate>>>,
    on_state_change: Option<EventHandler<()>>,
    on_data_channel: Option<EventHandler<Arc<MemoryChannel>>>,
    on_close: Option<EventHandler<()>>,
}

/// In-memory peer link.
pub struct MemoryLink {
    session_id: u64,
    state: Mutex<LinkState>,
    handlers: Mutex<LinkHandlers>,
    remote: Mutex<Weak<MemoryLink>>,
}

impl MemoryLink {
    /// Create a standalone, scripted link.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            session_id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(LinkState {
                connection_state: ConnectionState::New,
                signaling_state: SignalingState::Stable,
                local_description: None,
                remote_description: None,
                added_candidates: Vec::new(),
                channels: Vec::new(),
                pending_channels: Vec::new(),
                close_count: 0,
                fail_next_offer: false,
                fail_next_answer: false,
                version: 0,
            }),
            handlers: Mutex::new(LinkHandlers::default()),
            remote: Mutex::new(Weak::new()),
        })
    }

    /// Create two links wired to each other.
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let a = Self::new();
        let b = Self::new();
        *a.remote.lock() = Arc::downgrade(&b);
        *b.remote.lock() = Arc::downgrade(&a);
        (a, b)
    }

    /// Set the connection state and fire the state-change event.
    ///
    /// Reaching `Connected` opens channels created while connecting.
    pub fn set_connection_state(&self, connection_state: ConnectionState) {
        {
            let mut state = self.state.lock();
            if state.connection_state == connection_state {
                return;
            }
            state.connection_state = connection_state;
        }
        self.emit_state_change();

        if connection_state == ConnectionState::Connected {
            self.flush_channels();
            let remote = self.remote.lock().upgrade();
            if let Some(remote) = remote {
                remote.flush_channels();
            }
        }
    }

    /// Surface an already-open channel as if the remote side created it.
    pub fn inject_remote_channel(&self, label: impl Into<String>) -> Arc<MemoryChannel> {
        let channel = MemoryChannel::new(label);
        channel.set_ready_state(ReadyState::Open);
        self.surface_remote_channel(channel.clone());
        channel
    }

    /// Fire a candidate event.
    pub fn emit_ice_candidate(&self, candidate: Option<IceCandidate>) {
        let handler = self.handlers.lock().on_ice_candidate.clone();
        if let Some(handler) = handler {
            handler(candidate);
        }
    }

    /// Fire the low-level close event after marking the link closed,
    /// without counting a `close` call.
    pub fn emit_closed(&self) {
        {
            let mut state = self.state.lock();
            state.connection_state = ConnectionState::Closed;
            state.signaling_state = SignalingState::Closed;
        }
        let handler = self.handlers.lock().on_close.clone();
        if let Some(handler) = handler {
            handler(());
        }
    }

    /// Make the next `create_offer` fail.
    pub fn fail_next_offer(&self) {
        self.state.lock().fail_next_offer = true;
    }

    /// Make the next `create_answer` fail.
    pub fn fail_next_answer(&self) {
        self.state.lock().fail_next_answer = true;
    }

    /// Number of `close` calls.
    pub fn close_count(&self) -> usize {
        self.state.lock().close_count
    }

    /// Last applied local description.
    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local_description.clone()
    }

    /// Last applied remote description.
    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote_description.clone()
    }

    /// Remote candidates added, in call order.
    pub fn added_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().added_candidates.clone()
    }

    /// Every channel created on or surfaced by this link.
    pub fn channels(&self) -> Vec<Arc<MemoryChannel>> {
        self.state.lock().channels.clone()
    }

    /// Most recent channel with the given label.
    pub fn channel(&self, label: &str) -> Option<Arc<MemoryChannel>> {
        self.state
            .lock()
            .channels
            .iter()
            .rev()
            .find(|channel| channel.label() == label)
            .cloned()
    }

    fn emit_state_change(&self) {
        let handler = self.handlers.lock().on_state_change.clone();
        if let Some(handler) = handler {
            handler(());
        }
    }

    fn surface_remote_channel(&self, channel: Arc<MemoryChannel>) {
        self.state.lock().channels.push(channel.clone());
        let handler = self.handlers.lock().on_data_channel.clone();
        if let Some(handler) = handler {
            handler(channel);
        }
    }

    fn gathered_candidate(&self) -> IceCandidate {
        IceCandidate {
            candidate: format!(
                "candidate:1 1 udp 2130706431 127.0.0.1 {} typ host",
                CANDIDATE_BASE_PORT + self.session_id % 10_000
            ),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        }
    }

    fn generate(&self, sdp_type: SdpType) -> SessionDescription {
        let version = {
            let mut state = self.state.lock();
            state.version += 1;
            state.version
        };
        SessionDescription {
            sdp_type,
            sdp: format!(
                "v=0\r\no=- {} {} IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
                 m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\na=mid:0\r\n",
                self.session_id, version
            ),
        }
    }

    fn on_remote_closed(&self) {
        if self.connection_state() == ConnectionState::Closed {
            return;
        }
        self.set_connection_state(ConnectionState::Disconnected);
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connection_state == ConnectionState::Connected
    }

    /// Connect once both descriptions are applied and negotiation is stable.
    fn try_connect(&self) {
        let ready = {
            let state = self.state.lock();
            state.local_description.is_some()
                && state.remote_description.is_some()
                && state.signaling_state == SignalingState::Stable
                && matches!(
                    state.connection_state,
                    ConnectionState::New | ConnectionState::Connecting
                )
        };
        if ready {
            self.set_connection_state(ConnectionState::Connected);
        }
    }

    /// Open channels created before the link (and its remote, if paired) was
    /// connected, surfacing a counterpart on the remote first.
    fn flush_channels(&self) {
        if !self.is_connected() {
            return;
        }
        let remote = self.remote.lock().upgrade();
        if let Some(remote) = &remote {
            if !remote.is_connected() {
                return;
            }
        }

        let pending = std::mem::take(&mut self.state.lock().pending_channels);
        for channel in pending {
            if let Some(remote) = &remote {
                let counterpart = MemoryChannel::with_init(channel.label(), channel.init());
                counterpart.set_ready_state(ReadyState::Open);
                MemoryChannel::connect(&channel, &counterpart);
                remote.surface_remote_channel(counterpart);
            }
            channel.open();
        }
    }
}

impl PeerLink for MemoryLink {
    type Channel = MemoryChannel;
    type Error = MemoryError;

    async fn create_offer(&self) -> Result<SessionDescription, MemoryError> {
        {
            let mut state = self.state.lock();
            if state.connection_state == ConnectionState::Closed {
                return Err(MemoryError::LinkClosed);
            }
            if std::mem::take(&mut state.fail_next_offer) {
                return Err(MemoryError::Generation("offer".into()));
            }
        }
        Ok(self.generate(SdpType::Offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MemoryError> {
        {
            let mut state = self.state.lock();
            if state.connection_state == ConnectionState::Closed {
                return Err(MemoryError::LinkClosed);
            }
            if state.signaling_state != SignalingState::HaveRemoteOffer {
                return Err(MemoryError::InvalidState("no remote offer to answer"));
            }
            if std::mem::take(&mut state.fail_next_answer) {
                return Err(MemoryError::Generation("answer".into()));
            }
        }
        Ok(self.generate(SdpType::Answer))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MemoryError> {
        {
            let mut state = self.state.lock();
            if state.connection_state == ConnectionState::Closed {
                return Err(MemoryError::LinkClosed);
            }
            state.signaling_state = match (description.sdp_type, state.signaling_state) {
                (SdpType::Offer, SignalingState::Stable | SignalingState::HaveLocalOffer) => {
                    SignalingState::HaveLocalOffer
                }
                (SdpType::Answer, SignalingState::HaveRemoteOffer) => SignalingState::Stable,
                _ => return Err(MemoryError::InvalidState("unexpected local description")),
            };
            state.local_description = Some(description);
            if state.connection_state == ConnectionState::New {
                state.connection_state = ConnectionState::Connecting;
            }
        }
        self.emit_state_change();

        self.emit_ice_candidate(Some(self.gathered_candidate()));
        self.emit_ice_candidate(None);

        self.try_connect();
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MemoryError> {
        {
            let mut state = self.state.lock();
            if state.connection_state == ConnectionState::Closed {
                return Err(MemoryError::LinkClosed);
            }
            state.signaling_state = match (description.sdp_type, state.signaling_state) {
                (SdpType::Offer, SignalingState::Stable | SignalingState::HaveRemoteOffer) => {
                    SignalingState::HaveRemoteOffer
                }
                (SdpType::Answer, SignalingState::HaveLocalOffer) => SignalingState::Stable,
                _ => return Err(MemoryError::InvalidState("unexpected remote description")),
            };
            state.remote_description = Some(description);
        }
        self.emit_state_change();
        self.try_connect();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MemoryError> {
        let mut state = self.state.lock();
        if state.connection_state == ConnectionState::Closed {
            return Err(MemoryError::LinkClosed);
        }
        state.added_candidates.push(candidate);
        Ok(())
    }

    fn create_data_channel(
        &self,
        label: &str,
        init: DataChannelInit,
    ) -> Result<Arc<MemoryChannel>, MemoryError> {
        let channel = MemoryChannel::with_init(label, init);
        {
            let mut state = self.state.lock();
            if state.connection_state == ConnectionState::Closed {
                return Err(MemoryError::LinkClosed);
            }
            state.channels.push(channel.clone());
            state.pending_channels.push(channel.clone());
        }
        self.flush_channels();
        Ok(channel)
    }

    fn connection_state(&self) -> ConnectionState {
        self.state.lock().connection_state
    }

    fn signaling_state(&self) -> SignalingState {
        self.state.lock().signaling_state
    }

    fn close(&self) {
        let channels = {
            let mut state = self.state.lock();
            state.close_count += 1;
            if state.connection_state == ConnectionState::Closed {
                return;
            }
            state.connection_state = ConnectionState::Closed;
            state.signaling_state = SignalingState::Closed;
            state.pending_channels.clear();
            state.channels.clone()
        };

        for channel in channels {
            channel.close();
        }

        self.emit_state_change();
        let handler = self.handlers.lock().on_close.clone();
        if let Some(handler) = handler {
            handler(());
        }

        let remote = self.remote.lock().upgrade();
        if let Some(remote) = remote {
            remote.on_remote_closed();
        }
    }

    fn on_ice_candidate(&self, handler: Option<EventHandler<Option<IceCandidate>>>) {
        self.handlers.lock().on_ice_candidate = handler;
    }

    fn on_state_change(&self, handler: Option<EventHandler<()>>) {
        self.handlers.lock().on_state_change = handler;
    }

    fn on_data_channel(&self, handler: Option<EventHandler<Arc<MemoryChannel>>>) {
        self.handlers.lock().on_data_channel = handler;
    }

    fn on_close(&self, handler: Option<EventHandler<()>>) {
        self.handlers.lock().on_close = handler;
    }
}

impl std::fmt::Debug for MemoryLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryLink")
            .field("session_id", &self.session_id)
            .field("connection_state", &state.connection_state)
            .field("signaling_state", &state.signaling_state)
            .field("channels", &state.channels.len())
            .finish()
    }
}
