//! Two peers talking over a paired in-memory link.
//!
//! Covers the full flow: offer/answer, candidate exchange, channels opened
//! from either side, datagram delivery, and close propagation.

#![cfg(feature = "memory")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use web_udp::core::{ConnectionState, IceCandidate, SignalingState};
use web_udp::link::memory::{MemoryChannel, MemoryLink};
use web_udp::{Channel, ChannelOptions, Connection, Peer, PeerError};

fn init_tracing() {
    static ONCE: OnceLock<()> = OnceLock::new();
    ONCE.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

// ─── Test Helpers ────────────────────────────────────────────────────────────

#[derive(Default)]
struct Observed {
    channels: Mutex<Vec<Channel<MemoryChannel>>>,
    candidates: Mutex<Vec<Option<IceCandidate>>>,
    closes: AtomicUsize,
}

struct Side {
    link: Arc<MemoryLink>,
    peer: Peer<MemoryLink>,
    observed: Arc<Observed>,
}

impl Side {
    fn new(link: Arc<MemoryLink>) -> Self {
        let observed = Arc::new(Observed::default());
        let (o1, o2, o3) = (observed.clone(), observed.clone(), observed.clone());
        let peer = Peer::builder(link.clone())
            .on_channel(move |channel| o1.channels.lock().push(channel))
            .on_ice(move |candidate| o2.candidates.lock().push(candidate))
            .on_close(move || {
                o3.closes.fetch_add(1, Ordering::SeqCst);
            })
            .build();
        Self {
            link,
            peer,
            observed,
        }
    }

    fn take_candidates(&self) -> Vec<Option<IceCandidate>> {
        std::mem::take(&mut *self.observed.candidates.lock())
    }

    fn close_count(&self) -> usize {
        self.observed.closes.load(Ordering::SeqCst)
    }
}

fn pair() -> (Side, Side) {
    init_tracing();
    let (left, right) = MemoryLink::pair();
    (Side::new(left), Side::new(right))
}

/// Run offer/answer and trickle candidates both ways.
async fn connect(caller: &Side, callee: &Side) {
    let offer = caller.peer.offer().await.unwrap();
    let answer = callee.peer.accept(offer).await.unwrap();
    caller.peer.set_remote_description(answer).await.unwrap();

    for candidate in caller.take_candidates() {
        callee.peer.add_ice_candidate(candidate).await.unwrap();
    }
    for candidate in callee.take_candidates() {
        caller.peer.add_ice_candidate(candidate).await.unwrap();
    }
}

async fn connected_pair() -> (Side, Side) {
    let (caller, callee) = pair();
    connect(&caller, &callee).await;
    (caller, callee)
}

async fn recv(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Bytes>) -> Bytes {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for a datagram")
        .expect("channel closed")
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_handshake_connects_both_sides() {
    let (caller, callee) = connected_pair().await;

    assert_eq!(caller.peer.connection_state(), ConnectionState::Connected);
    assert_eq!(callee.peer.connection_state(), ConnectionState::Connected);
    assert_eq!(caller.peer.signaling_state(), SignalingState::Stable);

    // One host candidate each way; the end marker is not forwarded.
    assert_eq!(caller.link.added_candidates().len(), 1);
    assert_eq!(callee.link.added_candidates().len(), 1);
}

#[tokio::test]
async fn test_channel_surfaces_on_both_sides() {
    let (caller, callee) = connected_pair().await;

    let local = caller
        .peer
        .channel("chat", ChannelOptions::default())
        .await
        .unwrap();

    assert_eq!(local.id(), "chat");
    assert!(local.data_channel().init().is_unreliable());

    let remote = callee.peer.get("chat").unwrap();
    assert_eq!(remote.id(), "chat");
    assert!(remote.is_open());
    assert_eq!(caller.observed.channels.lock().len(), 1);
    assert_eq!(callee.observed.channels.lock().len(), 1);
}

#[tokio::test]
async fn test_datagrams_flow_both_ways() {
    let (caller, callee) = connected_pair().await;
    let local = caller
        .peer
        .channel("game", ChannelOptions::default())
        .await
        .unwrap();
    let remote = callee.peer.get("game").unwrap();

    let mut at_callee = remote.messages().listen();
    let mut at_caller = local.messages().listen();

    local.send(Bytes::from_static(b"ping")).unwrap();
    remote.send(&b"pong"[..]).unwrap();

    assert_eq!(recv(&mut at_callee).await, Bytes::from_static(b"ping"));
    assert_eq!(recv(&mut at_caller).await, Bytes::from_static(b"pong"));
}

#[tokio::test]
async fn test_channels_through_connection_trait() {
    let (caller, callee) = connected_pair().await;
    caller
        .peer
        .channel("state", ChannelOptions::default())
        .await
        .unwrap();

    let remote = callee.peer.get("state").unwrap();
    let received = Arc::new(Mutex::new(Vec::new()));
    let r = received.clone();
    remote.messages().subscribe(move |data| r.lock().push(data.clone()));

    let conn: &dyn Connection = &caller.peer.get("state").unwrap();
    conn.send(Bytes::from_static(&[0, 1, 2, 255])).unwrap();

    assert_eq!(*received.lock(), vec![Bytes::from_static(&[0, 1, 2, 255])]);
}

#[tokio::test]
async fn test_channel_requested_before_connect() {
    let (caller, callee) = pair();

    let request = tokio::spawn({
        let peer = caller.peer.clone();
        async move { peer.channel("early", ChannelOptions::default()).await }
    });
    while caller.peer.pending() == 0 {
        tokio::task::yield_now().await;
    }

    connect(&caller, &callee).await;

    let channel = request.await.unwrap().unwrap();
    assert_eq!(channel.id(), "early");
    assert!(callee.peer.get("early").is_some());
}

#[tokio::test]
async fn test_simultaneous_open_of_same_label() {
    let (caller, callee) = pair();

    let spawn_request = |peer: &Peer<MemoryLink>| {
        let peer = peer.clone();
        tokio::spawn(async move { peer.channel("sync", ChannelOptions::default()).await })
    };
    let from_caller = spawn_request(&caller.peer);
    let from_callee = spawn_request(&callee.peer);
    while caller.peer.pending() == 0 || callee.peer.pending() == 0 {
        tokio::task::yield_now().await;
    }

    connect(&caller, &callee).await;

    let a = from_caller.await.unwrap().unwrap();
    let b = from_callee.await.unwrap().unwrap();

    // Each side keeps its own request; the other side's surfaced channel is
    // ignored.
    assert!(caller.peer.get("sync").unwrap().ptr_eq(&a));
    assert!(callee.peer.get("sync").unwrap().ptr_eq(&b));
    assert_eq!(caller.observed.channels.lock().len(), 1);
    assert_eq!(callee.observed.channels.lock().len(), 1);
}

#[tokio::test]
async fn test_close_propagates_to_remote_peer() {
    let (caller, callee) = connected_pair().await;
    let local = caller
        .peer
        .channel("chat", ChannelOptions::default())
        .await
        .unwrap();
    let remote = callee.peer.get("chat").unwrap();

    let remote_closed = Arc::new(AtomicUsize::new(0));
    let rc = remote_closed.clone();
    remote.closed().subscribe(move |_| {
        rc.fetch_add(1, Ordering::SeqCst);
    });

    caller.peer.close();

    assert!(caller.peer.is_closed());
    assert!(!local.is_open());
    assert_eq!(caller.close_count(), 1);

    assert!(callee.peer.is_closed());
    assert!(callee.peer.is_empty());
    assert_eq!(callee.close_count(), 1);
    assert_eq!(remote_closed.load(Ordering::SeqCst), 1);

    // Sending on a closed channel is a silent no-op.
    local.send(Bytes::from_static(b"late")).unwrap();
    assert!(matches!(
        caller.peer.channel("again", ChannelOptions::default()).await,
        Err(PeerError::Closed)
    ));
}

#[tokio::test]
async fn test_closing_one_channel_keeps_peer_open() {
    let (caller, callee) = connected_pair().await;
    let chat = caller
        .peer
        .channel("chat", ChannelOptions::default())
        .await
        .unwrap();
    caller
        .peer
        .channel("game", ChannelOptions::default())
        .await
        .unwrap();

    chat.close();

    assert!(!callee.peer.get("chat").unwrap().is_open());
    assert!(callee.peer.get("game").unwrap().is_open());
    assert!(!caller.peer.is_closed());
    assert!(!callee.peer.is_closed());

    // The label is free again once its channel has closed.
    let reopened = caller
        .peer
        .channel("chat", ChannelOptions::default())
        .await
        .unwrap();
    assert!(reopened.is_open());
    assert!(callee.peer.get("chat").unwrap().is_open());
}
