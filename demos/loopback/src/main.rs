//! web-udp loopback demo
//!
//! Connects two peers over an in-memory link pair, relaying descriptions and
//! candidates through in-process signaling queues. The caller opens a channel
//! and sends pings, which the callee echoes back.
//!
//! Environment variables:
//! - LOOPBACK_LABEL: Channel label (default "echo")
//! - LOOPBACK_COUNT: Number of pings (default 5)
//! - RUST_LOG: Log filter (default "info")

use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use web_udp::core::IceCandidate;
use web_udp::link::memory::{MemoryChannel, MemoryLink};
use web_udp::{Channel, ChannelOptions, Peer, PeerError};

const DEFAULT_LABEL: &str = "echo";
const DEFAULT_COUNT: usize = 5;
const REPLY_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
enum DemoError {
    #[error("invalid {name}: {value}")]
    Config { name: &'static str, value: String },

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error("no reply to ping {0}")]
    NoReply(usize),
}

struct Settings {
    label: String,
    count: usize,
}

impl Settings {
    fn from_env() -> Result<Self, DemoError> {
        let label = std::env::var("LOOPBACK_LABEL").unwrap_or_else(|_| DEFAULT_LABEL.into());
        let count = match std::env::var("LOOPBACK_COUNT") {
            Ok(value) => value.parse().map_err(|_| DemoError::Config {
                name: "LOOPBACK_COUNT",
                value,
            })?,
            Err(_) => DEFAULT_COUNT,
        };
        Ok(Self { label, count })
    }
}

/// Build a peer whose local candidates go into a signaling queue.
fn peer_with_signaling(
    name: &'static str,
    link: std::sync::Arc<MemoryLink>,
) -> (Peer<MemoryLink>, mpsc::UnboundedReceiver<Option<IceCandidate>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let peer = Peer::builder(link)
        .on_ice(move |candidate| {
            let _ = tx.send(candidate);
        })
        .on_channel(move |channel| {
            tracing::info!(peer = name, label = channel.id(), "channel ready");
        })
        .on_close(move || tracing::info!(peer = name, "peer closed"))
        .build();
    (peer, rx)
}

/// Echo every datagram back until the channel closes.
fn spawn_echo(channel: Channel<MemoryChannel>) {
    let mut messages = channel.messages().listen();
    let mut closed = channel.closed().listen();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(message) = messages.recv() => {
                    if let Err(err) = channel.send(message) {
                        tracing::warn!(error = %err, "echo failed");
                    }
                }
                _ = closed.recv() => break,
            }
        }
    });
}

async fn relay_candidates(
    from: &mut mpsc::UnboundedReceiver<Option<IceCandidate>>,
    to: &Peer<MemoryLink>,
) -> Result<(), DemoError> {
    while let Ok(candidate) = from.try_recv() {
        to.add_ice_candidate(candidate).await?;
    }
    Ok(())
}

async fn run(settings: Settings) -> Result<(), DemoError> {
    let (left, right) = MemoryLink::pair();
    let (caller, mut caller_ice) = peer_with_signaling("caller", left);
    let (callee, mut callee_ice) = peer_with_signaling("callee", right);

    let offer = caller.offer().await?;
    tracing::info!(sdp_type = %offer.sdp_type, "offer created");
    let answer = callee.accept(offer).await?;
    tracing::info!(sdp_type = %answer.sdp_type, "answer created");
    caller.set_remote_description(answer).await?;

    relay_candidates(&mut caller_ice, &callee).await?;
    relay_candidates(&mut callee_ice, &caller).await?;
    tracing::info!(state = ?caller.connection_state(), "link up");

    let channel = caller
        .channel(&settings.label, ChannelOptions::default())
        .await?;
    let Some(remote) = callee.get(&settings.label) else {
        return Err(PeerError::ChannelClosed(settings.label).into());
    };
    spawn_echo(remote);

    let mut replies = channel.messages().listen();
    for seq in 0..settings.count {
        channel.send(Bytes::from(format!("ping {seq}")))?;
        let reply = tokio::time::timeout(REPLY_TIMEOUT, replies.recv())
            .await
            .ok()
            .flatten()
            .ok_or(DemoError::NoReply(seq))?;
        tracing::info!(seq, reply = %String::from_utf8_lossy(&reply), "reply");
    }

    caller.close();
    tracing::info!(callee_closed = callee.is_closed(), "done");
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let result = match Settings::from_env() {
        Ok(settings) => run(settings).await,
        Err(err) => Err(err),
    };
    if let Err(err) = result {
        tracing::error!(error = %err, "loopback failed");
        std::process::exit(1);
    }
}
