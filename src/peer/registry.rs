//! Label → channel registry owned by a peer.
//!
//! Tracks open channels and local requests still waiting for their underlying
//! channel to open. A label is "taken" while it is pending or registered with
//! an open channel; a registered channel that has closed may be replaced.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::channel::Channel;
use crate::core::{BinaryType, DataChannel};

/// A local `channel()` request waiting for the open event.
pub(crate) struct Pending<C: DataChannel> {
    pub(crate) data_channel: Arc<C>,
    pub(crate) binary_type: BinaryType,
    pub(crate) completion: oneshot::Sender<Channel<C>>,
}

pub(crate) struct Registry<C: DataChannel> {
    channels: BTreeMap<String, Channel<C>>,
    pending: BTreeMap<String, Pending<C>>,
}

impl<C: DataChannel> Registry<C> {
    pub(crate) fn new() -> Self {
        Self {
            channels: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }

    /// Check if `label` is pending or held by an open channel.
    pub(crate) fn is_taken(&self, label: &str) -> bool {
        self.pending.contains_key(label)
            || self
                .channels
                .get(label)
                .is_some_and(|channel| channel.is_open())
    }

    pub(crate) fn begin(&mut self, label: &str, pending: Pending<C>) {
        self.pending.insert(label.to_owned(), pending);
    }

    /// Remove the pending request for exactly this underlying channel.
    pub(crate) fn take_pending(&mut self, data_channel: &Arc<C>) -> Option<Pending<C>> {
        let label = data_channel.label();
        let matches = self
            .pending
            .get(label)
            .is_some_and(|pending| Arc::ptr_eq(&pending.data_channel, data_channel));
        if matches {
            self.pending.remove(label)
        } else {
            None
        }
    }

    /// Register a channel under its label, returning the one it replaced.
    pub(crate) fn insert(&mut self, channel: Channel<C>) -> Option<Channel<C>> {
        self.channels.insert(channel.id().to_owned(), channel)
    }

    pub(crate) fn get(&self, label: &str) -> Option<Channel<C>> {
        self.channels.get(label).cloned()
    }

    pub(crate) fn labels(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.channels.len()
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Empty the registry.
    pub(crate) fn drain(&mut self) -> (Vec<Channel<C>>, Vec<Pending<C>>) {
        let channels = std::mem::take(&mut self.channels).into_values().collect();
        let pending = std::mem::take(&mut self.pending).into_values().collect();
        (channels, pending)
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::link::memory::MemoryChannel;

    fn pending(dc: &Arc<MemoryChannel>) -> (Pending<MemoryChannel>, oneshot::Receiver<Channel<MemoryChannel>>) {
        let (tx, rx) = oneshot::channel();
        let pending = Pending {
            data_channel: dc.clone(),
            binary_type: BinaryType::ArrayBuffer,
            completion: tx,
        };
        (pending, rx)
    }

    #[test]
    fn test_pending_label_is_taken() {
        let mut registry = Registry::new();
        let dc = MemoryChannel::new("chat");
        let (p, _rx) = pending(&dc);

        assert!(!registry.is_taken("chat"));
        registry.begin("chat", p);
        assert!(registry.is_taken("chat"));
        assert_eq!(registry.pending_len(), 1);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_take_pending_matches_channel_identity() {
        let mut registry = Registry::new();
        let first = MemoryChannel::new("chat");
        let second = MemoryChannel::new("chat");
        let (p, _rx) = pending(&first);
        registry.begin("chat", p);

        assert!(registry.take_pending(&second).is_none());
        assert!(registry.take_pending(&first).is_some());
        assert!(registry.take_pending(&first).is_none());
    }

    #[test]
    fn test_closed_channel_frees_label() {
        let mut registry = Registry::new();
        let dc = MemoryChannel::new("chat");
        dc.open();
        let channel = Channel::new(dc, BinaryType::ArrayBuffer);
        registry.insert(channel.clone());

        assert!(registry.is_taken("chat"));
        channel.close();
        assert!(!registry.is_taken("chat"));
        assert_eq!(registry.labels(), vec!["chat".to_string()]);
    }

    #[tokio::test]
    async fn test_drain_drops_completions() {
        let mut registry = Registry::new();
        let dc = MemoryChannel::new("a");
        let (p, rx) = pending(&dc);
        registry.begin("a", p);

        let open = MemoryChannel::new("b");
        open.open();
        registry.insert(Channel::new(open, BinaryType::ArrayBuffer));

        let (channels, pending) = registry.drain();
        assert_eq!(channels.len(), 1);
        assert_eq!(pending.len(), 1);
        drop(pending);

        assert!(rx.await.is_err());
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.pending_len(), 0);
    }
}
