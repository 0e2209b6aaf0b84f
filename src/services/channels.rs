use dashmap::{DashMap, mapref::entry::Entry};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::dto::events::ChannelMessage;

/// Capacity of each channel's broadcast buffer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Connection lifecycle reported by a push transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, not connected yet.
    Initialized,
    /// Handshake in progress.
    Connecting,
    /// Receiving events.
    Connected,
    /// Connection lost; retrying.
    Unavailable,
    /// Closed on purpose.
    Disconnected,
}

/// Publish/subscribe transport delivering named events per channel.
pub trait PushTransport: Send + Sync {
    /// Start receiving events published on `channel`.
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<ChannelMessage>;
    /// Release one subscription to `channel`.
    fn unsubscribe(&self, channel: &str);
    /// Observe connection state changes.
    fn connection_state(&self) -> watch::Receiver<ConnectionState>;
}

struct ChannelEntry {
    sender: broadcast::Sender<ChannelMessage>,
    subscribers: usize,
}

/// Reference-counted set of channels, each backed by a broadcast sender.
pub struct ChannelRegistry {
    channels: DashMap<String, ChannelEntry>,
    capacity: usize,
}

impl ChannelRegistry {
    /// Empty registry creating channels with `capacity` buffered events.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
        }
    }

    /// Join `channel`; the flag tells whether the channel was just created.
    pub fn join(&self, channel: &str) -> (broadcast::Receiver<ChannelMessage>, bool) {
        match self.channels.entry(channel.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.subscribers += 1;
                (entry.sender.subscribe(), false)
            }
            Entry::Vacant(vacant) => {
                let (sender, receiver) = broadcast::channel(self.capacity);
                vacant.insert(ChannelEntry {
                    sender,
                    subscribers: 1,
                });
                (receiver, true)
            }
        }
    }

    /// Leave `channel`; returns true when the last subscriber left and the channel closed.
    pub fn leave(&self, channel: &str) -> bool {
        let closed = match self.channels.get_mut(channel) {
            Some(mut entry) => {
                entry.subscribers = entry.subscribers.saturating_sub(1);
                entry.subscribers == 0
            }
            None => return false,
        };
        closed
            && self
                .channels
                .remove_if(channel, |_, entry| entry.subscribers == 0)
                .is_some()
    }

    /// Deliver `message` to `channel`; returns how many receivers got it.
    pub fn deliver(&self, channel: &str, message: ChannelMessage) -> usize {
        match self.channels.get(channel) {
            Some(entry) => entry.sender.send(message).unwrap_or(0),
            None => {
                debug!(channel, event = %message.event, "no subscriber for channel; dropping");
                0
            }
        }
    }

    /// Names of channels with at least one subscriber.
    pub fn active(&self) -> Vec<String> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }
}

/// In-process transport: publishing delivers straight to local subscribers.
pub struct LocalHub {
    registry: ChannelRegistry,
    state: watch::Sender<ConnectionState>,
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl LocalHub {
    /// Hub whose channels buffer `capacity` events; always connected.
    pub fn new(capacity: usize) -> Self {
        let (state, _rx) = watch::channel(ConnectionState::Connected);
        Self {
            registry: ChannelRegistry::new(capacity),
            state,
        }
    }

    /// Publish an already encoded message.
    pub fn publish(&self, channel: &str, message: ChannelMessage) -> usize {
        self.registry.deliver(channel, message)
    }

    /// Serialise `payload` and publish it under `event`.
    pub fn publish_json(&self, channel: &str, event: &str, payload: &impl Serialize) -> usize {
        match ChannelMessage::json(event, payload) {
            Ok(message) => self.publish(channel, message),
            Err(err) => {
                warn!(channel, event, error = %err, "failed to serialize channel payload");
                0
            }
        }
    }

    /// Report a connection state change to observers.
    pub fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Channels with at least one subscriber.
    pub fn active_channels(&self) -> Vec<String> {
        self.registry.active()
    }
}

impl PushTransport for LocalHub {
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<ChannelMessage> {
        self.registry.join(channel).0
    }

    fn unsubscribe(&self, channel: &str) {
        self.registry.leave(channel);
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_are_reference_counted() {
        let registry = ChannelRegistry::new(4);
        let (_a, created) = registry.join("jam-1");
        assert!(created);
        let (_b, created) = registry.join("jam-1");
        assert!(!created);

        assert!(!registry.leave("jam-1"));
        assert_eq!(registry.active(), vec!["jam-1".to_string()]);
        assert!(registry.leave("jam-1"));
        assert!(registry.active().is_empty());
        assert!(!registry.leave("jam-1"));
    }

    #[tokio::test]
    async fn hub_delivers_to_every_subscriber_of_the_channel() {
        let hub = LocalHub::new(8);
        let mut first = hub.subscribe("jam-1");
        let mut second = hub.subscribe("jam-1");
        let mut other = hub.subscribe("jam-2");

        let delivered = hub.publish_json("jam-1", "vote", &serde_json::json!({"songId": "x", "votes": 1}));
        assert_eq!(delivered, 2);

        assert_eq!(first.recv().await.unwrap().event, "vote");
        assert_eq!(second.recv().await.unwrap().event, "vote");
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn closing_last_subscription_ends_the_stream() {
        let hub = LocalHub::new(8);
        let mut receiver = hub.subscribe("jam-1");
        hub.unsubscribe("jam-1");

        assert!(matches!(
            receiver.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert_eq!(hub.publish_json("jam-1", "vote", &()), 0);
    }

    #[test]
    fn hub_reports_connection_state() {
        let hub = LocalHub::default();
        let mut state = hub.connection_state();
        assert_eq!(*state.borrow_and_update(), ConnectionState::Connected);
        hub.set_state(ConnectionState::Unavailable);
        assert_eq!(*state.borrow_and_update(), ConnectionState::Unavailable);
    }
}
