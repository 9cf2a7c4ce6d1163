//! Subscription fabric
//!
//! In-process fan-out of channel messages to connected clients. Channels
//! are opaque strings (`level2:BTC-USDT`, `order:BTC-USDT:42`, …); the
//! fabric provides no durability and never blocks a publisher: a
//! subscriber whose queue is full loses the message and recovers through
//! the snapshot-resend path.

use dashmap::DashMap;
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::messages::ChannelMessage;

pub type ClientId = u64;

/// Channel → subscriber table. Publishing takes a read view; subscribing
/// and unsubscribing write.
#[derive(Default)]
pub struct Subscription {
    channels: DashMap<String, HashMap<ClientId, mpsc::Sender<ChannelMessage>>>,
}

impl Subscription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client on a channel. Returns false if it was already
    /// subscribed.
    pub fn subscribe(
        &self,
        channel: &str,
        client_id: ClientId,
        tx: mpsc::Sender<ChannelMessage>,
    ) -> bool {
        let mut subscribers = self.channels.entry(channel.to_string()).or_default();
        if subscribers.contains_key(&client_id) {
            return false;
        }
        subscribers.insert(client_id, tx);
        true
    }

    /// Remove a client from a channel. Returns false if it was not
    /// subscribed.
    pub fn unsubscribe(&self, channel: &str, client_id: ClientId) -> bool {
        match self.channels.get_mut(channel) {
            Some(mut subscribers) => subscribers.remove(&client_id).is_some(),
            None => false,
        }
    }

    /// Enqueue a message to every subscriber of `channel` without
    /// blocking.
    pub fn publish(&self, channel: &str, msg: ChannelMessage) {
        let Some(subscribers) = self.channels.get(channel) else {
            return;
        };
        for (client_id, tx) in subscribers.iter() {
            if tx.try_send(msg.clone()).is_err() {
                tracing::warn!(client_id, channel, "subscriber queue full, dropping message");
            }
        }
    }

    /// Number of subscribers on a channel, for diagnostics.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, |subs| subs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Level2Change;

    fn change(seq: u64) -> ChannelMessage {
        ChannelMessage::Level2(Level2Change {
            product_id: "BTC-USDT".to_string(),
            seq,
            side: "buy".to_string(),
            price: "100".to_string(),
            size: "1".to_string(),
        })
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let sub = Subscription::new();
        let (tx, _rx) = mpsc::channel(8);

        assert!(sub.subscribe("level2:BTC-USDT", 1, tx.clone()));
        assert!(!sub.subscribe("level2:BTC-USDT", 1, tx));
        assert_eq!(sub.subscriber_count("level2:BTC-USDT"), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let sub = Subscription::new();
        let (tx, _rx) = mpsc::channel(8);

        assert!(!sub.unsubscribe("level2:BTC-USDT", 1));
        sub.subscribe("level2:BTC-USDT", 1, tx);
        assert!(sub.unsubscribe("level2:BTC-USDT", 1));
        assert!(!sub.unsubscribe("level2:BTC-USDT", 1));
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let sub = Subscription::new();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        sub.subscribe("level2:BTC-USDT", 1, tx1);
        sub.subscribe("level2:BTC-USDT", 2, tx2);

        sub.publish("level2:BTC-USDT", change(1));

        assert!(matches!(
            rx1.recv().await.unwrap(),
            ChannelMessage::Level2(c) if c.seq == 1
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            ChannelMessage::Level2(c) if c.seq == 1
        ));
    }

    #[tokio::test]
    async fn test_publish_to_empty_channel_is_noop() {
        let sub = Subscription::new();
        sub.publish("level2:NOPE-USD", change(1));
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let sub = Subscription::new();
        let (tx, mut rx) = mpsc::channel(1);
        sub.subscribe("level2:BTC-USDT", 1, tx);

        sub.publish("level2:BTC-USDT", change(1));
        sub.publish("level2:BTC-USDT", change(2)); // dropped, queue full

        assert!(matches!(
            rx.recv().await.unwrap(),
            ChannelMessage::Level2(c) if c.seq == 1
        ));
        assert!(rx.try_recv().is_err());
    }
}
