//! In-memory relay for tests.
//!
//! Simulates the behavior of a real relay without any network: topics fan
//! out to every subscribed client except the publisher (relays do not echo
//! a client's own publishes back to it), and delivery order per topic is
//! publish order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::relay::RelayClient;
use pairkit_lib::{PairingError, RelayDescriptor, Result, Topic};

type Subscribers = HashMap<String, Vec<(u64, mpsc::UnboundedSender<String>)>>;

/// Shared in-memory relay. Hand one [`MemoryRelayClient`] to each
/// controller under test via [`MemoryRelay::client`].
#[derive(Clone, Default)]
pub struct MemoryRelay {
    topics: Arc<Mutex<Subscribers>>,
    next_client: Arc<AtomicU64>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a client handle with its own identity.
    pub fn client(&self) -> MemoryRelayClient {
        MemoryRelayClient {
            id: self.next_client.fetch_add(1, Ordering::Relaxed),
            topics: self.topics.clone(),
        }
    }

    /// Number of live subscriptions on a topic, for assertions.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.topics
            .lock()
            .map(|t| t.get(topic.as_str()).map(|subs| subs.len()).unwrap_or(0))
            .unwrap_or(0)
    }
}

/// One client's handle onto a [`MemoryRelay`].
pub struct MemoryRelayClient {
    id: u64,
    topics: Arc<Mutex<Subscribers>>,
}

#[async_trait]
impl RelayClient for MemoryRelayClient {
    async fn publish(
        &self,
        topic: &Topic,
        message: String,
        _relay: &RelayDescriptor,
    ) -> Result<()> {
        let mut topics = lock(&self.topics)?;
        if let Some(subs) = topics.get_mut(topic.as_str()) {
            subs.retain(|(client, tx)| *client == self.id || tx.send(message.clone()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &Topic,
        _relay: &RelayDescriptor,
    ) -> Result<mpsc::UnboundedReceiver<String>> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.topics)?
            .entry(topic.as_str().to_string())
            .or_default()
            .push((self.id, tx));
        Ok(rx)
    }

    async fn unsubscribe(&self, topic: &Topic) -> Result<()> {
        let mut topics = lock(&self.topics)?;
        if let Some(subs) = topics.get_mut(topic.as_str()) {
            subs.retain(|(client, _)| *client != self.id);
            if subs.is_empty() {
                topics.remove(topic.as_str());
            }
        }
        Ok(())
    }
}

fn lock(topics: &Mutex<Subscribers>) -> Result<std::sync::MutexGuard<'_, Subscribers>> {
    topics
        .lock()
        .map_err(|_| PairingError::Internal("memory relay lock poisoned".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publisher_does_not_hear_its_own_messages() {
        let relay = MemoryRelay::new();
        let a = relay.client();
        let b = relay.client();
        let topic = Topic::generate();

        let mut a_rx = a.subscribe(&topic, &RelayDescriptor::default()).await.unwrap();
        let mut b_rx = b.subscribe(&topic, &RelayDescriptor::default()).await.unwrap();

        a.publish(&topic, "from a".into(), &RelayDescriptor::default())
            .await
            .unwrap();

        assert_eq!(b_rx.recv().await.unwrap(), "from a");
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn delivery_preserves_publish_order() {
        let relay = MemoryRelay::new();
        let a = relay.client();
        let b = relay.client();
        let topic = Topic::generate();

        let mut b_rx = b.subscribe(&topic, &RelayDescriptor::default()).await.unwrap();
        for i in 0..5 {
            a.publish(&topic, format!("m{i}"), &RelayDescriptor::default())
                .await
                .unwrap();
        }
        for i in 0..5 {
            assert_eq!(b_rx.recv().await.unwrap(), format!("m{i}"));
        }
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let relay = MemoryRelay::new();
        let a = relay.client();
        let b = relay.client();
        let topic = Topic::generate();

        let mut b_rx = b.subscribe(&topic, &RelayDescriptor::default()).await.unwrap();
        b.unsubscribe(&topic).await.unwrap();
        assert_eq!(relay.subscriber_count(&topic), 0);

        a.publish(&topic, "late".into(), &RelayDescriptor::default())
            .await
            .unwrap();
        assert!(b_rx.try_recv().is_err());
    }
}
