//! Relay client contract.
//!
//! The controller never talks to a transport directly; it publishes and
//! subscribes through this trait. Implementations are expected to deliver
//! messages for a single topic in publish order and to not echo a client's
//! own publishes back to it.

use async_trait::async_trait;
use tokio::sync::mpsc;

use pairkit_lib::{RelayDescriptor, Result, Topic};

/// Abstraction for the untrusted relay a pairing rides on.
///
/// An in-memory implementation for tests lives in [`crate::testing`].
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Publish a message on a topic.
    async fn publish(&self, topic: &Topic, message: String, relay: &RelayDescriptor)
        -> Result<()>;

    /// Subscribe to a topic. Inbound messages arrive on the returned
    /// channel in the order the relay delivers them.
    async fn subscribe(
        &self,
        topic: &Topic,
        relay: &RelayDescriptor,
    ) -> Result<mpsc::UnboundedReceiver<String>>;

    /// Drop the subscription for a topic.
    async fn unsubscribe(&self, topic: &Topic) -> Result<()>;
}
