//! Topic-keyed subscription stores with an encryption boundary.
//!
//! The controller owns two instances: *pending* (proposal topics) and
//! *settled* (post-handshake topics). Each record holds a live relay
//! subscription; inbound messages are decrypted here, so the router only
//! ever sees plaintext JSON-RPC payloads.
//!
//! Decryption modes match the two phases of a pairing: the settled store
//! registers the symmetric shared key, while the pending store opens
//! sealed envelopes with the record's own secret key (the sender's public
//! key rides in the envelope). Messages that do not parse as envelopes
//! pass through as plaintext, which is also the outbound fallback when no
//! shared key is derivable.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::relay::RelayClient;
use pairkit_lib::rpc::JsonRpcPayload;
use pairkit_lib::{
    crypto, PairingError, PublicKey, RelayDescriptor, Result, SecretKey, SharedKey, Topic,
};

/// Which store produced an inbound payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    Pending,
    Settled,
}

impl StoreKind {
    fn resource(self) -> &'static str {
        match self {
            Self::Pending => "pending pairing",
            Self::Settled => "settled pairing",
        }
    }
}

/// A decrypted inbound message, tagged with the store that received it.
#[derive(Debug)]
pub struct InboundPayload {
    pub kind: StoreKind,
    pub topic: Topic,
    pub payload: JsonRpcPayload,
}

/// Keys used to seal outbound messages.
#[derive(Clone, Debug)]
pub struct EncryptionKeys {
    pub shared_key: SharedKey,
    pub sender_public: PublicKey,
}

/// Keys used to open inbound messages.
#[derive(Clone)]
pub enum DecryptionKeys {
    /// Symmetric shared key, registered at settlement.
    Shared(SharedKey),
    /// Our own secret key; the shared key is derived per envelope from the
    /// sender's public key it carries.
    Recipient(SecretKey),
}

/// Options attached when inserting a record.
pub struct SubscriptionOptions {
    pub relay: RelayDescriptor,
    pub encrypt: Option<EncryptionKeys>,
    pub decrypt: Option<DecryptionKeys>,
}

struct Entry<T> {
    record: T,
    relay: RelayDescriptor,
    encrypt: Option<EncryptionKeys>,
    watcher: JoinHandle<()>,
}

/// Keyed record store bound to relay subscriptions.
pub struct SubscriptionStore<T> {
    kind: StoreKind,
    relay: Arc<dyn RelayClient>,
    entries: RwLock<HashMap<Topic, Entry<T>>>,
    inbound: mpsc::UnboundedSender<InboundPayload>,
}

impl<T: Clone + Send + Sync + 'static> SubscriptionStore<T> {
    pub fn new(
        kind: StoreKind,
        relay: Arc<dyn RelayClient>,
        inbound: mpsc::UnboundedSender<InboundPayload>,
    ) -> Self {
        Self {
            kind,
            relay,
            entries: RwLock::new(HashMap::new()),
            inbound,
        }
    }

    /// Insert a record, subscribe its topic on the relay, and start
    /// forwarding decrypted inbound messages.
    pub async fn set(&self, topic: Topic, record: T, opts: SubscriptionOptions) -> Result<()> {
        let rx = self.relay.subscribe(&topic, &opts.relay).await?;
        let watcher = spawn_watcher(self.kind, topic.clone(), rx, opts.decrypt, self.inbound.clone());
        let entry = Entry {
            record,
            relay: opts.relay,
            encrypt: opts.encrypt,
            watcher,
        };
        if let Some(previous) = self.write()?.insert(topic, entry) {
            previous.watcher.abort();
        }
        Ok(())
    }

    pub fn get(&self, topic: &Topic) -> Result<T> {
        self.read()?
            .get(topic)
            .map(|entry| entry.record.clone())
            .ok_or_else(|| PairingError::not_found(self.kind.resource(), topic.as_str()))
    }

    /// Replace the record under an existing topic.
    pub fn update(&self, topic: &Topic, record: T) -> Result<T> {
        let mut entries = self.write()?;
        let entry = entries
            .get_mut(topic)
            .ok_or_else(|| PairingError::not_found(self.kind.resource(), topic.as_str()))?;
        entry.record = record.clone();
        Ok(record)
    }

    /// Remove a record, tearing down its relay subscription. Returns the
    /// removed record.
    pub async fn delete(&self, topic: &Topic, reason: &str) -> Result<T> {
        let entry = self
            .write()?
            .remove(topic)
            .ok_or_else(|| PairingError::not_found(self.kind.resource(), topic.as_str()))?;
        entry.watcher.abort();
        self.relay.unsubscribe(topic).await?;
        tracing::debug!(%topic, reason, store = ?self.kind, "subscription deleted");
        Ok(entry.record)
    }

    pub fn contains(&self, topic: &Topic) -> bool {
        self.read().map(|e| e.contains_key(topic)).unwrap_or(false)
    }

    pub fn entries(&self) -> Vec<T> {
        self.read()
            .map(|e| e.values().map(|entry| entry.record.clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Publish a payload on a stored topic. `explicit` keys override the
    /// keys registered at `set` time (used on proposal topics, where
    /// encryption keys only exist once the responder has derived them).
    pub async fn publish(
        &self,
        topic: &Topic,
        payload: &JsonRpcPayload,
        explicit: Option<&EncryptionKeys>,
    ) -> Result<()> {
        let (relay_desc, stored_keys) = {
            let entries = self.read()?;
            let entry = entries
                .get(topic)
                .ok_or_else(|| PairingError::not_found(self.kind.resource(), topic.as_str()))?;
            (entry.relay.clone(), entry.encrypt.clone())
        };
        let keys = explicit.cloned().or(stored_keys);
        publish_message(self.relay.as_ref(), topic, &relay_desc, payload, keys.as_ref()).await
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<Topic, Entry<T>>>> {
        self.entries
            .read()
            .map_err(|_| PairingError::Internal("subscription store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<Topic, Entry<T>>>> {
        self.entries
            .write()
            .map_err(|_| PairingError::Internal("subscription store lock poisoned".to_string()))
    }
}

impl<T> Drop for SubscriptionStore<T> {
    fn drop(&mut self) {
        if let Ok(mut entries) = self.entries.write() {
            for entry in entries.values() {
                entry.watcher.abort();
            }
            entries.clear();
        }
    }
}

/// Serialize, optionally seal, and publish a payload.
pub(crate) async fn publish_message(
    relay: &dyn RelayClient,
    topic: &Topic,
    relay_desc: &RelayDescriptor,
    payload: &JsonRpcPayload,
    keys: Option<&EncryptionKeys>,
) -> Result<()> {
    let plaintext = serde_json::to_string(payload)?;
    let message = match keys {
        Some(keys) => {
            let envelope = crypto::seal(&keys.shared_key, &keys.sender_public, &plaintext)?;
            serde_json::to_string(&envelope)?
        }
        None => plaintext,
    };
    relay.publish(topic, message, relay_desc).await
}

fn spawn_watcher(
    kind: StoreKind,
    topic: Topic,
    mut rx: mpsc::UnboundedReceiver<String>,
    decrypt: Option<DecryptionKeys>,
    inbound: mpsc::UnboundedSender<InboundPayload>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(raw) = rx.recv().await {
            match decode_inbound(&raw, &decrypt) {
                Ok(payload) => {
                    let event = InboundPayload {
                        kind,
                        topic: topic.clone(),
                        payload,
                    };
                    if inbound.send(event).is_err() {
                        break;
                    }
                }
                Err(err) => warn!(%topic, %err, "dropping undecodable relay message"),
            }
        }
    })
}

fn decode_inbound(raw: &str, decrypt: &Option<DecryptionKeys>) -> Result<JsonRpcPayload> {
    if let Ok(envelope) = serde_json::from_str::<crypto::Envelope>(raw) {
        let plaintext = match decrypt {
            Some(DecryptionKeys::Shared(key)) => crypto::open_with_key(key, &envelope)?,
            Some(DecryptionKeys::Recipient(secret)) => crypto::open_sealed(secret, &envelope)?,
            None => {
                return Err(PairingError::Crypto(
                    "encrypted message on a topic without decryption keys".to_string(),
                ))
            }
        };
        Ok(serde_json::from_str(&plaintext)?)
    } else {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryRelay;
    use pairkit_lib::rpc::JsonRpcRequest;

    fn store(
        relay: Arc<dyn RelayClient>,
    ) -> (
        SubscriptionStore<String>,
        mpsc::UnboundedReceiver<InboundPayload>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SubscriptionStore::new(StoreKind::Settled, relay, tx), rx)
    }

    fn plain_opts() -> SubscriptionOptions {
        SubscriptionOptions {
            relay: RelayDescriptor::default(),
            encrypt: None,
            decrypt: None,
        }
    }

    #[tokio::test]
    async fn crud_round_trip() {
        let relay = MemoryRelay::new();
        let (store, _rx) = store(Arc::new(relay.client()));
        let topic = Topic::generate();

        store
            .set(topic.clone(), "record".to_string(), plain_opts())
            .await
            .unwrap();
        assert_eq!(store.get(&topic).unwrap(), "record");
        assert_eq!(store.len(), 1);
        assert!(store.contains(&topic));

        store.update(&topic, "changed".to_string()).unwrap();
        assert_eq!(store.get(&topic).unwrap(), "changed");

        let removed = store.delete(&topic, "done").await.unwrap();
        assert_eq!(removed, "changed");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn missing_topic_is_not_found() {
        let relay = MemoryRelay::new();
        let (store, _rx) = store(Arc::new(relay.client()));
        let topic = Topic::generate();

        assert!(matches!(
            store.get(&topic),
            Err(PairingError::NotFound { .. })
        ));
        assert!(matches!(
            store.update(&topic, "x".to_string()),
            Err(PairingError::NotFound { .. })
        ));
        assert!(store.delete(&topic, "gone").await.is_err());
    }

    #[tokio::test]
    async fn inbound_messages_are_decrypted_with_the_shared_key() {
        let relay = MemoryRelay::new();
        let sender = crypto::generate_keypair();
        let receiver = crypto::generate_keypair();
        let shared = crypto::derive_shared_key(&sender.secret_key, &receiver.public_key).unwrap();
        let topic = Topic::generate();

        let (receiving, mut rx) = store(Arc::new(relay.client()));
        receiving
            .set(
                topic.clone(),
                "record".to_string(),
                SubscriptionOptions {
                    relay: RelayDescriptor::default(),
                    encrypt: None,
                    decrypt: Some(DecryptionKeys::Shared(shared.clone())),
                },
            )
            .await
            .unwrap();

        let (sending, _tx_rx) = store(Arc::new(relay.client()));
        sending
            .set(
                topic.clone(),
                "record".to_string(),
                SubscriptionOptions {
                    relay: RelayDescriptor::default(),
                    encrypt: Some(EncryptionKeys {
                        shared_key: shared,
                        sender_public: sender.public_key,
                    }),
                    decrypt: None,
                },
            )
            .await
            .unwrap();

        let request = JsonRpcRequest::new("pairing_payload", serde_json::json!({"n": 1}));
        sending
            .publish(&topic, &JsonRpcPayload::Request(request.clone()), None)
            .await
            .unwrap();

        let inbound = rx.recv().await.unwrap();
        assert_eq!(inbound.topic, topic);
        assert_eq!(inbound.payload, JsonRpcPayload::Request(request));
    }

    #[tokio::test]
    async fn sealed_envelopes_open_with_the_recipient_secret() {
        let relay = MemoryRelay::new();
        let sender = crypto::generate_keypair();
        let receiver = crypto::generate_keypair();
        let shared = crypto::derive_shared_key(&sender.secret_key, &receiver.public_key).unwrap();
        let topic = Topic::generate();

        let (receiving, mut rx) = store(Arc::new(relay.client()));
        receiving
            .set(
                topic.clone(),
                "record".to_string(),
                SubscriptionOptions {
                    relay: RelayDescriptor::default(),
                    encrypt: None,
                    decrypt: Some(DecryptionKeys::Recipient(receiver.secret_key)),
                },
            )
            .await
            .unwrap();

        let request = JsonRpcRequest::new("pairing_respond", serde_json::json!({"ok": true}));
        let sending = relay.client();
        publish_message(
            &sending,
            &topic,
            &RelayDescriptor::default(),
            &JsonRpcPayload::Request(request.clone()),
            Some(&EncryptionKeys {
                shared_key: shared,
                sender_public: sender.public_key,
            }),
        )
        .await
        .unwrap();

        let inbound = rx.recv().await.unwrap();
        assert_eq!(inbound.payload, JsonRpcPayload::Request(request));
    }

    #[tokio::test]
    async fn plaintext_messages_pass_through() {
        let relay = MemoryRelay::new();
        let topic = Topic::generate();
        let (receiving, mut rx) = store(Arc::new(relay.client()));
        receiving
            .set(topic.clone(), "record".to_string(), plain_opts())
            .await
            .unwrap();

        let request = JsonRpcRequest::new("pairing_respond", serde_json::json!({"reason": "no"}));
        let sending = relay.client();
        publish_message(
            &sending,
            &topic,
            &RelayDescriptor::default(),
            &JsonRpcPayload::Request(request.clone()),
            None,
        )
        .await
        .unwrap();

        let inbound = rx.recv().await.unwrap();
        assert_eq!(inbound.payload, JsonRpcPayload::Request(request));
    }
}
