//! The pairing controller state machine.
//!
//! Owns the pending and settled subscription stores and drives records
//! between them: a local `create` writes a pending proposal, the peer's
//! `pairing_respond` settles it, and the acknowledgement handshake retires
//! the pending record. Inbound traffic from both stores funnels through a
//! single router task, so events for any one topic are handled in the
//! order the relay delivered them.
//!
//! Store mutation, external event emission, and wire publishes are
//! executed as explicit sequential steps inside each handler; a record is
//! always durable in its store before the message announcing it goes out,
//! and each transition publishes at most once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::events::PairingEvent;
use crate::records::{
    is_reserved_method, method, reason, DeleteParams, PairingOutcome, PairingParticipant,
    PairingPermissions, PairingProposal, PairingUpdate, PayloadParams, PendingPairing,
    ProposalSignal, SettledPairing,
};
use crate::relay::RelayClient;
use crate::subscription::{
    publish_message, DecryptionKeys, EncryptionKeys, InboundPayload, StoreKind, SubscriptionOptions,
    SubscriptionStore,
};
use crate::PairingConfig;
use pairkit_lib::rpc::{
    JsonRpcErrorResponse, JsonRpcPayload, JsonRpcRequest, JsonRpcResponse,
    ERROR_CODE_METHOD_NOT_FOUND, ERROR_CODE_SERVER,
};
use pairkit_lib::uri::{PairingUri, URI_VERSION};
use pairkit_lib::{
    crypto, format_pairing_uri, KeyPair, PairingError, RelayDescriptor, Result, Topic,
};

/// Wire message for methods outside the pairing protocol.
const UNKNOWN_METHOD_MSG: &str = "Unknown JSON-RPC Method Requested: ";

/// Capacity of the external event channel.
const EVENT_CAPACITY: usize = 64;

/// Protocol state machine for relay pairings.
///
/// Cheap to clone; all clones share the same state. Drop the last clone to
/// tear down the router task and every relay subscription.
#[derive(Clone)]
pub struct PairingController {
    inner: Arc<Inner>,
}

struct Inner {
    config: PairingConfig,
    relay: Arc<dyn RelayClient>,
    pending: SubscriptionStore<PendingPairing>,
    settled: SubscriptionStore<SettledPairing>,
    completions: Mutex<HashMap<Topic, oneshot::Sender<PairingOutcome>>>,
    events: broadcast::Sender<PairingEvent>,
    router: Mutex<RouterState>,
}

#[derive(Default)]
struct RouterState {
    inbound: Option<mpsc::UnboundedReceiver<InboundPayload>>,
    handle: Option<JoinHandle<()>>,
}

struct SettleParams {
    relay: RelayDescriptor,
    keypair: KeyPair,
    peer: PairingParticipant,
    permissions: PairingPermissions,
    expiry: i64,
}

impl PairingController {
    pub fn new(relay: Arc<dyn RelayClient>, config: PairingConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                pending: SubscriptionStore::new(StoreKind::Pending, relay.clone(), inbound_tx.clone()),
                settled: SubscriptionStore::new(StoreKind::Settled, relay.clone(), inbound_tx),
                relay,
                completions: Mutex::new(HashMap::new()),
                events,
                router: Mutex::new(RouterState {
                    inbound: Some(inbound_rx),
                    handle: None,
                }),
            }),
        }
    }

    /// Subscribe to the external event surface.
    pub fn subscribe(&self) -> broadcast::Receiver<PairingEvent> {
        self.inner.events.subscribe()
    }

    /// Start the inbound router. Idempotent; must run before any peer
    /// traffic is expected.
    pub async fn init(&self) -> Result<()> {
        let Some(mut inbound) = self.inner.router_lock()?.inbound.take() else {
            return Ok(());
        };
        // The router holds a weak handle so dropping the controller tears
        // the task down instead of keeping the stores alive forever.
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.route(message).await;
            }
        });
        self.inner.router_lock()?.handle = Some(handle);
        Ok(())
    }

    /// Propose a pairing and wait for the peer to answer.
    ///
    /// Resolves with the settled record once the peer approves, deleting
    /// the pending record with reason `settled`; fails with the peer's
    /// reason otherwise. The proposal URI surfaces through the
    /// [`PairingEvent::Proposed`] event emitted before this suspends.
    pub async fn create(&self, relay: Option<RelayDescriptor>) -> Result<SettledPairing> {
        let (keypair, proposal) = self.inner.new_proposal(relay.unwrap_or_default());
        let topic = proposal.topic.clone();
        let rx = self.inner.register_completion(&topic)?;
        if let Err(err) = self.inner.commit_proposal(keypair, proposal).await {
            self.inner.take_completion(&topic);
            return Err(err);
        }

        let outcome = rx.await.map_err(|_| {
            PairingError::Internal("pairing controller dropped before settlement".to_string())
        })?;
        match outcome {
            PairingOutcome::Success {
                topic: settled_topic,
                ..
            } => {
                let settled = self.inner.settled.get(&settled_topic)?;
                self.inner.pending.delete(&topic, reason::SETTLED).await?;
                Ok(settled)
            }
            PairingOutcome::Failure { reason } => {
                self.inner.pending.delete(&topic, &reason).await?;
                Err(PairingError::RemoteFailure(reason))
            }
        }
    }

    /// Propose a pairing without waiting for settlement.
    pub async fn propose(&self, relay: Option<RelayDescriptor>) -> Result<PendingPairing> {
        let (keypair, proposal) = self.inner.new_proposal(relay.unwrap_or_default());
        self.inner.commit_proposal(keypair, proposal).await
    }

    /// Answer a proposal received out of band.
    ///
    /// Approval settles the pairing locally and publishes a success
    /// outcome; rejection publishes `not_approved`. Exactly one
    /// `pairing_respond` goes out either way, after the pending record is
    /// durable.
    pub async fn respond(&self, approved: bool, proposal: PairingProposal) -> Result<PendingPairing> {
        self.inner.respond(approved, proposal).await
    }

    /// Update the peer-visible metadata of a settled pairing.
    ///
    /// Optimistic: returns the locally-updated record without waiting for
    /// the peer's acknowledgement.
    pub async fn update(&self, topic: &Topic, update: PairingUpdate) -> Result<SettledPairing> {
        self.inner.update(topic, update).await
    }

    /// Delete a settled pairing and announce the reason to the peer.
    pub async fn delete(&self, topic: &Topic, reason: &str) -> Result<()> {
        self.inner.delete_settled(topic, reason, true).await?;
        Ok(())
    }

    /// Wrap an application payload in `pairing_payload` and publish it on
    /// a settled topic. Publish failures surface to the caller.
    pub async fn send(&self, topic: &Topic, payload: JsonRpcPayload) -> Result<()> {
        self.inner.send(topic, payload).await
    }

    pub fn get(&self, topic: &Topic) -> Result<SettledPairing> {
        self.inner.settled.get(topic)
    }

    pub fn entries(&self) -> Vec<SettledPairing> {
        self.inner.settled.entries()
    }

    pub fn len(&self) -> usize {
        self.inner.settled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.settled.is_empty()
    }

    /// Number of proposals still straddling the handshake.
    pub fn pending_len(&self) -> usize {
        self.inner.pending.len()
    }
}

impl Inner {
    fn new_proposal(&self, relay: RelayDescriptor) -> (KeyPair, PairingProposal) {
        let keypair = crypto::generate_keypair();
        let topic = Topic::generate();
        let uri = PairingUri {
            version: URI_VERSION,
            topic: topic.clone(),
            public_key: keypair.public_key.clone(),
            relay: relay.clone(),
        };
        let proposal = PairingProposal {
            topic,
            relay,
            proposer: PairingParticipant::with_metadata(
                keypair.public_key.clone(),
                self.config.metadata.clone(),
            ),
            signal: ProposalSignal::uri(format_pairing_uri(&uri)),
            permissions: PairingPermissions::from_methods(self.config.permitted_methods.clone()),
            ttl: self.config.default_ttl,
        };
        (keypair, proposal)
    }

    async fn commit_proposal(
        &self,
        keypair: KeyPair,
        proposal: PairingProposal,
    ) -> Result<PendingPairing> {
        let pending = PendingPairing::Proposed {
            topic: proposal.topic.clone(),
            relay: proposal.relay.clone(),
            keypair: keypair.clone(),
            proposal,
        };
        self.pending
            .set(
                pending.topic().clone(),
                pending.clone(),
                SubscriptionOptions {
                    relay: pending.relay().clone(),
                    encrypt: None,
                    decrypt: Some(DecryptionKeys::Recipient(keypair.secret_key)),
                },
            )
            .await?;
        debug!(topic = %pending.topic(), "pairing proposed");
        self.emit(PairingEvent::Proposed(pending.clone()));
        Ok(pending)
    }

    async fn respond(&self, approved: bool, proposal: PairingProposal) -> Result<PendingPairing> {
        let keypair = crypto::generate_keypair();
        let topic = proposal.topic.clone();

        let (outcome, settled) = if approved {
            let expiry = chrono::Utc::now().timestamp() + proposal.ttl as i64;
            let params = SettleParams {
                relay: proposal.relay.clone(),
                keypair: keypair.clone(),
                peer: proposal.proposer.clone(),
                permissions: proposal.permissions.clone(),
                expiry,
            };
            match self.settle(params).await {
                Ok(record) => (
                    PairingOutcome::Success {
                        topic: record.topic.clone(),
                        relay: record.relay.clone(),
                        responder: PairingParticipant::with_metadata(
                            keypair.public_key.clone(),
                            self.config.metadata.clone(),
                        ),
                        expiry,
                    },
                    Some(record),
                ),
                Err(err) => {
                    warn!(%topic, %err, "settlement failed while responding");
                    (
                        PairingOutcome::Failure {
                            reason: err.to_string(),
                        },
                        None,
                    )
                }
            }
        } else {
            (
                PairingOutcome::Failure {
                    reason: reason::NOT_APPROVED.to_string(),
                },
                None,
            )
        };

        let responded = PendingPairing::Responded {
            topic: topic.clone(),
            relay: proposal.relay.clone(),
            keypair: keypair.clone(),
            proposal,
            outcome: outcome.clone(),
        };
        self.pending
            .set(
                topic.clone(),
                responded.clone(),
                SubscriptionOptions {
                    relay: responded.relay().clone(),
                    encrypt: None,
                    decrypt: Some(DecryptionKeys::Recipient(keypair.secret_key.clone())),
                },
            )
            .await?;
        self.emit(PairingEvent::Responded(responded.clone()));
        if let Some(record) = &settled {
            self.emit(PairingEvent::Settled(record.clone()));
        }

        // The answer is durable; publish it exactly once. The proposer only
        // knows its own secret key at this point, so the outcome is sealed
        // to its public key; with no derivable key (the settlement itself
        // failed) the failure outcome goes out in the clear.
        let encrypt = match &settled {
            Some(record) => Some(EncryptionKeys {
                shared_key: record.shared_key.clone(),
                sender_public: keypair.public_key.clone(),
            }),
            None => crypto::derive_shared_key(
                &keypair.secret_key,
                &responded.proposal().proposer.public_key,
            )
            .ok()
            .map(|shared_key| EncryptionKeys {
                shared_key,
                sender_public: keypair.public_key.clone(),
            }),
        };
        let request = JsonRpcRequest::new(method::PAIRING_RESPOND, serde_json::to_value(&outcome)?);
        self.pending
            .publish(&topic, &JsonRpcPayload::Request(request), encrypt.as_ref())
            .await?;

        if let PairingOutcome::Failure { reason } = &outcome {
            // Nothing will acknowledge a rejection; retire the pending
            // record now so its lifetime stays bounded.
            self.pending.delete(&topic, reason).await?;
        }
        Ok(responded)
    }

    /// Derive the shared key and settled topic, insert the settled record
    /// with its decryption keys attached. Idempotent on identical inputs.
    async fn settle(&self, params: SettleParams) -> Result<SettledPairing> {
        let shared_key = crypto::derive_shared_key(&params.keypair.secret_key, &params.peer.public_key)
            .map_err(|err| PairingError::Settlement(err.to_string()))?;
        let topic = crypto::settled_topic(&shared_key)
            .map_err(|err| PairingError::Settlement(err.to_string()))?;

        if let Ok(existing) = self.settled.get(&topic) {
            return Ok(existing);
        }

        let record = SettledPairing {
            topic: topic.clone(),
            relay: params.relay.clone(),
            shared_key: shared_key.clone(),
            keypair: params.keypair,
            peer: params.peer,
            permissions: params.permissions,
            expiry: params.expiry,
        };
        self.settled
            .set(
                topic.clone(),
                record.clone(),
                SubscriptionOptions {
                    relay: params.relay,
                    encrypt: Some(EncryptionKeys {
                        shared_key: shared_key.clone(),
                        sender_public: record.keypair.public_key.clone(),
                    }),
                    decrypt: Some(DecryptionKeys::Shared(shared_key)),
                },
            )
            .await?;
        debug!(%topic, "pairing settled");
        Ok(record)
    }

    async fn update(&self, topic: &Topic, update: PairingUpdate) -> Result<SettledPairing> {
        let settled = self.settled.get(topic)?;
        // Locally-initiated updates run under our own key; the peer mirrors
        // the metadata on its side when the request lands there.
        let participant = PairingParticipant::new(settled.keypair.public_key.clone());
        let updated = self.handle_update(topic, &update, &participant)?;
        self.emit(PairingEvent::Updated(updated.clone()));

        let request = JsonRpcRequest::new(method::PAIRING_UPDATE, serde_json::to_value(&update)?);
        self.settled
            .publish(topic, &JsonRpcPayload::Request(request), None)
            .await?;
        Ok(updated)
    }

    /// Apply an update on behalf of `participant`. Only peer metadata is
    /// updatable, and only the peer itself may push it.
    fn handle_update(
        &self,
        topic: &Topic,
        update: &PairingUpdate,
        participant: &PairingParticipant,
    ) -> Result<SettledPairing> {
        let mut record = self.settled.get(topic)?;
        if participant.public_key == record.peer.public_key {
            record.peer.metadata = Some(update.peer.metadata.clone());
        } else if participant.public_key != record.keypair.public_key {
            return Err(PairingError::InvalidUpdate);
        }
        self.settled.update(topic, record)
    }

    async fn delete_settled(
        &self,
        topic: &Topic,
        reason: &str,
        announce: bool,
    ) -> Result<SettledPairing> {
        let record = self.settled.delete(topic, reason).await?;
        self.emit(PairingEvent::Deleted {
            pairing: record.clone(),
            reason: reason.to_string(),
        });
        if announce {
            let request = JsonRpcRequest::new(
                method::PAIRING_DELETE,
                serde_json::to_value(DeleteParams {
                    reason: reason.to_string(),
                })?,
            );
            let keys = EncryptionKeys {
                shared_key: record.shared_key.clone(),
                sender_public: record.keypair.public_key.clone(),
            };
            publish_message(
                self.relay.as_ref(),
                topic,
                &record.relay,
                &JsonRpcPayload::Request(request),
                Some(&keys),
            )
            .await?;
        }
        Ok(record)
    }

    async fn send(&self, topic: &Topic, payload: JsonRpcPayload) -> Result<()> {
        // Existence check; the receiving side enforces the method whitelist.
        self.settled.get(topic)?;
        let params = PayloadParams {
            payload: serde_json::to_value(&payload)?,
        };
        let request =
            JsonRpcRequest::new(method::PAIRING_PAYLOAD, serde_json::to_value(params)?);
        self.settled
            .publish(topic, &JsonRpcPayload::Request(request), None)
            .await
    }

    async fn route(&self, inbound: InboundPayload) {
        let InboundPayload {
            kind,
            topic,
            payload,
        } = inbound;
        let result = match kind {
            StoreKind::Pending => match payload {
                JsonRpcPayload::Request(request)
                    if request.method == method::PAIRING_RESPOND =>
                {
                    self.on_response(&topic, request).await
                }
                JsonRpcPayload::Request(request) => {
                    warn!(%topic, method = %request.method, "unexpected request on proposal topic");
                    Ok(())
                }
                acknowledgement => self.on_acknowledge(&topic, acknowledgement).await,
            },
            StoreKind::Settled => match payload {
                JsonRpcPayload::Request(request) => match request.method.as_str() {
                    method::PAIRING_PAYLOAD => self.on_payload(&topic, request).await,
                    method::PAIRING_UPDATE => self.on_update(&topic, request).await,
                    method::PAIRING_DELETE => self.on_delete(&topic, request).await,
                    unknown => {
                        warn!(%topic, method = unknown, "unknown json-rpc method requested");
                        let reply = JsonRpcErrorResponse::new(
                            request.id,
                            ERROR_CODE_METHOD_NOT_FOUND,
                            format!("{UNKNOWN_METHOD_MSG}{unknown}"),
                        );
                        self.settled
                            .publish(&topic, &JsonRpcPayload::Error(reply), None)
                            .await
                    }
                },
                other => match serde_json::to_value(&other) {
                    Ok(value) => {
                        self.emit(PairingEvent::Payload {
                            topic: topic.clone(),
                            payload: value,
                        });
                        Ok(())
                    }
                    Err(err) => Err(err.into()),
                },
            },
        };
        if let Err(err) = result {
            warn!(%topic, %err, "inbound pairing message failed");
        }
    }

    /// Proposer side: the peer answered our proposal.
    async fn on_response(&self, topic: &Topic, request: JsonRpcRequest) -> Result<()> {
        let pending = match self.pending.get(topic) {
            Ok(pending) => pending,
            Err(_) => {
                debug!(%topic, "response for unknown proposal topic");
                return Ok(());
            }
        };
        let PendingPairing::Proposed {
            relay,
            keypair,
            proposal,
            ..
        } = pending
        else {
            debug!(%topic, "proposal already responded; ignoring duplicate");
            return Ok(());
        };
        let outcome: PairingOutcome = serde_json::from_value(request.params.clone())?;

        // (final outcome, settled record, ack to publish)
        let (outcome, settled, ack) = match outcome {
            PairingOutcome::Failure { reason } => {
                (PairingOutcome::Failure { reason }, None, None)
            }
            PairingOutcome::Success {
                topic: settled_topic,
                relay: settled_relay,
                responder,
                expiry,
            } => {
                let params = SettleParams {
                    relay: settled_relay,
                    keypair: keypair.clone(),
                    peer: responder.clone(),
                    permissions: proposal.permissions.clone(),
                    expiry,
                };
                match self.settle(params).await {
                    Ok(record) if record.topic == settled_topic => {
                        let keys = EncryptionKeys {
                            shared_key: record.shared_key.clone(),
                            sender_public: keypair.public_key.clone(),
                        };
                        let ack = JsonRpcPayload::Response(JsonRpcResponse::new(
                            request.id,
                            serde_json::json!(true),
                        ));
                        (
                            PairingOutcome::Success {
                                topic: record.topic.clone(),
                                relay: record.relay.clone(),
                                responder,
                                expiry,
                            },
                            Some(record),
                            Some((ack, Some(keys))),
                        )
                    }
                    Ok(record) => {
                        // The peer settled a different topic than we derive;
                        // refuse the stray record.
                        self.settled
                            .delete(&record.topic, "settled topic mismatch")
                            .await
                            .ok();
                        let reason = "settled topic mismatch".to_string();
                        let ack = JsonRpcPayload::Error(JsonRpcErrorResponse::new(
                            request.id,
                            ERROR_CODE_SERVER,
                            &reason,
                        ));
                        let keys = self.opportunistic_keys(&keypair, &responder);
                        (
                            PairingOutcome::Failure { reason },
                            None,
                            Some((ack, keys)),
                        )
                    }
                    Err(err) => {
                        let reason = err.to_string();
                        warn!(%topic, %reason, "settlement failed on response");
                        let ack = JsonRpcPayload::Error(JsonRpcErrorResponse::new(
                            request.id,
                            ERROR_CODE_SERVER,
                            &reason,
                        ));
                        let keys = self.opportunistic_keys(&keypair, &responder);
                        (
                            PairingOutcome::Failure { reason },
                            None,
                            Some((ack, keys)),
                        )
                    }
                }
            }
        };

        let responded = PendingPairing::Responded {
            topic: topic.clone(),
            relay,
            keypair,
            proposal,
            outcome: outcome.clone(),
        };
        self.pending.update(topic, responded.clone())?;
        self.emit(PairingEvent::Responded(responded));
        if let Some(record) = &settled {
            self.emit(PairingEvent::Settled(record.clone()));
        }
        if let Some((ack, keys)) = ack {
            self.pending.publish(topic, &ack, keys.as_ref()).await?;
        }
        if let Some(tx) = self.take_completion(topic) {
            let _ = tx.send(outcome);
        }
        Ok(())
    }

    /// Responder side: the proposer acknowledged (or rejected) our answer.
    async fn on_acknowledge(&self, topic: &Topic, payload: JsonRpcPayload) -> Result<()> {
        let pending = match self.pending.get(topic) {
            Ok(pending) => pending,
            Err(_) => {
                debug!(%topic, "late acknowledgement for missing pending pairing");
                return Ok(());
            }
        };
        if let (
            JsonRpcPayload::Error(error),
            Some(PairingOutcome::Success {
                topic: settled_topic,
                ..
            }),
        ) = (&payload, pending.outcome())
        {
            let reason = PairingError::Acknowledgement(error.error.message.clone()).to_string();
            warn!(%topic, %reason, "pairing response rejected by peer");
            if self.delete_settled(settled_topic, &reason, true).await.is_err() {
                debug!(%topic, "settled record already gone during acknowledgement");
            }
        }
        self.pending.delete(topic, reason::ACKNOWLEDGED).await.ok();
        Ok(())
    }

    /// Inbound application payload on a settled topic.
    async fn on_payload(&self, topic: &Topic, request: JsonRpcRequest) -> Result<()> {
        let settled = self.settled.get(topic)?;
        let params: PayloadParams = serde_json::from_value(request.params.clone())?;
        if let Ok(inner) = serde_json::from_value::<JsonRpcRequest>(params.payload.clone()) {
            if !is_reserved_method(&inner.method) && !settled.permissions.permits(&inner.method) {
                let err = PairingError::Unauthorized(inner.method.clone());
                warn!(%topic, %err, "rejecting inbound request");
                let reply =
                    JsonRpcErrorResponse::new(request.id, ERROR_CODE_SERVER, err.to_string());
                return self
                    .settled
                    .publish(topic, &JsonRpcPayload::Error(reply), None)
                    .await;
            }
        }
        self.emit(PairingEvent::Payload {
            topic: topic.clone(),
            payload: params.payload,
        });
        Ok(())
    }

    /// Inbound `pairing_update` from the peer.
    async fn on_update(&self, topic: &Topic, request: JsonRpcRequest) -> Result<()> {
        let settled = self.settled.get(topic)?;
        let update: PairingUpdate = match serde_json::from_value(request.params.clone()) {
            Ok(update) => update,
            Err(_) => {
                let reply = JsonRpcErrorResponse::new(
                    request.id,
                    ERROR_CODE_SERVER,
                    PairingError::InvalidUpdate.to_string(),
                );
                return self
                    .settled
                    .publish(topic, &JsonRpcPayload::Error(reply), None)
                    .await;
            }
        };
        // The mutator is the sender, i.e. our recorded peer.
        let participant = PairingParticipant::new(settled.peer.public_key.clone());
        match self.handle_update(topic, &update, &participant) {
            Ok(updated) => {
                self.emit(PairingEvent::Updated(updated));
                let reply = JsonRpcResponse::new(request.id, serde_json::json!(true));
                self.settled
                    .publish(topic, &JsonRpcPayload::Response(reply), None)
                    .await
            }
            Err(err) => {
                let reply =
                    JsonRpcErrorResponse::new(request.id, ERROR_CODE_SERVER, err.to_string());
                self.settled
                    .publish(topic, &JsonRpcPayload::Error(reply), None)
                    .await
            }
        }
    }

    /// Inbound `pairing_delete` from the peer: delete locally without
    /// re-announcing, so the request is not echoed back to its sender.
    async fn on_delete(&self, topic: &Topic, request: JsonRpcRequest) -> Result<()> {
        let params: DeleteParams = serde_json::from_value(request.params.clone())?;
        match self.settled.delete(topic, &params.reason).await {
            Ok(record) => {
                self.emit(PairingEvent::Deleted {
                    pairing: record,
                    reason: params.reason,
                });
                Ok(())
            }
            Err(_) => {
                debug!(%topic, "delete for unknown settled topic");
                Ok(())
            }
        }
    }

    fn opportunistic_keys(
        &self,
        keypair: &KeyPair,
        responder: &PairingParticipant,
    ) -> Option<EncryptionKeys> {
        crypto::derive_shared_key(&keypair.secret_key, &responder.public_key)
            .ok()
            .map(|shared_key| EncryptionKeys {
                shared_key,
                sender_public: keypair.public_key.clone(),
            })
    }

    fn emit(&self, event: PairingEvent) {
        let _ = self.events.send(event);
    }

    fn register_completion(&self, topic: &Topic) -> Result<oneshot::Receiver<PairingOutcome>> {
        let (tx, rx) = oneshot::channel();
        self.completions_lock()?.insert(topic.clone(), tx);
        Ok(rx)
    }

    fn take_completion(&self, topic: &Topic) -> Option<oneshot::Sender<PairingOutcome>> {
        self.completions_lock().ok()?.remove(topic)
    }

    fn completions_lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<Topic, oneshot::Sender<PairingOutcome>>>> {
        self.completions
            .lock()
            .map_err(|_| PairingError::Internal("completion table lock poisoned".to_string()))
    }

    fn router_lock(&self) -> Result<std::sync::MutexGuard<'_, RouterState>> {
        self.router
            .lock()
            .map_err(|_| PairingError::Internal("router state lock poisoned".to_string()))
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(router) = self.router.lock() {
            if let Some(handle) = &router.handle {
                handle.abort();
            }
        }
    }
}
