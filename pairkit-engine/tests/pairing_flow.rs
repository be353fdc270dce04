//! End-to-end pairing flows: two in-process controllers connected by the
//! in-memory relay.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

use pairkit_engine::testing::MemoryRelay;
use pairkit_engine::{
    PairingConfig, PairingController, PairingError, PairingEvent, PairingOutcome, PairingProposal,
    PairingUpdate, PeerUpdate, RelayClient,
};
use pairkit_lib::rpc::{JsonRpcPayload, JsonRpcRequest};
use pairkit_lib::{crypto, parse_pairing_uri, AppMetadata, PublicKey, RelayDescriptor, Topic};

async fn controller(
    relay: &MemoryRelay,
) -> (PairingController, broadcast::Receiver<PairingEvent>) {
    let ctrl = PairingController::new(Arc::new(relay.client()), PairingConfig::default());
    let events = ctrl.subscribe();
    ctrl.init().await.unwrap();
    (ctrl, events)
}

async fn next_event(events: &mut broadcast::Receiver<PairingEvent>) -> PairingEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for pairing event")
        .expect("event channel closed")
}

/// Rebuild the responder-side proposal from the URI surfaced by the
/// proposer's `proposed` event.
fn proposal_from(event: PairingEvent) -> PairingProposal {
    match event {
        PairingEvent::Proposed(pending) => {
            let uri = parse_pairing_uri(&pending.proposal().signal.params.uri).unwrap();
            PairingProposal::from_uri(&uri, &PairingConfig::default())
        }
        other => panic!("expected proposed event, got {other:?}"),
    }
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Drive a full handshake and drain the lifecycle events on both sides.
async fn establish(
    relay: &MemoryRelay,
) -> (
    PairingController,
    PairingController,
    Topic,
    broadcast::Receiver<PairingEvent>,
    broadcast::Receiver<PairingEvent>,
) {
    let (a, mut a_events) = controller(relay).await;
    let (b, mut b_events) = controller(relay).await;

    let proposer = a.clone();
    let create = tokio::spawn(async move { proposer.create(None).await });
    let proposal = proposal_from(next_event(&mut a_events).await);
    b.respond(true, proposal).await.unwrap();
    let settled = create.await.unwrap().unwrap();

    for events in [&mut a_events, &mut b_events] {
        assert!(matches!(
            next_event(events).await,
            PairingEvent::Responded(_)
        ));
        assert!(matches!(next_event(events).await, PairingEvent::Settled(_)));
    }
    wait_until(|| b.pending_len() == 0).await;

    (a, b, settled.topic, a_events, b_events)
}

#[tokio::test]
async fn pairing_settles_on_both_sides() {
    let relay = MemoryRelay::new();
    let (a, mut a_events) = controller(&relay).await;
    let (b, mut b_events) = controller(&relay).await;

    let proposer = a.clone();
    let create = tokio::spawn(async move { proposer.create(None).await });

    let proposal = proposal_from(next_event(&mut a_events).await);
    let responded = b.respond(true, proposal).await.unwrap();
    assert!(responded.is_responded());
    assert!(!responded.is_failed());

    let settled_a = create.await.unwrap().unwrap();

    // Proposer lifecycle: proposed (already drained) -> responded -> settled.
    match next_event(&mut a_events).await {
        PairingEvent::Responded(pending) => assert!(!pending.is_failed()),
        other => panic!("expected responded, got {other:?}"),
    }
    match next_event(&mut a_events).await {
        PairingEvent::Settled(settled) => assert_eq!(settled.topic, settled_a.topic),
        other => panic!("expected settled, got {other:?}"),
    }
    // Responder lifecycle: responded -> settled.
    assert!(matches!(
        next_event(&mut b_events).await,
        PairingEvent::Responded(_)
    ));
    match next_event(&mut b_events).await {
        PairingEvent::Settled(settled) => assert_eq!(settled.topic, settled_a.topic),
        other => panic!("expected settled, got {other:?}"),
    }

    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 1);

    // Both sides hold identical shared key, topic, and expiry.
    let settled_b = b.get(&settled_a.topic).unwrap();
    assert_eq!(settled_a.shared_key, settled_b.shared_key);
    assert_eq!(settled_a.expiry, settled_b.expiry);

    // The settled topic is bound to the key agreement on both sides.
    assert_eq!(
        crypto::settled_topic(&settled_a.shared_key).unwrap(),
        settled_a.topic
    );
    let derived =
        crypto::derive_shared_key(&settled_a.keypair.secret_key, &settled_a.peer.public_key)
            .unwrap();
    assert_eq!(derived, settled_a.shared_key);

    // Pending records are retired once settlement is observed/acknowledged.
    assert_eq!(a.pending_len(), 0);
    wait_until(|| b.pending_len() == 0).await;
}

#[tokio::test]
async fn respond_publishes_exactly_one_message_per_proposal() {
    let relay = MemoryRelay::new();
    let (a, mut a_events) = controller(&relay).await;
    let (b, _b_events) = controller(&relay).await;

    let proposer = a.clone();
    let create = tokio::spawn(async move { proposer.create(None).await });
    let proposal = proposal_from(next_event(&mut a_events).await);
    let proposal_topic = proposal.topic.clone();

    // Spy on the raw proposal topic before the responder answers.
    let spy = relay.client();
    let mut spy_rx = spy
        .subscribe(&proposal_topic, &RelayDescriptor::default())
        .await
        .unwrap();

    b.respond(true, proposal).await.unwrap();
    create.await.unwrap().unwrap();

    // Exactly two wire messages cross the proposal topic: the responder's
    // single pairing_respond and the proposer's acknowledgement.
    assert!(spy_rx.try_recv().is_ok());
    assert!(spy_rx.try_recv().is_ok());
    assert!(spy_rx.try_recv().is_err());
}

#[tokio::test]
async fn rejection_fails_create_with_not_approved() {
    let relay = MemoryRelay::new();
    let (a, mut a_events) = controller(&relay).await;
    let (b, mut b_events) = controller(&relay).await;

    let proposer = a.clone();
    let create = tokio::spawn(async move { proposer.create(None).await });
    let proposal = proposal_from(next_event(&mut a_events).await);

    let responded = b.respond(false, proposal).await.unwrap();
    assert!(responded.is_failed());

    let err = create.await.unwrap().unwrap_err();
    match err {
        PairingError::RemoteFailure(reason) => assert_eq!(reason, "not_approved"),
        other => panic!("expected remote failure, got {other:?}"),
    }

    match next_event(&mut a_events).await {
        PairingEvent::Responded(pending) => assert!(pending.is_failed()),
        other => panic!("expected responded, got {other:?}"),
    }
    assert!(matches!(
        next_event(&mut b_events).await,
        PairingEvent::Responded(_)
    ));

    // No settled record exists on either side, and no pending lingers.
    assert!(a.is_empty());
    assert!(b.is_empty());
    assert_eq!(a.pending_len(), 0);
    assert_eq!(b.pending_len(), 0);
}

#[tokio::test]
async fn settlement_failure_propagates_reason_to_proposer() {
    let relay = MemoryRelay::new();
    let (a, mut a_events) = controller(&relay).await;
    let (b, _b_events) = controller(&relay).await;

    let proposer = a.clone();
    let create = tokio::spawn(async move { proposer.create(None).await });
    let mut proposal = proposal_from(next_event(&mut a_events).await);

    // A malformed proposer key makes the responder's key derivation throw.
    proposal.proposer.public_key = PublicKey::new("zz");

    let responded = b.respond(true, proposal).await.unwrap();
    let reason = match responded.outcome() {
        Some(PairingOutcome::Failure { reason }) => reason.clone(),
        other => panic!("expected failure outcome, got {other:?}"),
    };

    // The proposer's create() fails with the responder's exact reason.
    let err = create.await.unwrap().unwrap_err();
    match err {
        PairingError::RemoteFailure(remote) => assert_eq!(remote, reason),
        other => panic!("expected remote failure, got {other:?}"),
    }

    assert!(a.is_empty());
    assert!(b.is_empty());
    assert_eq!(a.pending_len(), 0);
}

#[tokio::test]
async fn unauthorized_inner_method_is_rejected() {
    let relay = MemoryRelay::new();
    let (a, b, topic, mut a_events, mut b_events) = establish(&relay).await;

    let request = JsonRpcRequest::new("foo_bar", serde_json::json!({"x": 1}));
    a.send(&topic, JsonRpcPayload::Request(request))
        .await
        .unwrap();

    // The rejection surfaces on the sender as a verbatim payload.
    let payload = match next_event(&mut a_events).await {
        PairingEvent::Payload { payload, .. } => payload,
        other => panic!("expected payload event, got {other:?}"),
    };
    let message = payload["error"]["message"].as_str().unwrap();
    assert!(message.starts_with("Unauthorized JSON-RPC Method Requested:"));
    assert!(message.contains("foo_bar"));

    // No payload event fired on the receiving side, and nothing changed.
    assert!(matches!(
        b_events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
    assert_eq!(b.len(), 1);
}

#[tokio::test]
async fn permitted_inner_method_reaches_the_peer() {
    let relay = MemoryRelay::new();
    let (a, _b, topic, _a_events, mut b_events) = establish(&relay).await;

    let request = JsonRpcRequest::new("session_propose", serde_json::json!({"n": 1}));
    a.send(&topic, JsonRpcPayload::Request(request))
        .await
        .unwrap();

    match next_event(&mut b_events).await {
        PairingEvent::Payload {
            topic: event_topic,
            payload,
        } => {
            assert_eq!(event_topic, topic);
            assert_eq!(payload["method"], "session_propose");
        }
        other => panic!("expected payload event, got {other:?}"),
    }
}

#[tokio::test]
async fn metadata_updates_mirror_to_the_peer() {
    let relay = MemoryRelay::new();
    let (a, b, topic, mut a_events, mut b_events) = establish(&relay).await;

    let metadata = AppMetadata {
        name: "X".to_string(),
        description: "updated app".to_string(),
        url: "https://x.example".to_string(),
        icons: vec![],
    };
    let updated = a
        .update(
            &topic,
            PairingUpdate {
                peer: PeerUpdate {
                    metadata: metadata.clone(),
                },
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.topic, topic);

    // The initiator emits updated when its own store reflects the change.
    assert!(matches!(
        next_event(&mut a_events).await,
        PairingEvent::Updated(_)
    ));

    // The peer applies the metadata to its view of us and emits updated.
    match next_event(&mut b_events).await {
        PairingEvent::Updated(settled) => {
            assert_eq!(settled.peer.metadata, Some(metadata.clone()))
        }
        other => panic!("expected updated event, got {other:?}"),
    }
    assert_eq!(b.get(&topic).unwrap().peer.metadata, Some(metadata));

    // The peer acknowledged with result true, surfaced verbatim.
    match next_event(&mut a_events).await {
        PairingEvent::Payload { payload, .. } => {
            assert_eq!(payload["result"], serde_json::json!(true))
        }
        other => panic!("expected payload event, got {other:?}"),
    }
}

#[tokio::test]
async fn deletion_propagates_with_reason() {
    let relay = MemoryRelay::new();
    let (a, b, topic, mut a_events, mut b_events) = establish(&relay).await;

    a.delete(&topic, "user_disconnect").await.unwrap();

    match next_event(&mut a_events).await {
        PairingEvent::Deleted { reason, .. } => assert_eq!(reason, "user_disconnect"),
        other => panic!("expected deleted event, got {other:?}"),
    }
    match next_event(&mut b_events).await {
        PairingEvent::Deleted { pairing, reason } => {
            assert_eq!(reason, "user_disconnect");
            assert_eq!(pairing.topic, topic);
        }
        other => panic!("expected deleted event, got {other:?}"),
    }

    assert!(a.is_empty());
    wait_until(|| b.is_empty()).await;

    // The remote-initiated deletion is not echoed back to the sender.
    sleep(Duration::from_millis(50)).await;
    assert!(matches!(
        a_events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn send_on_unknown_topic_is_not_found() {
    let relay = MemoryRelay::new();
    let (a, _a_events) = controller(&relay).await;

    let request = JsonRpcRequest::new("session_propose", serde_json::json!({}));
    let err = a
        .send(&Topic::generate(), JsonRpcPayload::Request(request))
        .await
        .unwrap_err();
    assert!(matches!(err, PairingError::NotFound { .. }));
}

#[tokio::test]
async fn update_on_unknown_topic_is_not_found() {
    let relay = MemoryRelay::new();
    let (a, _a_events) = controller(&relay).await;

    let metadata = AppMetadata::default();
    let err = a
        .update(
            &Topic::generate(),
            PairingUpdate {
                peer: PeerUpdate { metadata },
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PairingError::NotFound { .. }));
}
