//! External event surface of the pairing controller.

use pairkit_lib::Topic;

use crate::records::{PendingPairing, SettledPairing};

/// Lifecycle and payload events emitted by the controller.
///
/// Consumers receive defensive copies; mutating an event value never
/// touches controller state. For any one topic the lifecycle events form
/// the ordered sequence proposed → responded → settled → updated* →
/// deleted.
#[derive(Clone, Debug)]
pub enum PairingEvent {
    /// A proposal was created locally.
    Proposed(PendingPairing),
    /// A proposal was answered, by us (responder side) or by the peer
    /// (proposer side).
    Responded(PendingPairing),
    /// A settled pairing record was created.
    Settled(SettledPairing),
    /// Settled peer metadata changed.
    Updated(SettledPairing),
    /// A settled pairing was deleted, locally or by the peer.
    Deleted {
        pairing: SettledPairing,
        reason: String,
    },
    /// An authorized application payload arrived on a settled topic.
    Payload {
        topic: Topic,
        payload: serde_json::Value,
    },
}
