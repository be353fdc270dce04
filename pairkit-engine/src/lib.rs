//! Pairkit engine: the pairing controller.
//!
//! A *pairing* is a long-lived end-to-end-encrypted channel between two
//! peers that communicate through an untrusted relay. This crate owns the
//! protocol state machine that establishes, maintains, updates, and tears
//! pairings down:
//!
//! - the proposer calls [`PairingController::create`], shares the proposal
//!   URI out of band, and awaits settlement;
//! - the responder rebuilds the proposal from the URI and calls
//!   [`PairingController::respond`];
//! - both sides derive the same shared key and settled topic, after which
//!   application payloads flow through [`PairingController::send`] and the
//!   [`PairingEvent`] surface.
//!
//! Transport, persistence, and the session layer above are out of scope;
//! the relay is injected through the [`relay::RelayClient`] trait.

use std::collections::BTreeSet;

use pairkit_lib::AppMetadata;

pub mod controller;
pub mod events;
pub mod records;
pub mod relay;
pub mod subscription;
pub mod testing;

pub use controller::PairingController;
pub use events::PairingEvent;
pub use pairkit_lib::{PairingError, Result};
pub use records::{
    PairingOutcome, PairingParticipant, PairingPermissions, PairingProposal, PairingUpdate,
    PeerUpdate, PendingPairing, SettledPairing,
};
pub use relay::RelayClient;

/// Method whitelisted on a fresh pairing so the session layer can open its
/// own negotiation over it.
pub const DEFAULT_PERMITTED_METHOD: &str = "session_propose";

/// Default proposal TTL: 30 days, in seconds.
pub const DEFAULT_PAIRING_TTL: u64 = 30 * 24 * 60 * 60;

/// Controller configuration.
///
/// The method whitelist installed on fresh proposals is configuration, not
/// a protocol constant: the session layer above decides what it needs to
/// speak over a newborn pairing.
#[derive(Clone, Debug)]
pub struct PairingConfig {
    /// Methods permitted on a fresh proposal.
    pub permitted_methods: BTreeSet<String>,
    /// TTL applied when a proposal does not specify one, in seconds.
    pub default_ttl: u64,
    /// Metadata announced to peers as part of our participant identity.
    pub metadata: Option<AppMetadata>,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            permitted_methods: BTreeSet::from([DEFAULT_PERMITTED_METHOD.to_string()]),
            default_ttl: DEFAULT_PAIRING_TTL,
            metadata: None,
        }
    }
}
