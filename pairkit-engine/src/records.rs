//! Pairing records and wire parameter types.
//!
//! A pairing lives in one of two stores: *pending* while the handshake is
//! in flight (keyed by the proposal topic) and *settled* once both sides
//! hold the shared key (keyed by the settled topic).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::PairingConfig;
use pairkit_lib::uri::PairingUri;
use pairkit_lib::{format_pairing_uri, AppMetadata, KeyPair, PublicKey, RelayDescriptor, SharedKey, Topic};

/// Wire method names of the pairing protocol.
pub mod method {
    pub const PAIRING_RESPOND: &str = "pairing_respond";
    pub const PAIRING_PAYLOAD: &str = "pairing_payload";
    pub const PAIRING_UPDATE: &str = "pairing_update";
    pub const PAIRING_DELETE: &str = "pairing_delete";

    /// Methods reserved for the pairing protocol itself; never subject to
    /// the permission whitelist.
    pub const RESERVED: [&str; 4] = [
        PAIRING_RESPOND,
        PAIRING_PAYLOAD,
        PAIRING_UPDATE,
        PAIRING_DELETE,
    ];
}

/// Stable deletion reason strings.
pub mod reason {
    pub const SETTLED: &str = "settled";
    pub const ACKNOWLEDGED: &str = "acknowledged";
    pub const NOT_APPROVED: &str = "not_approved";
}

/// Signal method carried in a proposal: share the URI out of band.
pub const SIGNAL_METHOD_URI: &str = "pairing_uri";

/// Whether a method is reserved for the pairing protocol.
pub fn is_reserved_method(method: &str) -> bool {
    method::RESERVED.contains(&method)
}

/// JSON-RPC permissions attached to a pairing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcPermissions {
    pub methods: BTreeSet<String>,
}

/// Permission set governing inbound application requests.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingPermissions {
    pub jsonrpc: JsonRpcPermissions,
}

impl PairingPermissions {
    /// Build a permission set from an iterator of method names.
    pub fn from_methods<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            jsonrpc: JsonRpcPermissions {
                methods: methods.into_iter().map(Into::into).collect(),
            },
        }
    }

    /// Whitelist membership test; reserved methods are checked separately.
    pub fn permits(&self, method: &str) -> bool {
        self.jsonrpc.methods.contains(method)
    }
}

/// One side of a pairing as seen on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingParticipant {
    pub public_key: PublicKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AppMetadata>,
}

impl PairingParticipant {
    pub fn new(public_key: PublicKey) -> Self {
        Self {
            public_key,
            metadata: None,
        }
    }

    pub fn with_metadata(public_key: PublicKey, metadata: Option<AppMetadata>) -> Self {
        Self {
            public_key,
            metadata,
        }
    }
}

/// Out-of-band signal carrying the proposal to the responder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalSignal {
    pub method: String,
    pub params: SignalParams,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalParams {
    pub uri: String,
}

impl ProposalSignal {
    pub fn uri(uri: impl Into<String>) -> Self {
        Self {
            method: SIGNAL_METHOD_URI.to_string(),
            params: SignalParams { uri: uri.into() },
        }
    }
}

/// A pairing proposal, shared with the responder through the signal URI.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PairingProposal {
    pub topic: Topic,
    pub relay: RelayDescriptor,
    pub proposer: PairingParticipant,
    pub signal: ProposalSignal,
    pub permissions: PairingPermissions,
    /// Time to live in seconds; settlement expiry is `created_at + ttl`.
    pub ttl: u64,
}

impl PairingProposal {
    /// Rebuild a proposal from a parsed pairing URI on the responder side.
    ///
    /// Permissions and TTL are not carried by the URI; they follow the
    /// local configuration, which both sides share by convention.
    pub fn from_uri(uri: &PairingUri, config: &PairingConfig) -> Self {
        Self {
            topic: uri.topic.clone(),
            relay: uri.relay.clone(),
            proposer: PairingParticipant::new(uri.public_key.clone()),
            signal: ProposalSignal::uri(format_pairing_uri(uri)),
            permissions: PairingPermissions::from_methods(config.permitted_methods.clone()),
            ttl: config.default_ttl,
        }
    }
}

/// Result of a pairing attempt, published by the responder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PairingOutcome {
    Success {
        /// The settled topic both sides derived.
        topic: Topic,
        relay: RelayDescriptor,
        responder: PairingParticipant,
        /// Unix timestamp the settlement expires at; identical on both sides.
        expiry: i64,
    },
    Failure {
        reason: String,
    },
}

impl PairingOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }
}

/// A pairing straddling the handshake, keyed by its proposal topic.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PendingPairing {
    Proposed {
        topic: Topic,
        relay: RelayDescriptor,
        #[serde(rename = "self")]
        keypair: KeyPair,
        proposal: PairingProposal,
    },
    Responded {
        topic: Topic,
        relay: RelayDescriptor,
        #[serde(rename = "self")]
        keypair: KeyPair,
        proposal: PairingProposal,
        outcome: PairingOutcome,
    },
}

impl PendingPairing {
    pub fn topic(&self) -> &Topic {
        match self {
            Self::Proposed { topic, .. } | Self::Responded { topic, .. } => topic,
        }
    }

    pub fn relay(&self) -> &RelayDescriptor {
        match self {
            Self::Proposed { relay, .. } | Self::Responded { relay, .. } => relay,
        }
    }

    pub fn keypair(&self) -> &KeyPair {
        match self {
            Self::Proposed { keypair, .. } | Self::Responded { keypair, .. } => keypair,
        }
    }

    pub fn proposal(&self) -> &PairingProposal {
        match self {
            Self::Proposed { proposal, .. } | Self::Responded { proposal, .. } => proposal,
        }
    }

    pub fn outcome(&self) -> Option<&PairingOutcome> {
        match self {
            Self::Proposed { .. } => None,
            Self::Responded { outcome, .. } => Some(outcome),
        }
    }

    /// Whether the peer has answered the proposal.
    pub fn is_responded(&self) -> bool {
        matches!(self, Self::Responded { .. })
    }

    /// Whether the answer was a failure.
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            Self::Responded {
                outcome: PairingOutcome::Failure { .. },
                ..
            }
        )
    }
}

/// A live pairing, keyed by its settled topic.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SettledPairing {
    pub topic: Topic,
    pub relay: RelayDescriptor,
    pub shared_key: SharedKey,
    #[serde(rename = "self")]
    pub keypair: KeyPair,
    pub peer: PairingParticipant,
    pub permissions: PairingPermissions,
    /// Unix timestamp the settlement expires at.
    pub expiry: i64,
}

impl SettledPairing {
    pub fn is_expired(&self) -> bool {
        chrono::Utc::now().timestamp() > self.expiry
    }
}

/// `pairing_update` parameters. Only peer metadata is updatable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PairingUpdate {
    pub peer: PeerUpdate,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeerUpdate {
    pub metadata: AppMetadata,
}

/// `pairing_payload` parameters wrapping an application-level payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PayloadParams {
    pub payload: serde_json::Value,
}

/// `pairing_delete` parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteParams {
    pub reason: String,
}
