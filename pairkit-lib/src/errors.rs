//! Error types for Pairkit operations.

/// Comprehensive error type for pairing operations.
///
/// Protocol errors received from a peer are carried as strings rather than
/// structured variants: the wire only ever transports a reason message.
#[derive(thiserror::Error, Debug)]
pub enum PairingError {
    /// A topic was absent from the relevant store.
    #[error("{resource} not found: {topic}")]
    NotFound {
        /// Store the lookup ran against (e.g. "pending pairing").
        resource: &'static str,
        /// The missing topic.
        topic: String,
    },

    /// Inbound request named a method outside the pairing's permissions.
    /// The display form doubles as the wire reply message.
    #[error("Unauthorized JSON-RPC Method Requested: {0}")]
    Unauthorized(String),

    /// Malformed pairing update parameters. The display form doubles as
    /// the wire reply message.
    #[error("Invalid pairing update request params")]
    InvalidUpdate,

    /// The peer reported a failure outcome for a proposal.
    #[error("pairing proposal failed: {0}")]
    RemoteFailure(String),

    /// Local failure while settling a pairing.
    #[error("settlement failed: {0}")]
    Settlement(String),

    /// The peer rejected our response during acknowledgement.
    #[error("acknowledgement failed: {0}")]
    Acknowledgement(String),

    /// Key derivation, sealing or opening failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Relay publish or subscribe failed.
    #[error("relay error: {0}")]
    Relay(String),

    /// A pairing URI could not be parsed.
    #[error("invalid pairing uri: {0}")]
    Uri(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal/unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PairingError {
    /// Create a not found error for the given store and topic.
    pub fn not_found(resource: &'static str, topic: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            topic: topic.into(),
        }
    }

    /// Create a crypto error from any error type.
    pub fn crypto<E: std::fmt::Display>(err: E) -> Self {
        Self::Crypto(err.to_string())
    }
}

impl From<serde_json::Error> for PairingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
