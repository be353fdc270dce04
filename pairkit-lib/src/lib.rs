//! Pairkit core library.
//!
//! This crate intentionally stays stateless: it provides the identifier and
//! key newtypes shared across the workspace, the crypto primitives used to
//! derive pairing keys and topics, the shareable pairing URI, and the
//! JSON-RPC codec spoken over the relay. The stateful pairing controller
//! lives in `pairkit-engine` and consumes everything here by value.
//!
//! # Example
//!
//! ```
//! use pairkit_lib::crypto;
//!
//! // Each side generates its own key pair; the shared key is symmetric.
//! let a = crypto::generate_keypair();
//! let b = crypto::generate_keypair();
//!
//! let ab = crypto::derive_shared_key(&a.secret_key, &b.public_key)?;
//! let ba = crypto::derive_shared_key(&b.secret_key, &a.public_key)?;
//! assert_eq!(ab, ba);
//!
//! // The settled topic is bound to the shared key.
//! let topic = crypto::settled_topic(&ab)?;
//! assert_eq!(topic.as_str().len(), 64);
//! # Ok::<(), pairkit_lib::PairingError>(())
//! ```

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

pub mod crypto;
pub mod errors;
pub mod rpc;
pub mod uri;

pub use errors::PairingError;
pub use uri::{format_pairing_uri, parse_pairing_uri, PairingUri};

/// Common result alias for Pairkit operations.
pub type Result<T> = std::result::Result<T, PairingError>;

/// Relay protocol assumed when a relay descriptor does not name one.
pub const DEFAULT_RELAY_PROTOCOL: &str = "bridge";

/// Opaque 32-byte pairing topic, hex encoded.
///
/// Proposal topics are fresh random bytes; settled topics are derived from
/// the shared key (see [`crypto::settled_topic`]).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic(pub String);

impl Topic {
    /// Create a topic from an existing hex string.
    pub fn new(topic: impl Into<String>) -> Self {
        Self(topic.into())
    }

    /// Allocate a fresh random topic.
    pub fn generate() -> Self {
        Self(hex::encode(crypto::random_bytes32()))
    }

    /// Get the topic as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// X25519 public key, hex encoded.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub String);

impl PublicKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PublicKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// X25519 secret key, hex encoded.
///
/// Never leaves the process: the `Debug` impl redacts the value and the
/// buffer is zeroized on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKey(pub String);

impl SecretKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey(<redacted>)")
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Symmetric key derived via ECDH from the two peers' key pairs, hex encoded.
///
/// Like [`SecretKey`], redacted in `Debug` output and zeroized on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedKey(pub String);

impl SharedKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedKey(<redacted>)")
    }
}

impl Drop for SharedKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// An X25519 key pair. Each side of a pairing generates its own.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub secret_key: SecretKey,
}

/// Descriptor of the relay a pairing rides on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelayDescriptor {
    /// Relay protocol name, e.g. `bridge`.
    pub protocol: String,
    /// Optional protocol-specific parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl RelayDescriptor {
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            params: None,
        }
    }
}

impl Default for RelayDescriptor {
    fn default() -> Self {
        Self::new(DEFAULT_RELAY_PROTOCOL)
    }
}

/// Application metadata announced to the peer of a pairing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetadata {
    pub name: String,
    pub description: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub icons: Vec<String>,
}
