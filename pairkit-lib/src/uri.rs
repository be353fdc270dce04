//! Pairing URI formatter and parser.
//!
//! The URI is the out-of-band signal that carries a proposal to the
//! responder. It encodes the proposal topic, the proposer's public key and
//! the relay descriptor:
//!
//! ```text
//! pairkit:{topic}@{version}?relay-protocol={protocol}[&relay-params={hex}]&key={publicKey}
//! ```
//!
//! Topic and key are hex, so no percent-encoding is needed; relay params
//! (when present) are hex-encoded JSON.
//!
//! # Examples
//!
//! ```
//! use pairkit_lib::uri::{format_pairing_uri, parse_pairing_uri, PairingUri};
//! use pairkit_lib::{PublicKey, RelayDescriptor, Topic};
//!
//! let uri = PairingUri {
//!     version: pairkit_lib::uri::URI_VERSION,
//!     topic: Topic::generate(),
//!     public_key: PublicKey::new("aa".repeat(32)),
//!     relay: RelayDescriptor::default(),
//! };
//! let encoded = format_pairing_uri(&uri);
//! let decoded = parse_pairing_uri(&encoded)?;
//! assert_eq!(decoded, uri);
//! # Ok::<(), pairkit_lib::PairingError>(())
//! ```

use crate::{PairingError, PublicKey, RelayDescriptor, Result, Topic};

/// URI scheme for pairing proposals.
pub const URI_SCHEME: &str = "pairkit";

/// Current pairing URI version.
pub const URI_VERSION: u32 = 1;

/// A parsed pairing URI.
#[derive(Clone, Debug, PartialEq)]
pub struct PairingUri {
    /// Protocol version from the `@{version}` segment.
    pub version: u32,
    /// The proposal topic the proposer listens on.
    pub topic: Topic,
    /// The proposer's public key.
    pub public_key: PublicKey,
    /// Relay the proposer expects the response on.
    pub relay: RelayDescriptor,
}

/// Format a pairing URI as a shareable string.
pub fn format_pairing_uri(uri: &PairingUri) -> String {
    let mut out = format!(
        "{URI_SCHEME}:{}@{}?relay-protocol={}",
        uri.topic.as_str(),
        uri.version,
        uri.relay.protocol,
    );
    if let Some(params) = &uri.relay.params {
        // Relay params are free-form JSON; hex keeps them URI-safe.
        if let Ok(json) = serde_json::to_string(params) {
            out.push_str("&relay-params=");
            out.push_str(&hex::encode(json));
        }
    }
    out.push_str("&key=");
    out.push_str(uri.public_key.as_str());
    out
}

/// Parse a pairing URI string.
///
/// # Errors
///
/// Returns [`PairingError::Uri`] when the scheme, version, or any required
/// component is missing or malformed.
pub fn parse_pairing_uri(uri: &str) -> Result<PairingUri> {
    let uri = uri.trim();

    let rest = uri
        .strip_prefix(URI_SCHEME)
        .and_then(|r| r.strip_prefix(':'))
        .ok_or_else(|| PairingError::Uri(format!("expected {URI_SCHEME}: scheme")))?;

    let (head, query) = rest
        .split_once('?')
        .ok_or_else(|| PairingError::Uri("missing query component".to_string()))?;

    let (topic, version) = head
        .split_once('@')
        .ok_or_else(|| PairingError::Uri("missing @version segment".to_string()))?;
    if topic.is_empty() {
        return Err(PairingError::Uri("empty topic".to_string()));
    }
    let version: u32 = version
        .parse()
        .map_err(|_| PairingError::Uri(format!("invalid version: {version}")))?;

    let mut protocol = None;
    let mut relay_params = None;
    let mut public_key = None;
    for param in query.split('&') {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        match key {
            "relay-protocol" => protocol = Some(value.to_string()),
            "relay-params" => {
                let json = hex::decode(value)
                    .map_err(|e| PairingError::Uri(format!("invalid relay-params hex: {e}")))?;
                let value: serde_json::Value = serde_json::from_slice(&json)
                    .map_err(|e| PairingError::Uri(format!("invalid relay-params json: {e}")))?;
                relay_params = Some(value);
            }
            "key" => public_key = Some(PublicKey::new(value)),
            _ => {
                // Ignore unknown parameters.
            }
        }
    }

    let protocol = protocol
        .ok_or_else(|| PairingError::Uri("missing 'relay-protocol' parameter".to_string()))?;
    let public_key =
        public_key.ok_or_else(|| PairingError::Uri("missing 'key' parameter".to_string()))?;

    Ok(PairingUri {
        version,
        topic: Topic::new(topic),
        public_key,
        relay: RelayDescriptor {
            protocol,
            params: relay_params,
        },
    })
}
