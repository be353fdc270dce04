//! Crypto primitives for pairing key agreement and relay envelopes.
//!
//! - **Key pairs**: X25519, one per side per pairing. The secret key never
//!   leaves the process.
//! - **Shared key**: X25519 Diffie-Hellman between the local secret key and
//!   the peer's public key. Symmetric: both sides derive the same value.
//! - **Settled topic**: SHA-256 of the shared key bytes, so the
//!   post-handshake topic is bound to the key agreement itself.
//! - **Envelopes**: AES-256-GCM under the shared key, carrying the sender's
//!   public key in the clear so a receiver that only knows its own secret
//!   key can derive the shared key and open the message (sealed mode).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::StaticSecret;

use crate::{KeyPair, PairingError, PublicKey, Result, SecretKey, SharedKey, Topic};

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Generate a fresh X25519 key pair.
pub fn generate_keypair() -> KeyPair {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = x25519_dalek::PublicKey::from(&secret);
    KeyPair {
        public_key: PublicKey(hex::encode(public.as_bytes())),
        secret_key: SecretKey(hex::encode(secret.to_bytes())),
    }
}

/// Derive the symmetric shared key from our secret key and the peer's
/// public key.
pub fn derive_shared_key(secret: &SecretKey, peer: &PublicKey) -> Result<SharedKey> {
    let secret = StaticSecret::from(decode32("secret key", secret.as_str())?);
    let peer = x25519_dalek::PublicKey::from(decode32("public key", peer.as_str())?);
    let shared = secret.diffie_hellman(&peer);
    Ok(SharedKey(hex::encode(shared.as_bytes())))
}

/// Derive the settled topic for a shared key: `sha256(shared_key)`.
pub fn settled_topic(shared_key: &SharedKey) -> Result<Topic> {
    let bytes = decode32("shared key", shared_key.as_str())?;
    let digest = Sha256::digest(bytes);
    Ok(Topic(hex::encode(digest)))
}

/// 32 fresh random bytes from the OS CSPRNG.
pub fn random_bytes32() -> [u8; 32] {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Encrypted relay message.
///
/// The sender's public key rides in the clear: before settlement the
/// receiver may not yet know who is talking to it, and needs `pk` to derive
/// the shared key from its own secret key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender's public key, hex encoded.
    pub pk: PublicKey,
    /// AES-GCM nonce, hex encoded.
    pub iv: String,
    /// Ciphertext, hex encoded.
    pub data: String,
}

/// Seal a plaintext payload under the shared key.
pub fn seal(shared_key: &SharedKey, sender: &PublicKey, plaintext: &str) -> Result<Envelope> {
    let cipher = cipher_for(shared_key)?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| PairingError::Crypto(format!("encryption failed: {e}")))?;

    Ok(Envelope {
        pk: sender.clone(),
        iv: hex::encode(nonce_bytes),
        data: hex::encode(ciphertext),
    })
}

/// Open an envelope with an already-known shared key.
pub fn open_with_key(shared_key: &SharedKey, envelope: &Envelope) -> Result<String> {
    let cipher = cipher_for(shared_key)?;
    let nonce_bytes = hex::decode(&envelope.iv)
        .map_err(|e| PairingError::Crypto(format!("invalid nonce hex: {e}")))?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(PairingError::Crypto(format!(
            "nonce must be {NONCE_LEN} bytes, got {}",
            nonce_bytes.len()
        )));
    }
    let ciphertext = hex::decode(&envelope.data)
        .map_err(|e| PairingError::Crypto(format!("invalid ciphertext hex: {e}")))?;

    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        .map_err(|_| PairingError::Crypto("decryption failed".to_string()))?;

    String::from_utf8(plaintext)
        .map_err(|e| PairingError::Crypto(format!("plaintext is not utf-8: {e}")))
}

/// Open an envelope knowing only our own secret key, deriving the shared
/// key from the sender's public key carried in the envelope.
pub fn open_sealed(secret: &SecretKey, envelope: &Envelope) -> Result<String> {
    let shared = derive_shared_key(secret, &envelope.pk)?;
    open_with_key(&shared, envelope)
}

fn cipher_for(shared_key: &SharedKey) -> Result<Aes256Gcm> {
    let key = decode32("shared key", shared_key.as_str())?;
    Aes256Gcm::new_from_slice(&key)
        .map_err(|e| PairingError::Crypto(format!("cipher init failed: {e}")))
}

fn decode32(label: &'static str, hex_str: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| PairingError::Crypto(format!("invalid {label} hex: {e}")))?;
    if bytes.len() != 32 {
        return Err(PairingError::Crypto(format!(
            "{label} must be 32 bytes, got {}",
            bytes.len()
        )));
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}
