//! WireGuard key material
//!
//! Curve25519 key pairs in the base64 encoding `wg` uses.

use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

/// WireGuard key pair, both halves base64 encoded
#[derive(Debug, Clone)]
pub struct WgKeyPair {
    pub private_key: String,
    pub public_key: String,
}

/// Generate a WireGuard keypair using x25519
pub fn generate_keypair() -> WgKeyPair {
    let mut private_key_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut private_key_bytes);

    // Curve25519 clamping, as `wg genkey` does
    private_key_bytes[0] &= 248;
    private_key_bytes[31] &= 127;
    private_key_bytes[31] |= 64;

    let secret = StaticSecret::from(private_key_bytes);
    let public = PublicKey::from(&secret);

    WgKeyPair {
        private_key: STANDARD.encode(private_key_bytes),
        public_key: STANDARD.encode(public.as_bytes()),
    }
}

/// Derive the public half of a base64 private key, like `wg pubkey`.
pub fn public_key_from_private(private_key: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(private_key.trim())
        .map_err(|e| Error::validation(format!("invalid private key: {}", e)))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::validation("invalid private key length"))?;
    let secret = StaticSecret::from(bytes);
    Ok(STANDARD.encode(PublicKey::from(&secret).as_bytes()))
}

/// Stable pseudo public key for an identifier: base64(sha256(id)).
pub fn deterministic_key(id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    STANDARD.encode(hasher.finalize())
}
