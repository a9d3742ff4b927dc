//! EncryptionEngine - converts plaintext to and from authenticated envelopes.
//!
//! Each engine owns one AES-256-GCM key and the key version it stamps on
//! everything it seals. Rotating keys means constructing a new engine with a
//! new key and version; see [`Keyring`](super::Keyring) for holding several.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::envelope::{EncryptedEnvelope, ALGORITHM_AES_256_GCM};
use super::error::{CryptoError, CryptoResult};
use super::key::{EngineKey, KdfParams};

/// Nonce size for AES-GCM (96 bits = 12 bytes)
const NONCE_SIZE: usize = 12;

/// Authentication tag size appended by AES-GCM.
const TAG_SIZE: usize = 16;

pub struct EncryptionEngine {
    key: EngineKey,
    key_version: u32,
}

impl EncryptionEngine {
    /// Build an engine from an operator secret. Runs the Argon2id derivation
    /// once; every later call reuses the derived key.
    pub fn new(operator_secret: &str, key_version: u32, kdf: &KdfParams) -> CryptoResult<Self> {
        let key = EngineKey::derive(operator_secret, kdf)?;
        Ok(Self::from_key(key, key_version))
    }

    /// Build an engine around already-derived key material.
    pub fn from_key(key: EngineKey, key_version: u32) -> Self {
        Self { key, key_version }
    }

    pub fn key_version(&self) -> u32 {
        self.key_version
    }

    fn cipher(&self) -> CryptoResult<Aes256Gcm> {
        Aes256Gcm::new_from_slice(self.key.as_bytes())
            .map_err(|e| CryptoError::Encryption(format!("Invalid key: {}", e)))
    }

    /// Seal a UTF-8 plaintext.
    pub fn encrypt(
        &self,
        plaintext: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> CryptoResult<EncryptedEnvelope> {
        self.encrypt_bytes(plaintext.as_bytes(), expires_at)
    }

    /// Seal arbitrary bytes. A fresh random IV is drawn on every call.
    pub fn encrypt_bytes(
        &self,
        plaintext: &[u8],
        expires_at: Option<DateTime<Utc>>,
    ) -> CryptoResult<EncryptedEnvelope> {
        let cipher = self.cipher()?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // aes-gcm returns ciphertext || tag
        let mut sealed = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::Encryption("Encryption failed".into()))?;
        let tag = sealed.split_off(sealed.len() - TAG_SIZE);

        Ok(EncryptedEnvelope {
            ciphertext: hex::encode(&sealed),
            algorithm: ALGORITHM_AES_256_GCM.to_string(),
            iv: hex::encode(nonce_bytes),
            auth_tag: hex::encode(tag),
            created_at: Utc::now(),
            expires_at,
            key_version: self.key_version,
        })
    }

    /// Open an envelope back into a UTF-8 string.
    pub fn decrypt(&self, envelope: &EncryptedEnvelope) -> CryptoResult<String> {
        let bytes = self.decrypt_bytes(envelope)?;
        String::from_utf8(bytes)
            .map_err(|_| CryptoError::Encoding("Plaintext is not valid UTF-8".into()))
    }

    /// Open an envelope. Expiry is checked first; nothing cryptographic runs
    /// for an expired envelope. Returns either the exact plaintext or an error.
    pub fn decrypt_bytes(&self, envelope: &EncryptedEnvelope) -> CryptoResult<Vec<u8>> {
        if envelope.is_expired() {
            debug!("Refusing to decrypt expired envelope");
            return Err(CryptoError::Expired);
        }

        if envelope.algorithm != ALGORITHM_AES_256_GCM {
            return Err(CryptoError::Integrity);
        }

        let nonce_bytes = decode_hex(&envelope.iv)?;
        let tag = decode_hex(&envelope.auth_tag)?;
        if nonce_bytes.len() != NONCE_SIZE || tag.len() != TAG_SIZE {
            return Err(CryptoError::Integrity);
        }

        let mut sealed = decode_hex(&envelope.ciphertext)?;
        sealed.extend_from_slice(&tag);

        let cipher = self.cipher()?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        // Tag mismatch = tampered envelope or wrong key
        cipher
            .decrypt(nonce, sealed.as_ref())
            .map_err(|_| CryptoError::Integrity)
    }

    /// Whether the envelope opens cleanly under this engine.
    pub fn verify(&self, envelope: &EncryptedEnvelope) -> bool {
        self.decrypt_bytes(envelope).is_ok()
    }

    /// One-way digest for audit correlation. Not a confidentiality mechanism.
    pub fn hash(data: &str) -> String {
        hash_content(data)
    }
}

impl std::fmt::Debug for EncryptionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionEngine")
            .field("key", &self.key)
            .field("key_version", &self.key_version)
            .finish()
    }
}

/// SHA-256 of `content` as 64 lowercase hex chars.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Strict lowercase hex decoding. Any other character counts as tampering,
/// so an altered character can never decode to the original bytes.
fn decode_hex(value: &str) -> CryptoResult<Vec<u8>> {
    if !value
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return Err(CryptoError::Integrity);
    }
    hex::decode(value).map_err(|_| CryptoError::Integrity)
}
