//! Authenticated encryption for secret material.
//!
//! Secrets are sealed with AES-256-GCM under a key derived from the operator
//! secret via Argon2id. Hashing (SHA-256) is provided for audit correlation.

mod engine;
mod envelope;
mod error;
mod fields;
mod key;
mod keyring;

use chrono::{DateTime, Utc};

pub use engine::{hash_content, EncryptionEngine};
pub use envelope::{EncryptedEnvelope, ALGORITHM_AES_256_GCM};
pub use error::{CryptoError, CryptoResult};
pub use fields::{decrypt_fields, encrypt_fields, ENCRYPTED_FIELDS_KEY};
pub use key::{generate_key, EngineKey, KdfParams, APPLICATION_SALT, DEFAULT_GENERATED_KEY_BYTES};
pub use keyring::Keyring;

/// Anything that can seal plaintext into envelopes and open them again.
pub trait Sealer: Send + Sync {
    fn seal(
        &self,
        plaintext: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> CryptoResult<EncryptedEnvelope>;

    fn open(&self, envelope: &EncryptedEnvelope) -> CryptoResult<String>;
}

impl Sealer for EncryptionEngine {
    fn seal(
        &self,
        plaintext: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> CryptoResult<EncryptedEnvelope> {
        self.encrypt(plaintext, expires_at)
    }

    fn open(&self, envelope: &EncryptedEnvelope) -> CryptoResult<String> {
        self.decrypt(envelope)
    }
}

impl EncryptionEngine {
    /// See [`encrypt_fields`].
    pub fn encrypt_fields(
        &self,
        doc: &serde_json::Value,
        field_names: &[&str],
        expires_at: Option<DateTime<Utc>>,
    ) -> CryptoResult<serde_json::Value> {
        encrypt_fields(self, doc, field_names, expires_at)
    }

    /// See [`decrypt_fields`].
    pub fn decrypt_fields(&self, doc: &serde_json::Value) -> CryptoResult<serde_json::Value> {
        decrypt_fields(self, doc)
    }

    /// Static provisioning helper, see [`generate_key`].
    pub fn generate_key(byte_length: usize) -> String {
        generate_key(byte_length)
    }
}
