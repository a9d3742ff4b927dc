//! Engine key material and Argon2id derivation.
//!
//! The 256-bit engine key is derived once from the operator secret and a fixed
//! application salt. The derivation is deliberately slow and memory-hard so a
//! low-entropy operator secret is still expensive to brute-force.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::error::{CryptoError, CryptoResult};

/// Fixed application salt. Every deployment derives from the same salt, so the
/// operator secret alone determines the key.
pub const APPLICATION_SALT: &[u8] = b"secret-vault/context-store/v1";

/// Output length of the derivation (256-bit key for AES-256).
pub const KEY_LEN: usize = 32;

/// Default byte length for `generate_key`.
pub const DEFAULT_GENERATED_KEY_BYTES: usize = 32;

/// Argon2id cost parameters.
///
/// Defaults:
/// - Memory: 64 MB (strong resistance to GPU attacks)
/// - Time: 3 iterations
/// - Parallelism: 4 lanes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

/// A 256-bit encryption key with automatic zeroization on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EngineKey {
    key: [u8; KEY_LEN],
}

impl EngineKey {
    /// Create a key from exactly 32 bytes.
    pub fn from_slice(slice: &[u8]) -> CryptoResult<Self> {
        if slice.len() != KEY_LEN {
            return Err(CryptoError::KeyDerivation(format!(
                "expected {} key bytes, got {}",
                KEY_LEN,
                slice.len()
            )));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(slice);
        Ok(Self { key })
    }

    /// Derive a key from an operator secret using Argon2id and the
    /// application salt.
    pub fn derive(secret: &str, params: &KdfParams) -> CryptoResult<Self> {
        if secret.is_empty() {
            return Err(CryptoError::KeyDerivation(
                "operator secret must not be empty".into(),
            ));
        }

        let params = Params::new(
            params.memory_kib,
            params.iterations,
            params.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| CryptoError::KeyDerivation(format!("Invalid Argon2 params: {}", e)))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key_bytes = [0u8; KEY_LEN];
        argon2
            .hash_password_into(secret.as_bytes(), APPLICATION_SALT, &mut key_bytes)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

        let key = Self::from_slice(&key_bytes);
        key_bytes.zeroize();

        debug!("Derived {}-byte engine key from operator secret", KEY_LEN);
        key
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }
}

impl std::fmt::Debug for EngineKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Generate a fresh random operator secret, hex-encoded.
///
/// `byte_length` random bytes become `2 * byte_length` lowercase hex chars.
pub fn generate_key(byte_length: usize) -> String {
    let mut bytes = vec![0u8; byte_length];
    rand::rng().fill_bytes(&mut bytes);
    let encoded = hex::encode(&bytes);
    bytes.zeroize();
    encoded
}
