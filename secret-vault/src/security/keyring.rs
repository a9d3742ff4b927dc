//! Active engine plus the retired engines still needed to open older envelopes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::engine::EncryptionEngine;
use super::envelope::EncryptedEnvelope;
use super::error::{CryptoError, CryptoResult};
use super::Sealer;

#[derive(Debug)]
pub struct Keyring {
    active: EncryptionEngine,
    retired: HashMap<u32, EncryptionEngine>,
}

impl Keyring {
    pub fn new(active: EncryptionEngine) -> Self {
        Self {
            active,
            retired: HashMap::new(),
        }
    }

    /// Register an engine that can still decrypt but never encrypts.
    pub fn with_retired(mut self, engine: EncryptionEngine) -> CryptoResult<Self> {
        let version = engine.key_version();
        if version == self.active.key_version() {
            return Err(CryptoError::KeyDerivation(format!(
                "key version {} is already the active version",
                version
            )));
        }
        if self.retired.insert(version, engine).is_some() {
            warn!("Replaced retired engine for key version {}", version);
        }
        Ok(self)
    }

    pub fn active(&self) -> &EncryptionEngine {
        &self.active
    }

    pub fn active_version(&self) -> u32 {
        self.active.key_version()
    }

    pub fn retired_versions(&self) -> Vec<u32> {
        let mut versions: Vec<u32> = self.retired.keys().copied().collect();
        versions.sort_unstable();
        versions
    }

    /// Engine able to open envelopes stamped with `version`.
    pub fn engine_for(&self, version: u32) -> Option<&EncryptionEngine> {
        if version == self.active.key_version() {
            Some(&self.active)
        } else {
            self.retired.get(&version)
        }
    }

    /// Whether the envelope should be re-encrypted under the active key.
    pub fn is_stale(&self, envelope: &EncryptedEnvelope) -> bool {
        envelope.key_version != self.active.key_version()
    }

    pub fn encrypt(
        &self,
        plaintext: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> CryptoResult<EncryptedEnvelope> {
        self.active.encrypt(plaintext, expires_at)
    }

    /// Decrypt with the engine matching the envelope's key version. Unknown
    /// versions fall back to the active engine, which fails integrity.
    pub fn decrypt(&self, envelope: &EncryptedEnvelope) -> CryptoResult<String> {
        match self.engine_for(envelope.key_version) {
            Some(engine) => engine.decrypt(envelope),
            None => {
                debug!(
                    "No engine for key version {}, trying active version {}",
                    envelope.key_version,
                    self.active.key_version()
                );
                self.active.decrypt(envelope)
            }
        }
    }

    pub fn verify(&self, envelope: &EncryptedEnvelope) -> bool {
        self.decrypt(envelope).is_ok()
    }

    /// Open under the envelope's own key and reseal under the active key,
    /// keeping the original expiry.
    pub fn reencrypt(&self, envelope: &EncryptedEnvelope) -> CryptoResult<EncryptedEnvelope> {
        let plaintext = self.decrypt(envelope)?;
        self.active.encrypt(&plaintext, envelope.expires_at)
    }
}

impl Sealer for Keyring {
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
