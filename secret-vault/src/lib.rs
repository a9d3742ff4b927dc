//! Encrypted per-identity secret storage.
//!
//! Each (workspace, user) pair owns one [`SecretContext`] holding named
//! credentials, SSH keys and certificates. Values are sealed individually
//! with AES-256-GCM under an Argon2id-derived key, persisted through a
//! [`storage::RowStore`] behind a read-through cache, and every access is
//! recorded in an audit trail that carries hashes, never values.

pub mod audit;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod security;
pub mod service;
pub mod state;
pub mod storage;

pub use config::{load_config, VaultConfig};
pub use context::{
    CertificateInput, ContextKey, CredentialInput, DecryptedCertificate, DecryptedSshKey,
    SecretContext, SecretKind, SecretMetadata, SshKeyInput,
};
pub use error::{Result, SecretVaultError};
pub use security::{EncryptedEnvelope, EncryptionEngine, Keyring};
pub use service::SecretContextService;
pub use state::VaultState;
