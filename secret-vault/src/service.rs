//! SecretContextService - store, retrieve, list and delete secrets for an
//! identity.
//!
//! Every operation is a linear sequence of awaited steps:
//! - write: load-or-create context → encrypt → upsert entry → persist →
//!   invalidate cache → audit (hash of the plaintext)
//! - read: load context (cache first) → look up entry → decrypt → audit
//!
//! Writers to the same identity inside one process are serialized by a
//! per-context lock, so two writers touching different entries of the same
//! context cannot lose each other's update. Separate processes sharing a row
//! store are still last-write-wins.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::audit::{AuditLog, AuditLogEntry, AuditOperation};
use crate::context::{
    ssh_fingerprint, CertificateInput, ContextKey, CredentialInput, DecryptedCertificate,
    DecryptedSshKey, EncryptedCertificate, EncryptedCredential, EncryptedSshKey, SecretContext,
    SecretKind, SecretMetadata, SshKeyInput,
};
use crate::error::{Result, SecretVaultError};
use crate::security::{hash_content, CryptoError, EncryptedEnvelope, Keyring};
use crate::storage::SecretRecordStore;

/// Resource key used for audit entries that cover a whole context.
const ALL_RESOURCES: &str = "*";

pub struct SecretContextService {
    keyring: Arc<Keyring>,
    records: Arc<SecretRecordStore>,
    audit: AuditLog,
    locks: Mutex<HashMap<ContextKey, Arc<Mutex<()>>>>,
}

impl SecretContextService {
    pub fn new(keyring: Arc<Keyring>, records: Arc<SecretRecordStore>, audit: AuditLog) -> Self {
        Self {
            keyring,
            records,
            audit,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    pub fn records(&self) -> &SecretRecordStore {
        &self.records
    }

    // =========================================================================
    // Credentials
    // =========================================================================

    pub async fn store_credential(
        &self,
        workspace_id: &str,
        user_id: &str,
        input: CredentialInput,
    ) -> Result<()> {
        let identity = ContextKey::new(workspace_id, user_id);
        let _guard = self.lock_context(&identity).await;

        let mut context = self.load_or_create(&identity).await?;
        let old_hash = entry_hash(&context, SecretKind::Credential, &input.key)?;
        let envelope = self.keyring.encrypt(&input.value, input.expires_at)?;

        let now = Utc::now();
        let created_at = context
            .credentials
            .get(&input.key)
            .map_or(now, |existing| existing.created_at);
        context.credentials.insert(
            input.key.clone(),
            EncryptedCredential {
                envelope,
                credential_type: input.credential_type,
                provider: input.provider,
                created_at,
                updated_at: now,
            },
        );

        self.commit(
            &identity,
            context,
            SecretKind::Credential,
            &input.key,
            old_hash,
            hash_content(&input.value),
        )
        .await
    }

    /// Decrypted credential value, or `None` when the context or entry is absent.
    pub async fn get_credential(
        &self,
        workspace_id: &str,
        user_id: &str,
        key: &str,
    ) -> Result<Option<String>> {
        let identity = ContextKey::new(workspace_id, user_id);
        let Some(context) = self.records.read(&identity).await? else {
            return Ok(None);
        };
        let Some(entry) = context.credentials.get(key) else {
            return Ok(None);
        };

        let value = self
            .open(&identity, SecretKind::Credential, key, &entry.envelope)
            .await?;
        Ok(Some(value))
    }

    // =========================================================================
    // SSH keys
    // =========================================================================

    pub async fn store_ssh_key(
        &self,
        workspace_id: &str,
        user_id: &str,
        input: SshKeyInput,
    ) -> Result<()> {
        let identity = ContextKey::new(workspace_id, user_id);
        let _guard = self.lock_context(&identity).await;

        let mut context = self.load_or_create(&identity).await?;
        let old_hash = entry_hash(&context, SecretKind::SshKey, &input.key)?;
        let envelope = self.keyring.encrypt(&input.private_key, input.expires_at)?;

        let now = Utc::now();
        let created_at = context
            .ssh_keys
            .get(&input.key)
            .map_or(now, |existing| existing.created_at);
        let fingerprint = ssh_fingerprint(&input.public_key);
        context.ssh_keys.insert(
            input.key.clone(),
            EncryptedSshKey {
                envelope,
                key_type: input.key_type,
                public_key: input.public_key,
                fingerprint,
                created_at,
                updated_at: now,
            },
        );

        self.commit(
            &identity,
            context,
            SecretKind::SshKey,
            &input.key,
            old_hash,
            hash_content(&input.private_key),
        )
        .await
    }

    pub async fn get_ssh_key(
        &self,
        workspace_id: &str,
        user_id: &str,
        key: &str,
    ) -> Result<Option<DecryptedSshKey>> {
        let identity = ContextKey::new(workspace_id, user_id);
        let Some(context) = self.records.read(&identity).await? else {
            return Ok(None);
        };
        let Some(entry) = context.ssh_keys.get(key) else {
            return Ok(None);
        };

        let private_key = self
            .open(&identity, SecretKind::SshKey, key, &entry.envelope)
            .await?;
        Ok(Some(DecryptedSshKey {
            private_key,
            public_key: entry.public_key.clone(),
            key_type: entry.key_type.clone(),
            fingerprint: entry.fingerprint.clone(),
        }))
    }

    // =========================================================================
    // Certificates
    // =========================================================================

    /// The certificate's own expiry is also its envelope expiry, so an expired
    /// certificate reads back as `SecretExpired`.
    pub async fn store_certificate(
        &self,
        workspace_id: &str,
        user_id: &str,
        input: CertificateInput,
    ) -> Result<()> {
        let identity = ContextKey::new(workspace_id, user_id);
        let _guard = self.lock_context(&identity).await;

        let mut context = self.load_or_create(&identity).await?;
        let old_hash = entry_hash(&context, SecretKind::Certificate, &input.key)?;
        let envelope = self.keyring.encrypt(&input.certificate, input.expires_at)?;

        let now = Utc::now();
        let created_at = context
            .certificates
            .get(&input.key)
            .map_or(now, |existing| existing.created_at);
        context.certificates.insert(
            input.key.clone(),
            EncryptedCertificate {
                envelope,
                certificate_type: input.certificate_type,
                common_name: input.common_name,
                expires_at: input.expires_at,
                created_at,
                updated_at: now,
            },
        );

        self.commit(
            &identity,
            context,
            SecretKind::Certificate,
            &input.key,
            old_hash,
            hash_content(&input.certificate),
        )
        .await
    }

    pub async fn get_certificate(
        &self,
        workspace_id: &str,
        user_id: &str,
        key: &str,
    ) -> Result<Option<DecryptedCertificate>> {
        let identity = ContextKey::new(workspace_id, user_id);
        let Some(context) = self.records.read(&identity).await? else {
            return Ok(None);
        };
        let Some(entry) = context.certificates.get(key) else {
            return Ok(None);
        };

        let certificate = self
            .open(&identity, SecretKind::Certificate, key, &entry.envelope)
            .await?;
        Ok(Some(DecryptedCertificate {
            certificate,
            certificate_type: entry.certificate_type.clone(),
            common_name: entry.common_name.clone(),
            expires_at: entry.expires_at,
        }))
    }

    // =========================================================================
    // Listing and deletion
    // =========================================================================

    /// Metadata for every secret of an identity. Never decrypts.
    pub async fn list_secrets(
        &self,
        workspace_id: &str,
        user_id: &str,
    ) -> Result<Vec<SecretMetadata>> {
        let identity = ContextKey::new(workspace_id, user_id);
        let listing = self
            .records
            .read(&identity)
            .await?
            .map(|context| context.metadata())
            .unwrap_or_default();

        self.audit
            .record(AuditLogEntry::success(
                &identity,
                AuditOperation::List,
                None,
                ALL_RESOURCES,
            ))
            .await;

        debug!("Listed {} secrets for {}", listing.len(), identity);
        Ok(listing)
    }

    /// Remove one named entry. Returns `false`, without auditing, when the
    /// entry does not exist.
    pub async fn delete_secret(
        &self,
        workspace_id: &str,
        user_id: &str,
        kind: SecretKind,
        key: &str,
    ) -> Result<bool> {
        let identity = ContextKey::new(workspace_id, user_id);
        let _guard = self.lock_context(&identity).await;

        let Some(mut context) = self.records.read(&identity).await? else {
            return Ok(false);
        };
        let Some(old_hash) = entry_hash(&context, kind, key)? else {
            return Ok(false);
        };

        context.remove(kind, key);
        context.touch();
        self.records.write(&context).await?;

        self.audit
            .record(
                AuditLogEntry::success(&identity, AuditOperation::Delete, Some(kind), key)
                    .with_old_hash(Some(old_hash)),
            )
            .await;

        info!("Deleted {} '{}' for {}", kind, key, identity);
        Ok(true)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Re-encrypt every entry sealed under a non-active key version. Entries
    /// that cannot be opened are left untouched and audited as failed.
    /// Returns the number of entries moved to the active key.
    pub async fn reencrypt_context(&self, workspace_id: &str, user_id: &str) -> Result<usize> {
        let identity = ContextKey::new(workspace_id, user_id);
        let _guard = self.lock_context(&identity).await;

        let Some(mut context) = self.records.read(&identity).await? else {
            return Ok(0);
        };

        let mut rotated = Vec::new();
        let mut failed = Vec::new();
        for (kind, name, envelope) in context.envelopes_mut() {
            if !self.keyring.is_stale(envelope) {
                continue;
            }
            match self.keyring.reencrypt(envelope) {
                Ok(resealed) => {
                    *envelope = resealed;
                    rotated.push((kind, name.to_string()));
                }
                Err(e) => {
                    warn!("Could not re-encrypt {} '{}' for {}: {}", kind, name, identity, e);
                    failed.push((kind, name.to_string(), e));
                }
            }
        }

        for (kind, name, e) in failed {
            self.audit
                .record(AuditLogEntry::failed(
                    &identity,
                    AuditOperation::Rotate,
                    Some(kind),
                    name,
                    e.to_string(),
                ))
                .await;
        }

        if rotated.is_empty() {
            return Ok(0);
        }

        context.touch();
        self.records.write(&context).await?;

        for (kind, name) in &rotated {
            self.audit
                .record(AuditLogEntry::success(
                    &identity,
                    AuditOperation::Rotate,
                    Some(*kind),
                    name.as_str(),
                ))
                .await;
        }

        info!(
            "Re-encrypted {} entries for {} under key version {}",
            rotated.len(),
            identity,
            self.keyring.active_version()
        );
        Ok(rotated.len())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn lock_context(&self, identity: &ContextKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Drop locks nobody holds or waits on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(identity.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    async fn load_or_create(&self, identity: &ContextKey) -> Result<SecretContext> {
        match self.records.read(identity).await? {
            Some(context) => Ok(context),
            None => {
                info!("Creating secret context for {}", identity);
                Ok(SecretContext::new(identity))
            }
        }
    }

    /// Persist a mutated context and audit the write.
    async fn commit(
        &self,
        identity: &ContextKey,
        mut context: SecretContext,
        kind: SecretKind,
        key: &str,
        old_hash: Option<String>,
        new_hash: String,
    ) -> Result<()> {
        let operation = if old_hash.is_some() {
            AuditOperation::Update
        } else {
            AuditOperation::Create
        };

        context.touch();
        if let Err(e) = self.records.write(&context).await {
            self.audit
                .record(AuditLogEntry::failed(
                    identity,
                    operation,
                    Some(kind),
                    key,
                    e.to_string(),
                ))
                .await;
            return Err(e);
        }

        self.audit
            .record(
                AuditLogEntry::success(identity, operation, Some(kind), key)
                    .with_old_hash(old_hash)
                    .with_new_hash(Some(new_hash)),
            )
            .await;

        info!("Stored {} '{}' for {} ({})", kind, key, identity, operation);
        Ok(())
    }

    /// Decrypt one entry and audit the outcome. Errors name the entry only.
    async fn open(
        &self,
        identity: &ContextKey,
        kind: SecretKind,
        key: &str,
        envelope: &EncryptedEnvelope,
    ) -> Result<String> {
        match self.keyring.decrypt(envelope) {
            Ok(plaintext) => {
                self.audit
                    .record(AuditLogEntry::success(
                        identity,
                        AuditOperation::Read,
                        Some(kind),
                        key,
                    ))
                    .await;
                Ok(plaintext)
            }
            Err(e) => {
                warn!("Failed to decrypt {} '{}' for {}: {}", kind, key, identity, e.code());
                let err = match e {
                    CryptoError::Expired => SecretVaultError::SecretExpired {
                        kind,
                        key: key.to_string(),
                    },
                    _ => SecretVaultError::SecretCorrupted {
                        kind,
                        key: key.to_string(),
                    },
                };
                self.audit
                    .record(AuditLogEntry::failed(
                        identity,
                        AuditOperation::Read,
                        Some(kind),
                        key,
                        err.to_string(),
                    ))
                    .await;
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for SecretContextService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretContextService")
            .field("active_key_version", &self.keyring.active_version())
            .finish_non_exhaustive()
    }
}

fn entry_hash(context: &SecretContext, kind: SecretKind, key: &str) -> Result<Option<String>> {
    Ok(context
        .serialized_entry(kind, key)?
        .map(|serialized| hash_content(&serialized)))
}
