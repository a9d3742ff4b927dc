//! Secret contexts: one aggregate per (workspace, user) identity.
//!
//! A context holds three independent name → entry maps. Each entry carries
//! its own envelope plus the non-sensitive metadata needed for listing.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SecretVaultError};
use crate::security::{hash_content, EncryptedEnvelope};

/// Number of hex chars kept from the SHA-256 of a public key.
const FINGERPRINT_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretKind {
    Credential,
    SshKey,
    Certificate,
}

impl SecretKind {
    pub const ALL: [SecretKind; 3] = [
        SecretKind::Credential,
        SecretKind::SshKey,
        SecretKind::Certificate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credential => "credential",
            Self::SshKey => "ssh_key",
            Self::Certificate => "certificate",
        }
    }
}

impl fmt::Display for SecretKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecretKind {
    type Err = SecretVaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "credential" => Ok(Self::Credential),
            "ssh_key" | "ssh-key" | "sshkey" => Ok(Self::SshKey),
            "certificate" => Ok(Self::Certificate),
            other => Err(SecretVaultError::NotFound(format!(
                "unknown secret kind '{}'",
                other
            ))),
        }
    }
}

/// Identity that owns a context. Trusted as already authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextKey {
    pub workspace_id: String,
    pub user_id: String,
}

impl ContextKey {
    pub fn new(workspace_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            user_id: user_id.into(),
        }
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.workspace_id, self.user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedCredential {
    pub envelope: EncryptedEnvelope,
    pub credential_type: String,
    pub provider: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSshKey {
    pub envelope: EncryptedEnvelope,
    pub key_type: String,
    pub public_key: String,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedCertificate {
    pub envelope: EncryptedEnvelope,
    pub certificate_type: String,
    pub common_name: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// All encrypted material belonging to one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretContext {
    pub id: Uuid,
    pub workspace_id: String,
    pub user_id: String,
    #[serde(default)]
    pub credentials: BTreeMap<String, EncryptedCredential>,
    #[serde(default)]
    pub ssh_keys: BTreeMap<String, EncryptedSshKey>,
    #[serde(default)]
    pub certificates: BTreeMap<String, EncryptedCertificate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SecretContext {
    pub fn new(key: &ContextKey) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workspace_id: key.workspace_id.clone(),
            user_id: key.user_id.clone(),
            credentials: BTreeMap::new(),
            ssh_keys: BTreeMap::new(),
            certificates: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> ContextKey {
        ContextKey::new(&self.workspace_id, &self.user_id)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn contains(&self, kind: SecretKind, name: &str) -> bool {
        match kind {
            SecretKind::Credential => self.credentials.contains_key(name),
            SecretKind::SshKey => self.ssh_keys.contains_key(name),
            SecretKind::Certificate => self.certificates.contains_key(name),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty() && self.ssh_keys.is_empty() && self.certificates.is_empty()
    }

    /// Serialized form of one entry, used for audit hashing.
    pub fn serialized_entry(&self, kind: SecretKind, name: &str) -> Result<Option<String>> {
        let serialized = match kind {
            SecretKind::Credential => self.credentials.get(name).map(serde_json::to_string),
            SecretKind::SshKey => self.ssh_keys.get(name).map(serde_json::to_string),
            SecretKind::Certificate => self.certificates.get(name).map(serde_json::to_string),
        };
        Ok(serialized.transpose()?)
    }

    /// Remove an entry, returning whether it existed.
    pub fn remove(&mut self, kind: SecretKind, name: &str) -> bool {
        match kind {
            SecretKind::Credential => self.credentials.remove(name).is_some(),
            SecretKind::SshKey => self.ssh_keys.remove(name).is_some(),
            SecretKind::Certificate => self.certificates.remove(name).is_some(),
        }
    }

    /// Mutable access to every envelope with its kind and name.
    pub fn envelopes_mut(&mut self) -> Vec<(SecretKind, &str, &mut EncryptedEnvelope)> {
        let mut all = Vec::new();
        for (name, entry) in self.credentials.iter_mut() {
            all.push((SecretKind::Credential, name.as_str(), &mut entry.envelope));
        }
        for (name, entry) in self.ssh_keys.iter_mut() {
            all.push((SecretKind::SshKey, name.as_str(), &mut entry.envelope));
        }
        for (name, entry) in self.certificates.iter_mut() {
            all.push((SecretKind::Certificate, name.as_str(), &mut entry.envelope));
        }
        all
    }

    /// Non-sensitive listing of every entry. Never touches ciphertext.
    pub fn metadata(&self) -> Vec<SecretMetadata> {
        let credentials = self.credentials.iter().map(|(name, c)| SecretMetadata {
            key: name.clone(),
            kind: SecretKind::Credential,
            secret_type: c.credential_type.clone(),
            provider: Some(c.provider.clone()),
            fingerprint: None,
            common_name: None,
            key_version: c.envelope.key_version,
            expires_at: c.envelope.expires_at,
            created_at: c.created_at,
            updated_at: c.updated_at,
        });
        let ssh_keys = self.ssh_keys.iter().map(|(name, k)| SecretMetadata {
            key: name.clone(),
            kind: SecretKind::SshKey,
            secret_type: k.key_type.clone(),
            provider: None,
            fingerprint: Some(k.fingerprint.clone()),
            common_name: None,
            key_version: k.envelope.key_version,
            expires_at: k.envelope.expires_at,
            created_at: k.created_at,
            updated_at: k.updated_at,
        });
        let certificates = self.certificates.iter().map(|(name, c)| SecretMetadata {
            key: name.clone(),
            kind: SecretKind::Certificate,
            secret_type: c.certificate_type.clone(),
            provider: None,
            fingerprint: None,
            common_name: Some(c.common_name.clone()),
            key_version: c.envelope.key_version,
            expires_at: c.expires_at.or(c.envelope.expires_at),
            created_at: c.created_at,
            updated_at: c.updated_at,
        });

        credentials.chain(ssh_keys).chain(certificates).collect()
    }

    pub fn to_document(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_document(doc: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(doc)?)
    }
}

/// Listing row. Deliberately has no value field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretMetadata {
    pub key: String,
    pub kind: SecretKind,
    pub secret_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    pub key_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Truncated SHA-256 of the public key text. Not an OpenSSH fingerprint.
pub fn ssh_fingerprint(public_key: &str) -> String {
    let mut digest = hash_content(public_key);
    digest.truncate(FINGERPRINT_LEN);
    digest
}

// =========================================================================
// Write inputs and decrypted outputs
// =========================================================================

#[derive(Debug, Clone)]
pub struct CredentialInput {
    pub key: String,
    pub value: String,
    pub credential_type: String,
    pub provider: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CredentialInput {
    pub fn new(
        key: impl Into<String>,
        value: impl Into<String>,
        credential_type: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            credential_type: credential_type.into(),
            provider: provider.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

#[derive(Debug, Clone)]
pub struct SshKeyInput {
    pub key: String,
    pub private_key: String,
    pub public_key: String,
    pub key_type: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SshKeyInput {
    pub fn new(
        key: impl Into<String>,
        private_key: impl Into<String>,
        public_key: impl Into<String>,
        key_type: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            private_key: private_key.into(),
            public_key: public_key.into(),
            key_type: key_type.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

#[derive(Debug, Clone)]
pub struct CertificateInput {
    pub key: String,
    pub certificate: String,
    pub certificate_type: String,
    pub common_name: String,
    /// Also used as the envelope expiry.
    pub expires_at: Option<DateTime<Utc>>,
}

impl CertificateInput {
    pub fn new(
        key: impl Into<String>,
        certificate: impl Into<String>,
        certificate_type: impl Into<String>,
        common_name: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            certificate: certificate.into(),
            certificate_type: certificate_type.into(),
            common_name: common_name.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedSshKey {
    pub private_key: String,
    pub public_key: String,
    pub key_type: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedCertificate {
    pub certificate: String,
    pub certificate_type: String,
    pub common_name: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::ALGORITHM_AES_256_GCM;

    fn envelope() -> EncryptedEnvelope {
        EncryptedEnvelope {
            ciphertext: "ab".into(),
            algorithm: ALGORITHM_AES_256_GCM.into(),
            iv: "00".into(),
            auth_tag: "00".into(),
            created_at: Utc::now(),
            expires_at: None,
            key_version: 1,
        }
    }

    fn sample() -> SecretContext {
        let mut context = SecretContext::new(&ContextKey::new("w1", "u1"));
        let now = Utc::now();
        context.credentials.insert(
            "openai_key".into(),
            EncryptedCredential {
                envelope: envelope(),
                credential_type: "api_key".into(),
                provider: "openai".into(),
                created_at: now,
                updated_at: now,
            },
        );
        context.ssh_keys.insert(
            "deploy".into(),
            EncryptedSshKey {
                envelope: envelope(),
                key_type: "ed25519".into(),
                public_key: "ssh-ed25519 AAAA".into(),
                fingerprint: ssh_fingerprint("ssh-ed25519 AAAA"),
                created_at: now,
                updated_at: now,
            },
        );
        context
    }

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in SecretKind::ALL {
            assert_eq!(kind.as_str().parse::<SecretKind>().unwrap(), kind);
        }
        assert!("password".parse::<SecretKind>().is_err());
    }

    #[test]
    fn test_document_round_trip() {
        let context = sample();
        let doc = context.to_document().unwrap();
        assert_eq!(doc["workspace_id"], "w1");
        assert!(doc["credentials"]["openai_key"]["envelope"].is_object());
        assert_eq!(SecretContext::from_document(doc).unwrap(), context);
    }

    #[test]
    fn test_metadata_has_no_values() {
        let listing = sample().metadata();
        assert_eq!(listing.len(), 2);

        let credential = listing.iter().find(|m| m.kind == SecretKind::Credential).unwrap();
        assert_eq!(credential.key, "openai_key");
        assert_eq!(credential.provider.as_deref(), Some("openai"));

        let json = serde_json::to_string(&listing).unwrap();
        assert!(!json.contains("ciphertext"));
        assert!(!json.contains("\"value\""));
    }

    #[test]
    fn test_remove_reports_presence() {
        let mut context = sample();
        assert!(context.contains(SecretKind::SshKey, "deploy"));
        assert!(context.remove(SecretKind::SshKey, "deploy"));
        assert!(!context.remove(SecretKind::SshKey, "deploy"));
        assert!(!context.contains(SecretKind::SshKey, "deploy"));
    }

    #[test]
    fn test_fingerprint_is_truncated_hash() {
        let fingerprint = ssh_fingerprint("ssh-ed25519 AAAA");
        assert_eq!(fingerprint.len(), FINGERPRINT_LEN);
        assert!(hash_content("ssh-ed25519 AAAA").starts_with(&fingerprint));
    }
}
