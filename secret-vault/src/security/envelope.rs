use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Algorithm identifier stamped on every envelope.
pub const ALGORITHM_AES_256_GCM: &str = "aes-256-gcm";

/// Self-contained output of one encrypt call.
///
/// Binary fields are lowercase hex. The auth tag is stored apart from the
/// ciphertext so either can be inspected independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub ciphertext: String,
    #[serde(rename = "algorithm_id", alias = "algorithm")]
    pub algorithm: String,
    pub iv: String,
    pub auth_tag: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub key_version: u32,
}

impl EncryptedEnvelope {
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Heuristic used by field decryption to recognise an envelope inside an
    /// arbitrary JSON value.
    pub fn looks_like(value: &serde_json::Value) -> bool {
        value.as_object().is_some_and(|map| {
            ["ciphertext", "iv", "auth_tag", "key_version"]
                .iter()
                .all(|field| map.contains_key(*field))
        })
    }
}
