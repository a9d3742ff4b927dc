use thiserror::Error;

use crate::context::SecretKind;
use crate::security::CryptoError;

#[derive(Error, Debug)]
pub enum SecretVaultError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("{kind} '{key}' has expired and must be reissued")]
    SecretExpired { kind: SecretKind, key: String },

    #[error("{kind} '{key}' could not be decrypted")]
    SecretCorrupted { kind: SecretKind, key: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error during {operation}: {message}")]
    Store {
        operation: &'static str,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SecretVaultError {
    pub fn store(operation: &'static str, message: impl Into<String>) -> Self {
        SecretVaultError::Store {
            operation,
            message: message.into(),
        }
    }

    /// Whether a boundary layer should answer with a 404-equivalent.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SecretVaultError::NotFound(_)
                | SecretVaultError::SecretExpired { .. }
                | SecretVaultError::Crypto(CryptoError::Expired)
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            SecretVaultError::Crypto(e) => e.code(),
            SecretVaultError::SecretExpired { .. } => "SECRET_EXPIRED",
            SecretVaultError::SecretCorrupted { .. } => "SECRET_CORRUPTED",
            SecretVaultError::NotFound(_) => "NOT_FOUND",
            SecretVaultError::Store { .. } => "STORE_ERROR",
            SecretVaultError::Config(_) => "CONFIG_ERROR",
            SecretVaultError::Serialization(_) => "SERIALIZATION_ERROR",
            SecretVaultError::Io(_) => "IO_ERROR",
        }
    }
}

impl serde::Serialize for SecretVaultError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("SecretVaultError", 2)?;
        state.serialize_field("code", self.code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

pub type Result<T> = std::result::Result<T, SecretVaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_secret_maps_to_not_found() {
        let err = SecretVaultError::SecretExpired {
            kind: SecretKind::Certificate,
            key: "web".into(),
        };
        assert!(err.is_not_found());
        assert!(!SecretVaultError::store("write", "disk full").is_not_found());
    }

    #[test]
    fn test_corrupted_message_names_key_only() {
        let err = SecretVaultError::SecretCorrupted {
            kind: SecretKind::Credential,
            key: "openai_key".into(),
        };
        let message = err.to_string();
        assert!(message.contains("openai_key"));
        assert!(message.contains("credential"));

        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("SECRET_CORRUPTED"));
    }
}
