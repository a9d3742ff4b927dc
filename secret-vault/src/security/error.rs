//! Error types for the encryption engine.
//!
//! These errors never carry plaintext or the AEAD library's own diagnostic
//! text, so they are safe to log and to return across a service boundary.

use thiserror::Error;

/// Errors that can occur while sealing or opening envelopes.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The envelope carries an `expires_at` that is in the past.
    /// Raised before any cryptographic work is attempted.
    #[error("Envelope has expired")]
    Expired,

    /// The authentication tag did not verify against the ciphertext and IV.
    /// Covers tampering, corruption and decrypting under the wrong key.
    #[error("Envelope failed integrity verification")]
    Integrity,

    /// Argon2 rejected its parameters or input.
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// The cipher could not be constructed or refused to encrypt.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Plaintext or envelope could not be encoded.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// A document handed to field encryption was not a JSON object.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
}

impl CryptoError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            CryptoError::Expired => "EXPIRED",
            CryptoError::Integrity => "INTEGRITY_ERROR",
            CryptoError::KeyDerivation(_) => "KEY_DERIVATION_ERROR",
            CryptoError::Encryption(_) => "ENCRYPTION_ERROR",
            CryptoError::Encoding(_) => "ENCODING_ERROR",
            CryptoError::InvalidDocument(_) => "INVALID_DOCUMENT",
        }
    }
}

/// Result type alias for engine operations.
pub type CryptoResult<T> = std::result::Result<T, CryptoError>;

impl serde::Serialize for CryptoError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("CryptoError", 2)?;
        state.serialize_field("code", self.code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_error_serialization() {
        let json = serde_json::to_string(&CryptoError::Integrity).unwrap();
        assert!(json.contains("INTEGRITY_ERROR"));
        assert!(json.contains("integrity verification"));
    }

    #[test]
    fn test_expired_has_distinct_code() {
        assert_ne!(CryptoError::Expired.code(), CryptoError::Integrity.code());
    }
}
