//! Credential vault: secret and key lifecycle over swappable backends.
//!
//! [`VaultManager`] fronts the active [`SecretProvider`] with a TTL cache
//! and adds encrypt-then-store helpers. [`LocalProvider`] is the file-backed
//! reference backend; cloud backends are [`UnconfiguredProvider`] stubs.

pub mod cache;
pub mod cloud;
pub mod local;
pub mod manager;
pub mod provider;

pub use cache::SecretCache;
pub use cloud::UnconfiguredProvider;
pub use local::LocalProvider;
pub use manager::VaultManager;
pub use provider::{DefaultProviderFactory, ProviderFactory, SecretProvider};

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::error::{ClassifiedError, ErrorKind};
use crate::models::vault::{KeyType, ProviderType};

/// Tag marking a secret stored through the encrypt-then-store helper.
pub const ENCRYPTED_TAG: &str = "encrypted";

/// Content type of an encrypted secret's serialized blob.
pub const ENCRYPTED_CONTENT_TYPE: &str = "application/vnd.portico.encrypted+json";

/// Operations assigned to symmetric keys.
pub const SYMMETRIC_KEY_OPERATIONS: [&str; 4] = ["encrypt", "decrypt", "wrapKey", "unwrapKey"];

/// Vault errors.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Key already exists: {0}")]
    KeyExists(String),

    #[error("Secret is not marked as encrypted: {0}")]
    NotEncrypted(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Key type {0:?} is not supported by this provider")]
    UnsupportedKeyType(KeyType),

    #[error("Vault provider not implemented: {0}")]
    ProviderNotImplemented(ProviderType),

    #[error("Provider configuration invalid: {0}")]
    Configuration(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClassifiedError for VaultError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::SecretNotFound(_) | Self::KeyNotFound(_) => ErrorKind::NotFound,
            Self::KeyExists(_) => ErrorKind::Conflict,
            Self::NotEncrypted(_) | Self::Validation(_) | Self::UnsupportedKeyType(_) => {
                ErrorKind::ValidationFailed
            }
            Self::ProviderNotImplemented(_) => ErrorKind::ProviderNotImplemented,
            Self::Crypto(_) => ErrorKind::CryptographicFailure,
            Self::Configuration(_) | Self::Io(_) | Self::Serialization(_) => ErrorKind::Internal,
        }
    }
}

impl VaultError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SecretNotFound(_) | Self::KeyNotFound(_))
    }
}

/// Reject blank or path-like secret names.
pub(crate) fn validate_name(name: &str) -> Result<(), VaultError> {
    if name.trim().is_empty() {
        return Err(VaultError::Validation("name must not be empty".into()));
    }
    if name.len() > 256 {
        return Err(VaultError::Validation("name exceeds 256 characters".into()));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(VaultError::Validation("name contains control characters".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_failures_are_masked() {
        let err = VaultError::from(CryptoError::Decryption);
        assert_eq!(err.kind(), ErrorKind::CryptographicFailure);
        assert_eq!(err.public_message(), "A cryptographic operation failed");
    }

    #[test]
    fn unimplemented_provider_keeps_detail() {
        let err = VaultError::ProviderNotImplemented(ProviderType::AwsSecretsManager);
        assert_eq!(err.kind(), ErrorKind::ProviderNotImplemented);
        assert!(err.public_message().contains("aws-secrets-manager"));
    }

    #[test]
    fn names_are_validated() {
        assert!(validate_name("db-password").is_ok());
        assert!(validate_name("  ").is_err());
        assert!(validate_name("a\nb").is_err());
    }
}
