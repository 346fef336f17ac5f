use thiserror::Error;

use crate::keychain::KeychainProtection;

/// Errors produced by keychains, key providers and the keychain factory.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeychainError {
    /// StrongBox configuration was already applied (or a keychain already exists).
    #[error("keychain factory is already configured")]
    ConfigurationAlreadySet,
    /// Requested minimum protection exceeds what the device provides.
    #[error("keychain protection {requested:?} is not available, device supports {available:?}")]
    ProtectionLevelUnavailable {
        requested: KeychainProtection,
        available: KeychainProtection,
    },
    /// Hardware-backed key generation failed and software fallback was not allowed.
    #[error("hardware backed key is not available for alias: {alias}")]
    HardwareKeyUnavailable { alias: String },
    /// Platform key store is unreachable or corrupt.
    #[error("key store failure: {reason}")]
    KeyStore { reason: String },
    /// Key does not exist and the provider is not allowed to create it.
    #[error("secret key not found for alias: {alias}")]
    KeyNotFound { alias: String },
    /// Stored entry could not be authenticated or decoded.
    #[error("failed to decrypt entry: {key}")]
    Decryption { key: String },
    /// Re-encryption between key providers failed; stored data was left untouched.
    #[error("migration of keychain {identifier} aborted: {reason}")]
    MigrationAborted { identifier: String, reason: String },
    /// Keychain data was written by an unknown format version.
    #[error("unsupported keychain version: {version}")]
    UnsupportedVersion { version: i64 },
    /// Caller attempted to access an entry reserved for keychain metadata.
    #[error("entry name is reserved: {key}")]
    ReservedKey { key: String },
    /// Encryption primitive failure other than authentication.
    #[error("crypto failure: {reason}")]
    Crypto { reason: String },
    /// Underlying persisted store failure.
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

impl KeychainError {
    pub fn storage(reason: impl ToString) -> Self {
        Self::Storage {
            reason: reason.to_string(),
        }
    }

    pub fn key_store(reason: impl ToString) -> Self {
        Self::KeyStore {
            reason: reason.to_string(),
        }
    }
}
