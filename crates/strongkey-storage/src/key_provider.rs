use std::{fmt, sync::Arc};

use strongkey_core::KeychainError;
use tracing::{debug, warn};

use crate::{
    key_store::{KeyAuthentication, KeyGenRequest, KeyStore, KeyStoreError, SecretKey},
    strongbox::StrongBoxSupport,
};

/// Resolves one key alias to an AES-GCM key, generating it on demand.
///
/// A primary provider asks for StrongBox isolation whenever its support oracle
/// reports StrongBox as enabled; a backup provider never does. Providers are
/// compared by identity (`Arc::ptr_eq`), never structurally.
pub struct SymmetricKeyProvider {
    key_store: Arc<dyn KeyStore>,
    alias: String,
    is_primary: bool,
    strongbox_support: Arc<dyn StrongBoxSupport>,
    key_size_bits: usize,
    create_if_missing: bool,
    authentication: Option<KeyAuthentication>,
}

impl SymmetricKeyProvider {
    /// Build a provider for an AES-GCM key. Fails with `KeyStore` when the
    /// platform key store is unusable or the key size is not 128 or 256 bits.
    pub fn aes_gcm(
        key_store: Arc<dyn KeyStore>,
        alias: impl Into<String>,
        is_primary: bool,
        strongbox_support: Arc<dyn StrongBoxSupport>,
        key_size_bits: usize,
        create_if_missing: bool,
        authentication: Option<KeyAuthentication>,
    ) -> Result<Arc<Self>, KeychainError> {
        if key_size_bits != 128 && key_size_bits != 256 {
            return Err(KeychainError::key_store(format!(
                "unsupported AES key size: {key_size_bits} bits"
            )));
        }
        if !key_store.is_available() {
            return Err(KeychainError::key_store("platform key store is not available"));
        }
        Ok(Arc::new(Self {
            key_store,
            alias: alias.into(),
            is_primary,
            strongbox_support,
            key_size_bits,
            create_if_missing,
            authentication,
        }))
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    pub fn key_size_bits(&self) -> usize {
        self.key_size_bits
    }

    pub fn strongbox_support(&self) -> &Arc<dyn StrongBoxSupport> {
        &self.strongbox_support
    }

    /// Existing key, if any. Never generates.
    pub fn secret_key(&self) -> Result<Option<SecretKey>, KeychainError> {
        self.key_store
            .get_key(&self.alias)
            .map_err(KeychainError::key_store)
    }

    /// Existence probe without side effects. Key store failures read as absent.
    pub fn contains_secret_key(&self) -> bool {
        match self.key_store.has_key(&self.alias) {
            Ok(found) => found,
            Err(err) => {
                warn!(alias = %self.alias, "key store probe failed: {err}");
                false
            }
        }
    }

    /// Return the existing key or generate a new one.
    ///
    /// When StrongBox generation fails the provider retries with a regular key,
    /// unless `fail_on_hardware_unavailable` is set.
    pub fn get_or_create_secret_key(
        &self,
        fail_on_hardware_unavailable: bool,
    ) -> Result<SecretKey, KeychainError> {
        if let Some(existing) = self.secret_key()? {
            return Ok(existing);
        }
        if !self.create_if_missing {
            return Err(KeychainError::KeyNotFound {
                alias: self.alias.clone(),
            });
        }

        let strongbox = self.is_primary && self.strongbox_support.is_strongbox_enabled();
        let mut request = KeyGenRequest {
            alias: self.alias.clone(),
            size_bits: self.key_size_bits,
            strongbox,
            authentication: self.authentication,
        };
        match self.key_store.generate_key(&request) {
            Ok(key) => {
                debug!(alias = %self.alias, protection = ?key.protection(), "generated secret key");
                Ok(key)
            }
            Err(KeyStoreError::HardwareUnavailable { .. }) if fail_on_hardware_unavailable => {
                Err(KeychainError::HardwareKeyUnavailable {
                    alias: self.alias.clone(),
                })
            }
            Err(KeyStoreError::HardwareUnavailable { .. }) => {
                warn!(alias = %self.alias, "strongbox key generation failed, falling back to regular key");
                request.strongbox = false;
                self.key_store
                    .generate_key(&request)
                    .map_err(KeychainError::key_store)
            }
            Err(err) => Err(KeychainError::key_store(err)),
        }
    }

    /// Remove the key (idempotent).
    pub fn delete_secret_key(&self) -> Result<(), KeychainError> {
        self.key_store
            .delete_key(&self.alias)
            .map_err(KeychainError::key_store)
    }
}

impl fmt::Debug for SymmetricKeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKeyProvider")
            .field("alias", &self.alias)
            .field("is_primary", &self.is_primary)
            .field("key_size_bits", &self.key_size_bits)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        key_store::{InMemoryKeyStore, KeyProtection},
        strongbox::FixedStrongBoxSupport,
    };

    fn provider(
        store: &InMemoryKeyStore,
        alias: &str,
        is_primary: bool,
        support: FixedStrongBoxSupport,
    ) -> Arc<SymmetricKeyProvider> {
        SymmetricKeyProvider::aes_gcm(
            Arc::new(store.clone()),
            alias,
            is_primary,
            Arc::new(support),
            256,
            true,
            None,
        )
        .expect("provider")
    }

    #[test]
    fn primary_requests_strongbox_when_enabled() {
        let store = InMemoryKeyStore::with_protection(KeyProtection::StrongBox);
        let primary = provider(&store, "primary", true, FixedStrongBoxSupport::new(true, true));
        let key = primary.get_or_create_secret_key(true).unwrap();
        assert_eq!(key.protection(), KeyProtection::StrongBox);
        assert_eq!(key.size_bits(), 256);
    }

    #[test]
    fn backup_never_requests_strongbox() {
        let store = InMemoryKeyStore::with_protection(KeyProtection::StrongBox);
        let backup = provider(&store, "backup", false, FixedStrongBoxSupport::new(true, true));
        let key = backup.get_or_create_secret_key(true).unwrap();
        assert_eq!(key.protection(), KeyProtection::Hardware);
    }

    #[test]
    fn existing_key_is_returned_unchanged() {
        let store = InMemoryKeyStore::default();
        let primary = provider(&store, "primary", true, FixedStrongBoxSupport::new(false, false));
        assert!(!primary.contains_secret_key());
        let first = primary.get_or_create_secret_key(false).unwrap();
        assert!(primary.contains_secret_key());
        let second = primary.get_or_create_secret_key(false).unwrap();
        assert_eq!(first.bytes(), second.bytes());
    }

    #[test]
    fn hardware_failure_falls_back_unless_disallowed() {
        let store = InMemoryKeyStore::with_protection(KeyProtection::StrongBox);
        store.set_strongbox_failure(true);
        let primary = provider(&store, "primary", true, FixedStrongBoxSupport::new(true, true));

        let err = primary
            .get_or_create_secret_key(true)
            .expect_err("hardware must be required");
        assert!(matches!(err, KeychainError::HardwareKeyUnavailable { .. }));
        assert!(!primary.contains_secret_key());

        let key = primary.get_or_create_secret_key(false).unwrap();
        assert_eq!(key.protection(), KeyProtection::Hardware);
    }

    #[test]
    fn missing_key_without_create_policy_is_reported() {
        let store = InMemoryKeyStore::default();
        let provider = SymmetricKeyProvider::aes_gcm(
            Arc::new(store),
            "absent",
            true,
            Arc::new(FixedStrongBoxSupport::new(false, false)),
            128,
            false,
            None,
        )
        .unwrap();
        let err = provider.get_or_create_secret_key(false).unwrap_err();
        assert_eq!(
            err,
            KeychainError::KeyNotFound {
                alias: "absent".into()
            }
        );
    }

    #[test]
    fn delete_is_idempotent() {
        let store = InMemoryKeyStore::default();
        let primary = provider(&store, "primary", true, FixedStrongBoxSupport::new(false, false));
        primary.delete_secret_key().unwrap();
        primary.get_or_create_secret_key(false).unwrap();
        primary.delete_secret_key().unwrap();
        primary.delete_secret_key().unwrap();
        assert!(!primary.contains_secret_key());
    }

    #[test]
    fn authentication_requirement_reaches_key_store() {
        let store = InMemoryKeyStore::default();
        let auth = KeyAuthentication {
            user_authentication_required: true,
            validity_seconds: Some(30),
        };
        let provider = SymmetricKeyProvider::aes_gcm(
            Arc::new(store),
            "auth",
            true,
            Arc::new(FixedStrongBoxSupport::new(false, false)),
            256,
            true,
            Some(auth),
        )
        .unwrap();
        let key = provider.get_or_create_secret_key(false).unwrap();
        assert_eq!(key.authentication(), Some(auth));
    }

    #[test]
    fn rejects_unavailable_store_and_bad_key_size() {
        let support: Arc<dyn StrongBoxSupport> = Arc::new(FixedStrongBoxSupport::new(false, false));
        let unavailable = SymmetricKeyProvider::aes_gcm(
            Arc::new(InMemoryKeyStore::unavailable()),
            "k",
            true,
            support.clone(),
            256,
            true,
            None,
        );
        assert!(matches!(unavailable, Err(KeychainError::KeyStore { .. })));

        let bad_size = SymmetricKeyProvider::aes_gcm(
            Arc::new(InMemoryKeyStore::default()),
            "k",
            true,
            support,
            192,
            true,
            None,
        );
        assert!(matches!(bad_size, Err(KeychainError::KeyStore { .. })));
    }
}
