use std::sync::Arc;

use strongkey_core::{Keychain, KeychainError, KeychainValue, KeyValueStore};

/// Unencrypted keychain format. Values are kept verbatim, including empty
/// strings, until an [`EncryptedKeychain`](crate::EncryptedKeychain) adopts
/// the same store. Used directly only on devices without a usable key store.
pub struct LegacyKeychain {
    identifier: String,
    store: Arc<dyn KeyValueStore>,
}

impl LegacyKeychain {
    pub fn new(identifier: impl Into<String>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            identifier: identifier.into(),
            store,
        }
    }
}

impl Keychain for LegacyKeychain {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn is_encrypted(&self) -> bool {
        false
    }

    fn is_strongbox_backed(&self) -> bool {
        false
    }

    fn get(&self, key: &str) -> Result<Option<KeychainValue>, KeychainError> {
        self.store.get(key)
    }

    fn set(&self, key: &str, value: Option<KeychainValue>) -> Result<(), KeychainError> {
        match value {
            Some(value) => self.store.put(key, value),
            None => self.store.remove(key),
        }
    }

    fn contains(&self, key: &str) -> Result<bool, KeychainError> {
        Ok(self.store.get(key)?.is_some())
    }

    fn remove_all(&self) -> Result<(), KeychainError> {
        self.store.clear()
    }

    fn keys(&self) -> Result<Vec<String>, KeychainError> {
        Ok(self.store.snapshot()?.into_keys().collect())
    }
}

#[cfg(test)]
mod tests {
    use strongkey_core::InMemoryKeyValueStore;

    use super::*;

    #[test]
    fn keeps_empty_strings_verbatim() {
        let keychain = LegacyKeychain::new("legacy", Arc::new(InMemoryKeyValueStore::new()));
        keychain.set_string("empty", Some("")).unwrap();
        keychain.set_string("full", Some("v")).unwrap();

        assert_eq!(keychain.string("empty").unwrap().as_deref(), Some(""));
        assert_eq!(keychain.string("full").unwrap().as_deref(), Some("v"));
        assert!(!keychain.is_encrypted());
        assert!(!keychain.is_strongbox_backed());
    }

    #[test]
    fn remove_and_remove_all() {
        let keychain = LegacyKeychain::new("legacy", Arc::new(InMemoryKeyValueStore::new()));
        keychain.set_long("a", 1).unwrap();
        keychain.set_bool("b", true).unwrap();
        keychain.remove("a").unwrap();
        assert_eq!(keychain.keys().unwrap(), vec!["b".to_string()]);

        keychain.remove_all().unwrap();
        assert!(keychain.keys().unwrap().is_empty());
        assert!(!keychain.bool_or("b", false).unwrap());
    }
}
