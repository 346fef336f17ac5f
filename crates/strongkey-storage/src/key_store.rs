use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

/// Where a secret key physically lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyProtection {
    Software,
    Hardware,
    StrongBox,
}

/// User authentication the platform must enforce before releasing a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyAuthentication {
    /// Key is usable only after the user authenticated.
    pub user_authentication_required: bool,
    /// How long an authentication stays valid; `None` requires it for every use.
    pub validity_seconds: Option<u32>,
}

/// Symmetric key material resolved from a [`KeyStore`].
#[derive(Clone)]
pub struct SecretKey {
    alias: String,
    bytes: Zeroizing<Vec<u8>>,
    protection: KeyProtection,
    authentication: Option<KeyAuthentication>,
}

impl SecretKey {
    pub fn new(alias: impl Into<String>, bytes: Vec<u8>, protection: KeyProtection) -> Self {
        Self {
            alias: alias.into(),
            bytes: Zeroizing::new(bytes),
            protection,
            authentication: None,
        }
    }

    pub fn with_authentication(mut self, authentication: Option<KeyAuthentication>) -> Self {
        self.authentication = authentication;
        self
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn size_bits(&self) -> usize {
        self.bytes.len() * 8
    }

    pub fn protection(&self) -> KeyProtection {
        self.protection
    }

    pub fn authentication(&self) -> Option<KeyAuthentication> {
        self.authentication
    }
}

// Never print key bytes.
impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey")
            .field("alias", &self.alias)
            .field("size_bits", &self.size_bits())
            .field("protection", &self.protection)
            .finish()
    }
}

/// Parameters for generating a new key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGenRequest {
    pub alias: String,
    pub size_bits: usize,
    /// Ask for StrongBox isolation; fails with `HardwareUnavailable` when it cannot be honored.
    pub strongbox: bool,
    pub authentication: Option<KeyAuthentication>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyStoreError {
    #[error("hardware isolation unavailable for alias: {alias}")]
    HardwareUnavailable { alias: String },
    #[error("key store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("key store backend error: {0}")]
    Backend(String),
}

/// Platform secure key store (Android Keystore, OS keychain, or a test double).
pub trait KeyStore: Send + Sync {
    /// Whether keys can be stored at all.
    fn is_available(&self) -> bool;

    /// Device capability probe for StrongBox-style hardware isolation.
    fn supports_strongbox(&self) -> bool;

    fn get_key(&self, alias: &str) -> Result<Option<SecretKey>, KeyStoreError>;

    /// Generate a fresh key, replacing any key under the same alias.
    fn generate_key(&self, request: &KeyGenRequest) -> Result<SecretKey, KeyStoreError>;

    fn has_key(&self, alias: &str) -> Result<bool, KeyStoreError> {
        Ok(self.get_key(alias)?.is_some())
    }

    /// Remove a key (idempotent).
    fn delete_key(&self, alias: &str) -> Result<(), KeyStoreError>;
}

/// OS keyring-backed key store. Uses the `keyring` crate to store software keys.
pub struct KeyringKeyStore {
    service: String,
}

impl KeyringKeyStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, alias: &str) -> Result<keyring::Entry, KeyStoreError> {
        keyring::Entry::new(&self.service, alias)
            .map_err(|e| KeyStoreError::Unavailable(e.to_string()))
    }
}

impl KeyStore for KeyringKeyStore {
    fn is_available(&self) -> bool {
        keyring::Entry::new(&self.service, "availability-probe").is_ok()
    }

    fn supports_strongbox(&self) -> bool {
        false
    }

    fn get_key(&self, alias: &str) -> Result<Option<SecretKey>, KeyStoreError> {
        match self.entry(alias)?.get_password() {
            Ok(secret) => decode_key(alias, &secret).map(Some),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(KeyStoreError::Backend(err.to_string())),
        }
    }

    fn generate_key(&self, request: &KeyGenRequest) -> Result<SecretKey, KeyStoreError> {
        if request.strongbox {
            return Err(KeyStoreError::HardwareUnavailable {
                alias: request.alias.clone(),
            });
        }
        if request.authentication.is_some() {
            debug!(alias = %request.alias, "keyring backend ignores authentication requirement");
        }
        let key = generate_key(&request.alias, request.size_bits, KeyProtection::Software)?;
        self.entry(&request.alias)?
            .set_password(&encode_key(&key))
            .map_err(|e| KeyStoreError::Backend(e.to_string()))?;
        Ok(key)
    }

    fn delete_key(&self, alias: &str) -> Result<(), KeyStoreError> {
        match self.entry(alias)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(KeyStoreError::Backend(err.to_string())),
        }
    }
}

/// In-memory key store for tests and ephemeral sessions.
///
/// `device_protection` is the best protection the simulated device offers;
/// StrongBox generation can be made to fail to exercise software fallback.
#[derive(Debug, Clone)]
pub struct InMemoryKeyStore {
    inner: Arc<Mutex<HashMap<String, SecretKey>>>,
    device_protection: KeyProtection,
    available: bool,
    fail_strongbox: Arc<AtomicBool>,
}

impl Default for InMemoryKeyStore {
    fn default() -> Self {
        Self::with_protection(KeyProtection::Hardware)
    }
}

impl InMemoryKeyStore {
    pub fn with_protection(device_protection: KeyProtection) -> Self {
        Self {
            inner: Arc::default(),
            device_protection,
            available: true,
            fail_strongbox: Arc::default(),
        }
    }

    /// Simulates a device without any usable key store.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::with_protection(KeyProtection::Software)
        }
    }

    /// Make StrongBox key generation fail even on a StrongBox device.
    pub fn set_strongbox_failure(&self, fail: bool) {
        self.fail_strongbox.store(fail, Ordering::SeqCst);
    }
}

impl KeyStore for InMemoryKeyStore {
    fn is_available(&self) -> bool {
        self.available
    }

    fn supports_strongbox(&self) -> bool {
        self.device_protection == KeyProtection::StrongBox
    }

    fn get_key(&self, alias: &str) -> Result<Option<SecretKey>, KeyStoreError> {
        let keys = self.inner.lock().map_err(lock_err)?;
        Ok(keys.get(alias).cloned())
    }

    fn generate_key(&self, request: &KeyGenRequest) -> Result<SecretKey, KeyStoreError> {
        if !self.available {
            return Err(KeyStoreError::Unavailable("in-memory key store disabled".into()));
        }
        let protection = if request.strongbox {
            if !self.supports_strongbox() || self.fail_strongbox.load(Ordering::SeqCst) {
                return Err(KeyStoreError::HardwareUnavailable {
                    alias: request.alias.clone(),
                });
            }
            KeyProtection::StrongBox
        } else {
            self.device_protection.min(KeyProtection::Hardware)
        };

        let key = generate_key(&request.alias, request.size_bits, protection)?
            .with_authentication(request.authentication);
        let mut keys = self.inner.lock().map_err(lock_err)?;
        keys.insert(request.alias.clone(), key.clone());
        Ok(key)
    }

    fn delete_key(&self, alias: &str) -> Result<(), KeyStoreError> {
        let mut keys = self.inner.lock().map_err(lock_err)?;
        keys.remove(alias);
        Ok(())
    }
}

fn generate_key(
    alias: &str,
    size_bits: usize,
    protection: KeyProtection,
) -> Result<SecretKey, KeyStoreError> {
    if size_bits != 128 && size_bits != 256 {
        return Err(KeyStoreError::InvalidKey(format!(
            "unsupported key size: {size_bits} bits"
        )));
    }
    let mut bytes = vec![0u8; size_bits / 8];
    OsRng.fill_bytes(&mut bytes);
    Ok(SecretKey::new(alias, bytes, protection))
}

fn encode_key(key: &SecretKey) -> Zeroizing<String> {
    Zeroizing::new(general_purpose::STANDARD.encode(key.bytes()))
}

fn decode_key(alias: &str, secret: &str) -> Result<SecretKey, KeyStoreError> {
    let bytes = general_purpose::STANDARD
        .decode(secret)
        .map_err(|e| KeyStoreError::InvalidKey(e.to_string()))?;

    if bytes.len() != 16 && bytes.len() != 32 {
        return Err(KeyStoreError::InvalidKey(format!(
            "expected 16 or 32 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(SecretKey::new(alias, bytes, KeyProtection::Software))
}

fn lock_err<E: fmt::Display>(err: E) -> KeyStoreError {
    KeyStoreError::Backend(format!("lock poisoned: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(alias: &str, strongbox: bool) -> KeyGenRequest {
        KeyGenRequest {
            alias: alias.to_string(),
            size_bits: 256,
            strongbox,
            authentication: None,
        }
    }

    #[test]
    fn memory_store_returns_generated_key() {
        let store = InMemoryKeyStore::default();
        let generated = store.generate_key(&request("k", false)).unwrap();
        let fetched = store.get_key("k").unwrap().expect("key exists");

        assert_eq!(generated.bytes(), fetched.bytes());
        assert_eq!(fetched.protection(), KeyProtection::Hardware);
        assert!(store.has_key("k").unwrap());
    }

    #[test]
    fn strongbox_request_fails_without_strongbox() {
        let store = InMemoryKeyStore::default();
        let err = store
            .generate_key(&request("k", true))
            .expect_err("no strongbox on device");
        assert!(matches!(err, KeyStoreError::HardwareUnavailable { .. }));
        assert!(!store.has_key("k").unwrap());
    }

    #[test]
    fn strongbox_device_honors_request_unless_failure_injected() {
        let store = InMemoryKeyStore::with_protection(KeyProtection::StrongBox);
        let key = store.generate_key(&request("sb", true)).unwrap();
        assert_eq!(key.protection(), KeyProtection::StrongBox);

        let regular = store.generate_key(&request("hw", false)).unwrap();
        assert_eq!(regular.protection(), KeyProtection::Hardware);

        store.set_strongbox_failure(true);
        assert!(store.generate_key(&request("sb2", true)).is_err());
    }

    #[test]
    fn delete_is_idempotent() {
        let store = InMemoryKeyStore::default();
        store.generate_key(&request("k", false)).unwrap();
        store.delete_key("k").unwrap();
        store.delete_key("k").unwrap();
        assert!(store.get_key("k").unwrap().is_none());
    }

    #[test]
    fn rejects_unsupported_key_size() {
        let store = InMemoryKeyStore::default();
        let mut req = request("k", false);
        req.size_bits = 192;
        assert!(matches!(
            store.generate_key(&req),
            Err(KeyStoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let err = decode_key("k", "abcd").expect_err("should reject wrong length");
        assert!(matches!(err, KeyStoreError::InvalidKey(_)));
    }

    #[test]
    fn debug_output_hides_key_bytes() {
        let key = SecretKey::new("alias", vec![0xAB; 32], KeyProtection::Software);
        let printed = format!("{key:?}");
        assert!(printed.contains("alias"));
        assert!(!printed.contains("171"));
    }
}
