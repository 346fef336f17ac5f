use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use strongkey_core::{Keychain, KeychainError, KeychainValue, KeyValueStore, StoreBatch};
use tracing::{debug, info, instrument, warn};

use crate::{
    cipher,
    key_provider::SymmetricKeyProvider,
    key_store::SecretKey,
    migration::{
        is_metadata_key, plan_migration, FormatState, Migration, KEYCHAIN_V2,
        STRONGBOX_MARKER_KEY, VERSION_KEY,
    },
};

/// Key in use for the lifetime of an opened keychain.
struct Session {
    key: SecretKey,
    marker: bool,
}

/// Versioned keychain whose entries are AES-GCM encrypted with a key chosen
/// between a StrongBox-capable primary provider and a regular backup provider.
///
/// The first operation on an instance migrates the backing store to the V2
/// format under the currently effective provider. Every entry is always
/// encrypted under the single provider recorded by the stored marker.
pub struct EncryptedKeychain {
    identifier: String,
    store: Arc<dyn KeyValueStore>,
    primary: Option<Arc<SymmetricKeyProvider>>,
    backup: Option<Arc<SymmetricKeyProvider>>,
    session: Mutex<Option<Session>>,
}

impl EncryptedKeychain {
    pub fn new(
        identifier: impl Into<String>,
        store: Arc<dyn KeyValueStore>,
        primary: Option<Arc<SymmetricKeyProvider>>,
        backup: Option<Arc<SymmetricKeyProvider>>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            store,
            primary,
            backup,
            session: Mutex::new(None),
        }
    }

    /// Pick the provider that should protect keychain data right now.
    ///
    /// Without a backup the device has no StrongBox and the primary provider is
    /// the only choice. Otherwise the primary wins only while StrongBox is enabled.
    pub fn determine_effective_symmetric_key_provider(
        primary: Option<&Arc<SymmetricKeyProvider>>,
        backup: Option<&Arc<SymmetricKeyProvider>>,
    ) -> Option<Arc<SymmetricKeyProvider>> {
        match (primary, backup) {
            (None, None) => None,
            (primary, None) => primary.cloned(),
            (primary, Some(backup)) => {
                if backup.strongbox_support().is_strongbox_enabled() {
                    primary.or(Some(backup)).cloned()
                } else {
                    Some(backup.clone())
                }
            }
        }
    }

    /// Bring the backing store to the current format and key, surfacing
    /// `MigrationAborted` when re-encryption fails. Stored data is untouched
    /// on failure and the call may be retried.
    pub fn migrate(&self) -> Result<(), KeychainError> {
        let mut guard = self.session.lock().map_err(lock_err)?;
        let session = self.migrate_store()?;
        *guard = Some(session);
        Ok(())
    }

    fn effective_provider(&self) -> Result<(Arc<SymmetricKeyProvider>, bool), KeychainError> {
        let effective = Self::determine_effective_symmetric_key_provider(
            self.primary.as_ref(),
            self.backup.as_ref(),
        )
        .ok_or_else(|| KeychainError::key_store("no symmetric key provider available"))?;
        let marker = self.backup.is_some()
            && self
                .primary
                .as_ref()
                .is_some_and(|primary| Arc::ptr_eq(primary, &effective));
        Ok((effective, marker))
    }

    /// Whether a backup key exists, which makes the primary key StrongBox backed.
    fn strongbox_supported(&self) -> bool {
        self.backup.is_some()
    }

    /// Provider that wrote entries carrying `marker`.
    fn provider_for_marker(&self, marker: bool) -> Option<&Arc<SymmetricKeyProvider>> {
        if marker {
            self.primary.as_ref()
        } else {
            self.backup.as_ref().or(self.primary.as_ref())
        }
    }

    fn with_session<T>(
        &self,
        op: impl FnOnce(&Session) -> Result<T, KeychainError>,
    ) -> Result<T, KeychainError> {
        let mut guard = self.session.lock().map_err(lock_err)?;
        let session = match guard.take() {
            Some(session) => self.refresh_session(session)?,
            None => self.open_session()?,
        };
        op(guard.insert(session))
    }

    /// Follow the store when another instance re-encrypted it since this
    /// session was opened, so entries never end up under two keys.
    fn refresh_session(&self, session: Session) -> Result<Session, KeychainError> {
        match self.stored_format()? {
            FormatState::V2 { marker } if marker == session.marker => Ok(session),
            FormatState::V2 { marker } => {
                debug!(identifier = %self.identifier, marker, "store key changed, switching session");
                self.session_for_marker(marker)
            }
            _ => self.open_session(),
        }
    }

    /// Lazy open. An aborted re-encryption keeps serving data under the key
    /// recorded in the store so callers observe the pre-migration state.
    fn open_session(&self) -> Result<Session, KeychainError> {
        match self.migrate_store() {
            Err(err @ KeychainError::MigrationAborted { .. }) => {
                warn!(identifier = %self.identifier, "{err}; keeping previous encryption key");
                self.stored_session().map_err(|cause| {
                    warn!(identifier = %self.identifier, "stored encryption key unusable: {cause}");
                    err
                })
            }
            other => other,
        }
    }

    fn stored_session(&self) -> Result<Session, KeychainError> {
        let marker = self
            .stored_format()?
            .stored_marker(self.strongbox_supported())
            .ok_or_else(|| KeychainError::storage("keychain has no stored format"))?;
        self.session_for_marker(marker)
    }

    fn session_for_marker(&self, marker: bool) -> Result<Session, KeychainError> {
        let provider = self
            .provider_for_marker(marker)
            .ok_or_else(|| KeychainError::key_store("no key provider for stored marker"))?;
        let key = provider
            .secret_key()?
            .ok_or_else(|| KeychainError::KeyNotFound {
                alias: provider.alias().to_string(),
            })?;
        Ok(Session { key, marker })
    }

    /// Format read from the metadata entries alone.
    fn stored_format(&self) -> Result<FormatState, KeychainError> {
        let mut metadata = BTreeMap::new();
        for key in [VERSION_KEY, STRONGBOX_MARKER_KEY] {
            if let Some(value) = self.store.get(key)? {
                metadata.insert(key.to_string(), value);
            }
        }
        FormatState::read(&metadata)
    }

    #[instrument(skip_all, fields(identifier = %self.identifier))]
    fn migrate_store(&self) -> Result<Session, KeychainError> {
        let entries = self.store.snapshot()?;
        let state = FormatState::read(&entries)?;
        let (provider, marker) = self.effective_provider()?;

        match plan_migration(state, marker, self.strongbox_supported()) {
            Migration::None => {
                let key = provider.get_or_create_secret_key(false)?;
                debug!(marker, "keychain is up to date");
                Ok(Session { key, marker })
            }
            Migration::Initialize { marker } => {
                let key = provider.get_or_create_secret_key(false)?;
                self.store.commit(metadata_batch(StoreBatch::new(), marker))?;
                debug!(marker, "initialized empty keychain");
                Ok(Session { key, marker })
            }
            Migration::UpgradeMetadata { marker } => {
                let key = provider.get_or_create_secret_key(false)?;
                self.store.commit(metadata_batch(StoreBatch::new(), marker))?;
                info!(marker, "upgraded keychain format from V1");
                Ok(Session { key, marker })
            }
            Migration::AdoptLegacy { marker } => {
                let key = provider.get_or_create_secret_key(false)?;
                self.adopt_legacy(&entries, &key, marker)?;
                Ok(Session { key, marker })
            }
            Migration::Reencrypt { from, to } => {
                let key = provider
                    .get_or_create_secret_key(false)
                    .map_err(|e| self.aborted(e))?;
                self.reencrypt(&entries, from, &key, to)?;
                Ok(Session { key, marker: to })
            }
        }
    }

    /// Encrypt plaintext entries and replace the legacy content in one commit.
    /// Empty strings and byte arrays are dropped.
    fn adopt_legacy(
        &self,
        entries: &BTreeMap<String, KeychainValue>,
        key: &SecretKey,
        marker: bool,
    ) -> Result<(), KeychainError> {
        let mut batch = StoreBatch::new().clear();
        let mut adopted = 0usize;
        for (name, value) in entries.iter().filter(|(name, _)| !is_metadata_key(name)) {
            if value.is_empty() {
                continue;
            }
            let sealed = self.seal_entry(key, value).map_err(|e| self.aborted(e))?;
            batch = batch.put(name.as_str(), sealed);
            adopted += 1;
        }
        self.store
            .commit(metadata_batch(batch, marker))
            .map_err(|e| self.aborted(e))?;
        info!(entries = adopted, marker, "migrated legacy keychain");
        Ok(())
    }

    /// Decrypt every entry under the `from` provider and re-encrypt under
    /// `to_key`, staging everything before a single commit.
    fn reencrypt(
        &self,
        entries: &BTreeMap<String, KeychainValue>,
        from: bool,
        to_key: &SecretKey,
        to: bool,
    ) -> Result<(), KeychainError> {
        if !entries.keys().any(|name| !is_metadata_key(name)) {
            self.store
                .commit(metadata_batch(StoreBatch::new(), to))
                .map_err(|e| self.aborted(e))?;
            debug!(from, to, "switched empty keychain to new key");
            return Ok(());
        }
        let source = self
            .provider_for_marker(from)
            .ok_or_else(|| self.aborted("no key provider for stored marker"))?;
        let from_key = source
            .secret_key()
            .map_err(|e| self.aborted(e))?
            .ok_or_else(|| self.aborted(format!("secret key {} is missing", source.alias())))?;

        let mut batch = StoreBatch::new();
        let mut staged = 0usize;
        for (name, stored) in entries.iter().filter(|(name, _)| !is_metadata_key(name)) {
            let value = self
                .open_entry(&from_key, name, stored)
                .map_err(|e| self.aborted(e))?;
            let sealed = self.seal_entry(to_key, &value).map_err(|e| self.aborted(e))?;
            batch = batch.put(name.as_str(), sealed);
            staged += 1;
        }
        self.store
            .commit(metadata_batch(batch, to))
            .map_err(|e| self.aborted(e))?;
        info!(entries = staged, from, to, "re-encrypted keychain");
        Ok(())
    }

    fn aborted(&self, reason: impl ToString) -> KeychainError {
        KeychainError::MigrationAborted {
            identifier: self.identifier.clone(),
            reason: reason.to_string(),
        }
    }

    fn seal_entry(&self, key: &SecretKey, value: &KeychainValue) -> Result<KeychainValue, KeychainError> {
        let plaintext = serde_json::to_vec(value).map_err(|e| KeychainError::Crypto {
            reason: format!("encode failed: {e}"),
        })?;
        let sealed = cipher::encrypt(&plaintext, key.bytes(), self.identifier.as_bytes())
            .map_err(|e| KeychainError::Crypto {
                reason: e.to_string(),
            })?;
        Ok(KeychainValue::Text(STANDARD.encode(sealed)))
    }

    fn open_entry(
        &self,
        key: &SecretKey,
        name: &str,
        stored: &KeychainValue,
    ) -> Result<KeychainValue, KeychainError> {
        let decryption = || KeychainError::Decryption {
            key: name.to_string(),
        };
        let encoded = stored.as_text().ok_or_else(decryption)?;
        let sealed = STANDARD.decode(encoded).map_err(|_| decryption())?;
        let plaintext = cipher::decrypt(&sealed, key.bytes(), self.identifier.as_bytes())
            .map_err(|_| decryption())?;
        serde_json::from_slice(&plaintext).map_err(|_| decryption())
    }

    fn check_key(key: &str) -> Result<(), KeychainError> {
        if is_metadata_key(key) {
            return Err(KeychainError::ReservedKey {
                key: key.to_string(),
            });
        }
        Ok(())
    }
}

impl Keychain for EncryptedKeychain {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn is_encrypted(&self) -> bool {
        if let Err(err) = self.with_session(|_| Ok(())) {
            warn!(identifier = %self.identifier, "failed to open keychain: {err}");
        }
        true
    }

    fn is_strongbox_backed(&self) -> bool {
        match self.with_session(|session| Ok(session.marker)) {
            Ok(marker) => marker,
            Err(err) => {
                warn!(identifier = %self.identifier, "failed to open keychain: {err}");
                false
            }
        }
    }

    fn get(&self, key: &str) -> Result<Option<KeychainValue>, KeychainError> {
        Self::check_key(key)?;
        self.with_session(|session| match self.store.get(key)? {
            Some(stored) => self.open_entry(&session.key, key, &stored).map(Some),
            None => Ok(None),
        })
    }

    fn set(&self, key: &str, value: Option<KeychainValue>) -> Result<(), KeychainError> {
        Self::check_key(key)?;
        self.with_session(|session| match value.filter(|v| !v.is_empty()) {
            Some(value) => {
                let sealed = self.seal_entry(&session.key, &value)?;
                self.store.put(key, sealed)
            }
            None => self.store.remove(key),
        })
    }

    fn contains(&self, key: &str) -> Result<bool, KeychainError> {
        Self::check_key(key)?;
        self.with_session(|_| Ok(self.store.get(key)?.is_some()))
    }

    /// Resets the keychain under the current key. Works even when the key of
    /// the stored entries is gone, since nothing needs to be decrypted.
    fn remove_all(&self) -> Result<(), KeychainError> {
        let mut guard = self.session.lock().map_err(lock_err)?;
        if let Err(err @ KeychainError::UnsupportedVersion { .. }) = self.stored_format() {
            return Err(err);
        }
        let (provider, marker) = self.effective_provider()?;
        let key = provider.get_or_create_secret_key(false)?;
        self.store
            .commit(metadata_batch(StoreBatch::new().clear(), marker))?;
        *guard = Some(Session { key, marker });
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, KeychainError> {
        self.with_session(|_| {
            Ok(self
                .store
                .snapshot()?
                .into_keys()
                .filter(|key| !is_metadata_key(key))
                .collect())
        })
    }
}

fn metadata_batch(batch: StoreBatch, marker: bool) -> StoreBatch {
    batch
        .put(VERSION_KEY, KeychainValue::Long(KEYCHAIN_V2))
        .put(STRONGBOX_MARKER_KEY, KeychainValue::Bool(marker))
}

fn lock_err<E: std::fmt::Display>(err: E) -> KeychainError {
    KeychainError::storage(format!("lock poisoned: {err}"))
}
