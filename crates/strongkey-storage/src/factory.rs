use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use strongkey_core::{Keychain, KeychainError, KeychainProtection, KeyValueStoreProvider};
use tracing::{debug, info, instrument};

use crate::{
    config::FactoryConfig,
    encrypted_keychain::EncryptedKeychain,
    key_provider::SymmetricKeyProvider,
    key_store::{KeyProtection, KeyStore},
    legacy_keychain::LegacyKeychain,
    strongbox::{DefaultStrongBoxSupport, StrongBoxSupport},
};

#[derive(Default)]
struct FactoryState {
    keychains: HashMap<String, Arc<dyn Keychain>>,
    strongbox_support: Option<Arc<dyn StrongBoxSupport>>,
    /// Closed by `set_strongbox_enabled` or by constructing the first keychain.
    configured: bool,
    providers: Option<Providers>,
    protection: Option<KeychainProtection>,
}

impl FactoryState {
    fn invalidate(&mut self) {
        self.keychains.clear();
        self.providers = None;
        self.protection = None;
    }
}

#[derive(Clone)]
struct Providers {
    primary: Arc<SymmetricKeyProvider>,
    backup: Option<Arc<SymmetricKeyProvider>>,
}

/// Hands out cached keychains and owns the StrongBox configuration.
///
/// The StrongBox setting can be applied once, before any keychain exists.
/// Replacing the support oracle clears every cached keychain because their
/// effective key providers may have changed.
pub struct KeychainFactory {
    key_store: Arc<dyn KeyStore>,
    stores: Arc<dyn KeyValueStoreProvider>,
    config: FactoryConfig,
    state: Mutex<FactoryState>,
}

impl KeychainFactory {
    pub fn new(
        key_store: Arc<dyn KeyStore>,
        stores: Arc<dyn KeyValueStoreProvider>,
        config: FactoryConfig,
    ) -> Self {
        Self {
            key_store,
            stores,
            config,
            state: Mutex::new(FactoryState::default()),
        }
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    /// Return the cached keychain for `identifier`, creating it on first use.
    #[instrument(skip(self))]
    pub fn get_keychain(
        &self,
        identifier: &str,
        minimum_protection: KeychainProtection,
    ) -> Result<Arc<dyn Keychain>, KeychainError> {
        let mut state = self.lock()?;
        let support = self.current_support(&state);
        state.strongbox_support = Some(support.clone());
        state.configured = true;

        let available = self.protection_locked(&mut state, &support)?;
        if available < minimum_protection {
            return Err(KeychainError::ProtectionLevelUnavailable {
                requested: minimum_protection,
                available,
            });
        }

        if let Some(existing) = state.keychains.get(identifier) {
            debug!("returning cached keychain");
            return Ok(existing.clone());
        }

        let store = self.stores.open(identifier)?;
        let keychain: Arc<dyn Keychain> = if available == KeychainProtection::None {
            Arc::new(LegacyKeychain::new(identifier, store))
        } else {
            let providers = match state.providers.clone() {
                Some(providers) => providers,
                None => {
                    let providers = self.build_providers(&support)?;
                    state.providers = Some(providers.clone());
                    providers
                }
            };
            Arc::new(EncryptedKeychain::new(
                identifier,
                store,
                Some(providers.primary),
                providers.backup,
            ))
        };
        debug!(?available, "created keychain");
        state
            .keychains
            .insert(identifier.to_string(), keychain.clone());
        Ok(keychain)
    }

    /// Opt in or out of StrongBox. Allowed once per configuration, and only
    /// before the first keychain was created; repeating the same value fails too.
    pub fn set_strongbox_enabled(&self, enabled: bool) -> Result<(), KeychainError> {
        let mut state = self.lock()?;
        if state.configured {
            return Err(KeychainError::ConfigurationAlreadySet);
        }
        state.strongbox_support = Some(self.default_support(enabled));
        state.configured = true;
        state.invalidate();
        info!(enabled, "strongbox configuration applied");
        Ok(())
    }

    /// Whether StrongBox is supported and enabled. Does not close the
    /// configuration gate.
    pub fn is_strongbox_enabled(&self) -> Result<bool, KeychainError> {
        let state = self.lock()?;
        Ok(self.current_support(&state).is_strongbox_enabled())
    }

    /// Install a support oracle (`None` restores device probing with StrongBox
    /// disabled). Clears every cached keychain and reopens the configuration gate.
    pub fn set_strongbox_support(
        &self,
        support: Option<Arc<dyn StrongBoxSupport>>,
    ) -> Result<(), KeychainError> {
        let mut state = self.lock()?;
        state.strongbox_support = support;
        state.configured = false;
        state.invalidate();
        debug!("strongbox support replaced, keychain cache cleared");
        Ok(())
    }

    /// Strongest protection keychain data gets on this device with the
    /// current configuration.
    pub fn keychain_protection_supported_on_device(
        &self,
    ) -> Result<KeychainProtection, KeychainError> {
        let mut state = self.lock()?;
        let support = self.current_support(&state);
        self.protection_locked(&mut state, &support)
    }

    fn protection_locked(
        &self,
        state: &mut FactoryState,
        support: &Arc<dyn StrongBoxSupport>,
    ) -> Result<KeychainProtection, KeychainError> {
        if let Some(protection) = state.protection {
            return Ok(protection);
        }
        let protection = if self.key_store.is_available() {
            let providers = self.build_providers(support)?;
            let effective = EncryptedKeychain::determine_effective_symmetric_key_provider(
                Some(&providers.primary),
                providers.backup.as_ref(),
            )
            .ok_or_else(|| KeychainError::key_store("no symmetric key provider available"))?;
            match effective.get_or_create_secret_key(false)?.protection() {
                KeyProtection::StrongBox => KeychainProtection::StrongBox,
                KeyProtection::Hardware => KeychainProtection::Hardware,
                KeyProtection::Software => KeychainProtection::Software,
            }
        } else {
            KeychainProtection::None
        };
        state.protection = Some(protection);
        Ok(protection)
    }

    fn build_providers(
        &self,
        support: &Arc<dyn StrongBoxSupport>,
    ) -> Result<Providers, KeychainError> {
        let primary = SymmetricKeyProvider::aes_gcm(
            self.key_store.clone(),
            self.config.primary_key_alias.as_str(),
            true,
            support.clone(),
            self.config.key_size_bits,
            true,
            None,
        )?;
        let backup = if support.is_strongbox_supported() {
            Some(SymmetricKeyProvider::aes_gcm(
                self.key_store.clone(),
                self.config.backup_key_alias.as_str(),
                false,
                support.clone(),
                self.config.key_size_bits,
                true,
                None,
            )?)
        } else {
            None
        };
        Ok(Providers { primary, backup })
    }

    fn current_support(&self, state: &FactoryState) -> Arc<dyn StrongBoxSupport> {
        state
            .strongbox_support
            .clone()
            .unwrap_or_else(|| self.default_support(false))
    }

    fn default_support(&self, enabled: bool) -> Arc<dyn StrongBoxSupport> {
        Arc::new(DefaultStrongBoxSupport::new(self.key_store.clone(), enabled))
    }

    fn lock(&self) -> Result<MutexGuard<'_, FactoryState>, KeychainError> {
        self.state
            .lock()
            .map_err(|err| KeychainError::storage(format!("lock poisoned: {err}")))
    }
}
