use std::{path::PathBuf, sync::Arc};

use crate::config::Config;
use color_eyre::Result;
use dirs::data_dir;
use strongkey_storage::{JsonFileStoreProvider, KeychainFactory, KeyringKeyStore};
use tracing::debug;

/// Keyring service under which keychain keys are stored.
const KEYRING_SERVICE: &str = "strongkey";

/// Resolve the default data directory for Strongkey.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("strongkey"))
}

/// Build a keychain factory using the OS keychain for keys and config overrides
/// for the data directory. `strongbox` forces StrongBox on for this run.
pub fn factory_from_config(config: &Config, strongbox: bool) -> Result<KeychainFactory> {
    let root = match &config.data_dir {
        Some(root) => root.clone(),
        None => default_data_dir()?,
    };
    debug!(?root, "initializing keychain factory");
    let factory = KeychainFactory::new(
        Arc::new(KeyringKeyStore::new(KEYRING_SERVICE)),
        Arc::new(JsonFileStoreProvider::new(root)),
        config.keychain.clone(),
    );
    apply_strongbox(&factory, config, strongbox)?;
    Ok(factory)
}

fn apply_strongbox(factory: &KeychainFactory, config: &Config, strongbox: bool) -> Result<()> {
    let enabled = if strongbox {
        Some(true)
    } else {
        config.strongbox_enabled
    };
    if let Some(enabled) = enabled {
        factory.set_strongbox_enabled(enabled)?;
    }
    Ok(())
}

/// Helper for tests to construct a factory rooted at a temp dir with in-memory keys.
#[cfg(test)]
pub fn test_factory(root: impl Into<PathBuf>, config: &Config) -> Result<KeychainFactory> {
    use strongkey_storage::InMemoryKeyStore;

    let factory = KeychainFactory::new(
        Arc::new(InMemoryKeyStore::default()),
        Arc::new(JsonFileStoreProvider::new(root)),
        config.keychain.clone(),
    );
    apply_strongbox(&factory, config, false)?;
    Ok(factory)
}
