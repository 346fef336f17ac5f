//! Concrete keychain implementations with encryption at rest.
//! Uses AES-GCM with keys sourced from the platform key store (or test doubles),
//! selecting between a StrongBox-capable primary key and a software backup key.

pub mod cipher;
pub mod config;
pub mod encrypted_keychain;
pub mod factory;
pub mod file_store;
pub mod key_provider;
pub mod key_store;
pub mod legacy_keychain;
pub mod migration;
pub mod strongbox;

pub use config::FactoryConfig;
pub use encrypted_keychain::EncryptedKeychain;
pub use file_store::{JsonFileStore, JsonFileStoreProvider};
pub use factory::KeychainFactory;
pub use key_provider::SymmetricKeyProvider;
pub use key_store::{InMemoryKeyStore, KeyAuthentication, KeyStore, KeyringKeyStore};
pub use legacy_keychain::LegacyKeychain;
pub use strongbox::{DefaultStrongBoxSupport, FixedStrongBoxSupport, StrongBoxSupport};
