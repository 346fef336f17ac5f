//! Core abstractions for Strongkey: keychain contracts, stored values and the
//! key-value store seam shared by the encrypted and legacy keychains.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod error;
pub mod keychain;
pub mod store;
pub mod value;

pub use error::KeychainError;
pub use keychain::{Keychain, KeychainProtection};
pub use store::{
    InMemoryKeyValueStore, InMemoryStoreProvider, KeyValueStore, KeyValueStoreProvider, StoreBatch,
    StoreOp,
};
pub use value::KeychainValue;
