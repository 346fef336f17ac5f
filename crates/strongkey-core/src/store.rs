use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use crate::{error::KeychainError, value::KeychainValue};

/// Single mutation inside a [`StoreBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Put(String, KeychainValue),
    Remove(String),
    Clear,
}

/// Ordered set of mutations committed atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreBatch {
    ops: Vec<StoreOp>,
}

impl StoreBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(mut self, key: impl Into<String>, value: KeychainValue) -> Self {
        self.ops.push(StoreOp::Put(key.into(), value));
        self
    }

    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.ops.push(StoreOp::Remove(key.into()));
        self
    }

    pub fn clear(mut self) -> Self {
        self.ops.push(StoreOp::Clear);
        self
    }

    pub fn push(&mut self, op: StoreOp) {
        self.ops.push(op);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[StoreOp] {
        &self.ops
    }

    /// Apply all operations, in order, to an entry map.
    pub fn apply_to(&self, entries: &mut BTreeMap<String, KeychainValue>) {
        for op in &self.ops {
            match op {
                StoreOp::Put(key, value) => {
                    entries.insert(key.clone(), value.clone());
                }
                StoreOp::Remove(key) => {
                    entries.remove(key);
                }
                StoreOp::Clear => entries.clear(),
            }
        }
    }
}

/// Persisted key-value store backing one keychain identifier.
///
/// A single `commit` is atomic: either every operation of the batch becomes
/// visible or none does. Nothing is guaranteed across separate commits.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<KeychainValue>, KeychainError>;

    /// Copy of every stored entry.
    fn snapshot(&self) -> Result<BTreeMap<String, KeychainValue>, KeychainError>;

    fn commit(&self, batch: StoreBatch) -> Result<(), KeychainError>;

    fn put(&self, key: &str, value: KeychainValue) -> Result<(), KeychainError> {
        self.commit(StoreBatch::new().put(key, value))
    }

    /// Remove a key and its value (idempotent).
    fn remove(&self, key: &str) -> Result<(), KeychainError> {
        self.commit(StoreBatch::new().remove(key))
    }

    fn clear(&self) -> Result<(), KeychainError> {
        self.commit(StoreBatch::new().clear())
    }
}

/// Resolves a keychain identifier to its backing store. Repeated calls with
/// the same identifier address the same persisted data.
pub trait KeyValueStoreProvider: Send + Sync {
    fn open(&self, identifier: &str) -> Result<Arc<dyn KeyValueStore>, KeychainError>;
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyValueStore {
    inner: Arc<Mutex<BTreeMap<String, KeychainValue>>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<KeychainValue>, KeychainError> {
        let map = self.inner.lock().map_err(lock_err)?;
        Ok(map.get(key).cloned())
    }

    fn snapshot(&self) -> Result<BTreeMap<String, KeychainValue>, KeychainError> {
        let map = self.inner.lock().map_err(lock_err)?;
        Ok(map.clone())
    }

    fn commit(&self, batch: StoreBatch) -> Result<(), KeychainError> {
        let mut map = self.inner.lock().map_err(lock_err)?;
        batch.apply_to(&mut map);
        Ok(())
    }
}

/// Hands out one shared in-memory store per identifier.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStoreProvider {
    stores: Arc<Mutex<HashMap<String, InMemoryKeyValueStore>>>,
}

impl InMemoryStoreProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct access to the raw store behind an identifier.
    pub fn store(&self, identifier: &str) -> Result<InMemoryKeyValueStore, KeychainError> {
        let mut stores = self.stores.lock().map_err(lock_err)?;
        Ok(stores.entry(identifier.to_string()).or_default().clone())
    }
}

impl KeyValueStoreProvider for InMemoryStoreProvider {
    fn open(&self, identifier: &str) -> Result<Arc<dyn KeyValueStore>, KeychainError> {
        Ok(Arc::new(self.store(identifier)?))
    }
}

fn lock_err<E: std::fmt::Display>(err: E) -> KeychainError {
    KeychainError::storage(format!("lock poisoned: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_applies_operations_in_order() {
        let store = InMemoryKeyValueStore::new();
        store.put("stale", KeychainValue::from("x")).expect("put");

        let batch = StoreBatch::new()
            .clear()
            .put("a", KeychainValue::from("1"))
            .put("b", KeychainValue::from("2"))
            .remove("b");
        store.commit(batch).expect("commit");

        let entries = store.snapshot().expect("snapshot");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries.get("a"), Some(&KeychainValue::from("1")));
    }

    #[test]
    fn remove_is_idempotent() {
        let store = InMemoryKeyValueStore::new();
        store.put("k", KeychainValue::Bool(true)).expect("put");
        store.remove("k").expect("remove");
        store.remove("k").expect("remove again");
        assert_eq!(store.get("k").expect("get"), None);
    }

    #[test]
    fn provider_shares_store_per_identifier() {
        let provider = InMemoryStoreProvider::new();
        let first = provider.open("one").expect("open");
        first.put("k", KeychainValue::Long(7)).expect("put");

        let again = provider.open("one").expect("open again");
        assert_eq!(again.get("k").expect("get"), Some(KeychainValue::Long(7)));

        let other = provider.open("two").expect("open other");
        assert!(other.snapshot().expect("snapshot").is_empty());
    }
}
