use std::{
    collections::{BTreeMap, HashMap},
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use strongkey_core::{KeychainError, KeychainValue, KeyValueStore, KeyValueStoreProvider, StoreBatch};
use tempfile::NamedTempFile;
use tracing::instrument;

type Entries = BTreeMap<String, KeychainValue>;

/// Key-value store persisted as one JSON document per keychain identifier.
/// Every commit rewrites the document through a temp file and an atomic rename.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<KeychainValue>, KeychainError> {
        Ok(read_entries(&self.path)?.remove(key))
    }

    fn snapshot(&self) -> Result<Entries, KeychainError> {
        read_entries(&self.path)
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    fn commit(&self, batch: StoreBatch) -> Result<(), KeychainError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|err| KeychainError::storage(format!("lock poisoned: {err}")))?;
        let mut entries = read_entries(&self.path)?;
        batch.apply_to(&mut entries);
        write_entries(&self.path, &entries)
    }
}

/// Opens one [`JsonFileStore`] per identifier under a root directory.
pub struct JsonFileStoreProvider {
    root: PathBuf,
    stores: Mutex<HashMap<String, Arc<JsonFileStore>>>,
}

impl JsonFileStoreProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            stores: Mutex::new(HashMap::new()),
        }
    }

    fn path_for(&self, identifier: &str) -> PathBuf {
        self.root
            .join(format!("{}.json", URL_SAFE_NO_PAD.encode(identifier)))
    }
}

impl KeyValueStoreProvider for JsonFileStoreProvider {
    fn open(&self, identifier: &str) -> Result<Arc<dyn KeyValueStore>, KeychainError> {
        let mut stores = self
            .stores
            .lock()
            .map_err(|err| KeychainError::storage(format!("lock poisoned: {err}")))?;
        let store = stores
            .entry(identifier.to_string())
            .or_insert_with(|| Arc::new(JsonFileStore::new(self.path_for(identifier))))
            .clone();
        Ok(store)
    }
}

fn read_entries(path: &Path) -> Result<Entries, KeychainError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::new()),
        Err(err) => return Err(storage_err(err)),
    };

    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(storage_err)?;
    if buf.is_empty() {
        return Ok(Entries::new());
    }
    serde_json::from_slice(&buf).map_err(storage_err)
}

fn write_entries(path: &Path, entries: &Entries) -> Result<(), KeychainError> {
    let parent = path
        .parent()
        .ok_or_else(|| KeychainError::storage("invalid storage path"))?;
    fs::create_dir_all(parent).map_err(storage_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(storage_err)?;
    let json = serde_json::to_vec(entries).map_err(storage_err)?;
    tmp.write_all(&json).map_err(storage_err)?;
    tmp.flush().map_err(storage_err)?;
    tmp.persist(path).map_err(|e| storage_err(e.error))?;
    Ok(())
}

fn storage_err<E: ToString>(err: E) -> KeychainError {
    KeychainError::storage(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_persists_across_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = JsonFileStoreProvider::new(dir.path());
        let store = provider.open("com.example.keychain").expect("open");
        store
            .commit(
                StoreBatch::new()
                    .put("token", KeychainValue::from("abc"))
                    .put("count", KeychainValue::Long(3)),
            )
            .expect("commit");

        let reopened = JsonFileStoreProvider::new(dir.path())
            .open("com.example.keychain")
            .expect("reopen");
        assert_eq!(
            reopened.get("token").expect("get"),
            Some(KeychainValue::from("abc"))
        );
        assert_eq!(reopened.snapshot().expect("snapshot").len(), 2);
    }

    #[test]
    fn missing_file_reads_as_empty_and_remove_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path().join("nested").join("store.json"));
        assert!(store.snapshot().expect("snapshot").is_empty());
        store.remove("k").expect("remove");
        store.remove("k").expect("remove again");
        assert!(store.path().exists());
    }

    #[test]
    fn identifiers_map_to_separate_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = JsonFileStoreProvider::new(dir.path());
        provider
            .open("a/b")
            .expect("open")
            .put("k", KeychainValue::Bool(true))
            .expect("put");
        let other = provider.open("a_b").expect("open other");
        assert_eq!(other.get("k").expect("get"), None);
    }

    #[test]
    fn corrupt_document_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        fs::write(&path, b"not json").expect("write");
        let store = JsonFileStore::new(&path);
        assert!(matches!(
            store.snapshot(),
            Err(KeychainError::Storage { .. })
        ));
    }
}
