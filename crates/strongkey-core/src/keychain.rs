use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{error::KeychainError, value::KeychainValue};

/// Strongest protection available for keychain data, ordered from weakest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeychainProtection {
    /// Data is stored in plaintext.
    None,
    /// Data is encrypted with a software-backed key.
    Software,
    /// Data is encrypted with a key held in secure hardware.
    Hardware,
    /// Data is encrypted with a key isolated in a StrongBox security module.
    StrongBox,
}

/// Named-value store scoped to one identifier.
///
/// Setting `None` removes the entry. The typed helpers mirror the accessors
/// applications use for tokens and activation state.
pub trait Keychain: Send + Sync {
    fn identifier(&self) -> &str;

    /// Whether values are encrypted at rest.
    fn is_encrypted(&self) -> bool;

    /// Whether values are encrypted with a StrongBox-backed key.
    fn is_strongbox_backed(&self) -> bool;

    fn get(&self, key: &str) -> Result<Option<KeychainValue>, KeychainError>;

    fn set(&self, key: &str, value: Option<KeychainValue>) -> Result<(), KeychainError>;

    fn contains(&self, key: &str) -> Result<bool, KeychainError>;

    /// Remove a single entry (idempotent).
    fn remove(&self, key: &str) -> Result<(), KeychainError> {
        self.set(key, None)
    }

    fn remove_all(&self) -> Result<(), KeychainError>;

    /// Names of all stored entries, sorted.
    fn keys(&self) -> Result<Vec<String>, KeychainError>;

    fn string(&self, key: &str) -> Result<Option<String>, KeychainError> {
        Ok(self.get(key)?.and_then(|v| v.as_text().map(str::to_string)))
    }

    fn set_string(&self, key: &str, value: Option<&str>) -> Result<(), KeychainError> {
        self.set(key, value.map(KeychainValue::from))
    }

    fn data(&self, key: &str) -> Result<Option<Vec<u8>>, KeychainError> {
        Ok(self.get(key)?.and_then(|v| v.as_data().map(<[u8]>::to_vec)))
    }

    fn set_data(&self, key: &str, value: Option<&[u8]>) -> Result<(), KeychainError> {
        self.set(key, value.map(|bytes| KeychainValue::Data(bytes.to_vec())))
    }

    fn bool_or(&self, key: &str, default: bool) -> Result<bool, KeychainError> {
        Ok(self.get(key)?.and_then(|v| v.as_bool()).unwrap_or(default))
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), KeychainError> {
        self.set(key, Some(KeychainValue::Bool(value)))
    }

    fn long_or(&self, key: &str, default: i64) -> Result<i64, KeychainError> {
        Ok(self.get(key)?.and_then(|v| v.as_long()).unwrap_or(default))
    }

    fn set_long(&self, key: &str, value: i64) -> Result<(), KeychainError> {
        self.set(key, Some(KeychainValue::Long(value)))
    }

    fn string_set(&self, key: &str) -> Result<Option<BTreeSet<String>>, KeychainError> {
        Ok(self.get(key)?.and_then(|v| v.as_text_set().cloned()))
    }

    fn set_string_set(
        &self,
        key: &str,
        value: Option<BTreeSet<String>>,
    ) -> Result<(), KeychainError> {
        self.set(key, value.map(KeychainValue::TextSet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protection_levels_are_ordered() {
        assert!(KeychainProtection::None < KeychainProtection::Software);
        assert!(KeychainProtection::Software < KeychainProtection::Hardware);
        assert!(KeychainProtection::Hardware < KeychainProtection::StrongBox);
    }
}
