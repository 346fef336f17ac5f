use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Value persisted in a keychain or in the backing key-value store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum KeychainValue {
    Text(String),
    Data(Vec<u8>),
    Bool(bool),
    Long(i64),
    TextSet(BTreeSet<String>),
}

impl KeychainValue {
    /// Empty strings and empty byte arrays carry no information and are
    /// stored as absent by encrypted keychains.
    pub fn is_empty(&self) -> bool {
        match self {
            KeychainValue::Text(text) => text.is_empty(),
            KeychainValue::Data(bytes) => bytes.is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            KeychainValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&[u8]> {
        match self {
            KeychainValue::Data(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            KeychainValue::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            KeychainValue::Long(number) => Some(*number),
            _ => None,
        }
    }

    pub fn as_text_set(&self) -> Option<&BTreeSet<String>> {
        match self {
            KeychainValue::TextSet(set) => Some(set),
            _ => None,
        }
    }
}

impl From<&str> for KeychainValue {
    fn from(value: &str) -> Self {
        KeychainValue::Text(value.to_string())
    }
}

impl From<String> for KeychainValue {
    fn from(value: String) -> Self {
        KeychainValue::Text(value)
    }
}

impl From<Vec<u8>> for KeychainValue {
    fn from(value: Vec<u8>) -> Self {
        KeychainValue::Data(value)
    }
}

impl From<bool> for KeychainValue {
    fn from(value: bool) -> Self {
        KeychainValue::Bool(value)
    }
}

impl From<i64> for KeychainValue {
    fn from(value: i64) -> Self {
        KeychainValue::Long(value)
    }
}
