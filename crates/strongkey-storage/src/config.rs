use serde::{Deserialize, Serialize};

pub const DEFAULT_PRIMARY_KEY_ALIAS: &str = "com.strongkey.Keychain.MasterKey";
pub const DEFAULT_BACKUP_KEY_ALIAS: &str = "com.strongkey.Keychain.BackupKey";
pub const DEFAULT_KEY_SIZE_BITS: usize = 256;

/// Key aliases and sizes used by a [`KeychainFactory`](crate::KeychainFactory).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct FactoryConfig {
    /// Alias of the key that uses StrongBox when enabled.
    pub primary_key_alias: String,
    /// Alias of the regular key used while StrongBox is supported but disabled.
    pub backup_key_alias: String,
    /// AES key size, 128 or 256.
    pub key_size_bits: usize,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            primary_key_alias: DEFAULT_PRIMARY_KEY_ALIAS.to_string(),
            backup_key_alias: DEFAULT_BACKUP_KEY_ALIAS.to_string(),
            key_size_bits: DEFAULT_KEY_SIZE_BITS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let cfg: FactoryConfig = serde_json::from_str(r#"{ "key_size_bits": 128 }"#).unwrap();
        assert_eq!(cfg.key_size_bits, 128);
        assert_eq!(cfg.primary_key_alias, DEFAULT_PRIMARY_KEY_ALIAS);
        assert_eq!(cfg.backup_key_alias, DEFAULT_BACKUP_KEY_ALIAS);
    }
}
