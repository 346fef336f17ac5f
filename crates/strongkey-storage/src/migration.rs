//! On-disk format states of an encrypted keychain and the transitions between them.

use std::collections::BTreeMap;

use strongkey_core::{KeychainError, KeychainValue};

pub const VERSION_KEY: &str = "EncryptedKeychain.version";
pub const STRONGBOX_MARKER_KEY: &str = "EncryptedKeychain.strongBoxMarker";

/// Entries encrypted with the master key, no StrongBox marker.
pub const KEYCHAIN_V1: i64 = 1;
/// Adds the StrongBox marker recording which key protected the entries.
pub const KEYCHAIN_V2: i64 = 2;

pub fn is_metadata_key(key: &str) -> bool {
    key == VERSION_KEY || key == STRONGBOX_MARKER_KEY
}

/// Format detected in a keychain's backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatState {
    /// No version entry. Any other entries are legacy plaintext.
    Absent { has_legacy_data: bool },
    V1,
    V2 { marker: bool },
}

impl FormatState {
    pub fn read(entries: &BTreeMap<String, KeychainValue>) -> Result<Self, KeychainError> {
        match entries.get(VERSION_KEY) {
            None => Ok(FormatState::Absent {
                has_legacy_data: entries.keys().any(|key| !is_metadata_key(key)),
            }),
            Some(KeychainValue::Long(KEYCHAIN_V1)) => Ok(FormatState::V1),
            Some(KeychainValue::Long(KEYCHAIN_V2)) => {
                let marker = entries
                    .get(STRONGBOX_MARKER_KEY)
                    .and_then(KeychainValue::as_bool)
                    .unwrap_or(false);
                Ok(FormatState::V2 { marker })
            }
            Some(KeychainValue::Long(version)) => {
                Err(KeychainError::UnsupportedVersion { version: *version })
            }
            Some(other) => Err(KeychainError::storage(format!(
                "malformed keychain version entry: {other:?}"
            ))),
        }
    }

    /// Marker describing the key that protects existing entries. V1 entries
    /// were written with the master key, which is the primary key whenever a
    /// backup key exists on the device.
    pub fn stored_marker(&self, strongbox_supported: bool) -> Option<bool> {
        match self {
            FormatState::Absent { .. } => None,
            FormatState::V1 => Some(strongbox_supported),
            FormatState::V2 { marker } => Some(*marker),
        }
    }
}

/// Work needed to bring a keychain to the current V2 state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Migration {
    /// Already V2 with a matching marker.
    None,
    /// Empty store; write version and marker.
    Initialize { marker: bool },
    /// Encrypt legacy plaintext entries and replace them.
    AdoptLegacy { marker: bool },
    /// V1 entries are already under the target key; rewrite metadata only.
    UpgradeMetadata { marker: bool },
    /// Decrypt every entry with the key implied by `from`, re-encrypt under `to`.
    Reencrypt { from: bool, to: bool },
}

/// Transition function from the detected format to V2 with `current_marker`.
/// `strongbox_supported` tells which key V1 entries were written with.
pub fn plan_migration(
    state: FormatState,
    current_marker: bool,
    strongbox_supported: bool,
) -> Migration {
    match state {
        FormatState::Absent {
            has_legacy_data: false,
        } => Migration::Initialize {
            marker: current_marker,
        },
        FormatState::Absent {
            has_legacy_data: true,
        } => Migration::AdoptLegacy {
            marker: current_marker,
        },
        FormatState::V1 if strongbox_supported == current_marker => Migration::UpgradeMetadata {
            marker: current_marker,
        },
        FormatState::V1 => Migration::Reencrypt {
            from: strongbox_supported,
            to: current_marker,
        },
        FormatState::V2 { marker } if marker == current_marker => Migration::None,
        FormatState::V2 { marker } => Migration::Reencrypt {
            from: marker,
            to: current_marker,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, KeychainValue)]) -> BTreeMap<String, KeychainValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn reads_each_format_state() {
        assert_eq!(
            FormatState::read(&BTreeMap::new()).unwrap(),
            FormatState::Absent {
                has_legacy_data: false
            }
        );
        assert_eq!(
            FormatState::read(&entries(&[("a", KeychainValue::from("1"))])).unwrap(),
            FormatState::Absent {
                has_legacy_data: true
            }
        );
        assert_eq!(
            FormatState::read(&entries(&[(VERSION_KEY, KeychainValue::Long(1))])).unwrap(),
            FormatState::V1
        );
        assert_eq!(
            FormatState::read(&entries(&[
                (VERSION_KEY, KeychainValue::Long(2)),
                (STRONGBOX_MARKER_KEY, KeychainValue::Bool(true)),
            ]))
            .unwrap(),
            FormatState::V2 { marker: true }
        );
    }

    #[test]
    fn rejects_unknown_or_malformed_version() {
        let newer = entries(&[(VERSION_KEY, KeychainValue::Long(3))]);
        assert_eq!(
            FormatState::read(&newer),
            Err(KeychainError::UnsupportedVersion { version: 3 })
        );
        let malformed = entries(&[(VERSION_KEY, KeychainValue::from("2"))]);
        assert!(matches!(
            FormatState::read(&malformed),
            Err(KeychainError::Storage { .. })
        ));
    }

    #[test]
    fn plans_every_transition() {
        for current in [false, true] {
            for supported in [false, true] {
                assert_eq!(
                    plan_migration(FormatState::Absent { has_legacy_data: false }, current, supported),
                    Migration::Initialize { marker: current }
                );
                assert_eq!(
                    plan_migration(FormatState::Absent { has_legacy_data: true }, current, supported),
                    Migration::AdoptLegacy { marker: current }
                );
                assert_eq!(
                    plan_migration(FormatState::V2 { marker: current }, current, supported),
                    Migration::None
                );
                assert_eq!(
                    plan_migration(FormatState::V2 { marker: !current }, current, supported),
                    Migration::Reencrypt {
                        from: !current,
                        to: current
                    }
                );
            }
        }
    }

    #[test]
    fn v1_entries_are_read_with_the_master_key() {
        assert_eq!(FormatState::V1.stored_marker(true), Some(true));
        assert_eq!(FormatState::V1.stored_marker(false), Some(false));
        assert_eq!(
            FormatState::Absent {
                has_legacy_data: true
            }
            .stored_marker(true),
            None
        );

        // Master key is the primary key on a StrongBox capable device.
        assert_eq!(
            plan_migration(FormatState::V1, true, true),
            Migration::UpgradeMetadata { marker: true }
        );
        assert_eq!(
            plan_migration(FormatState::V1, false, true),
            Migration::Reencrypt {
                from: true,
                to: false
            }
        );
        // Without StrongBox there is only the primary key, recorded as `false`.
        assert_eq!(
            plan_migration(FormatState::V1, false, false),
            Migration::UpgradeMetadata { marker: false }
        );
    }
}
