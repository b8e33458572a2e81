// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Metadata classification.
//!
//! Queue metadata is stored in clear and may be shown in the UI, so it is
//! limited to routing and display hints. Anything that identifies a ballot,
//! carries a credential or could be replayed belongs in the sealed payload.

use std::collections::BTreeMap;

use crate::storage::StorageError;

/// Maximum number of metadata entries per item.
pub const MAX_METADATA_ENTRIES: usize = 16;
/// Maximum key length in bytes.
pub const MAX_METADATA_KEY_LEN: usize = 64;
/// Maximum value length in bytes.
pub const MAX_METADATA_VALUE_LEN: usize = 256;

/// Key fragments that mark a field as sensitive.
const SENSITIVE_MARKERS: &[&str] = &[
    "token",
    "secret",
    "password",
    "passwd",
    "key",
    "otp",
    "pin",
    "session",
    "credential",
    "election",
    "ballot",
    "vote",
    "candidate",
];

/// Returns true if `key` names a field that must not be stored in clear.
pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    lower
        .split(|c: char| c == '_' || c == '-' || c == '.')
        .any(|part| SENSITIVE_MARKERS.contains(&part))
        || SENSITIVE_MARKERS
            .iter()
            .filter(|marker| marker.len() > 3)
            .any(|marker| lower.contains(*marker))
}

/// Validates metadata before it is written unencrypted.
pub fn validate_metadata(metadata: &BTreeMap<String, String>) -> Result<(), StorageError> {
    if metadata.len() > MAX_METADATA_ENTRIES {
        return Err(StorageError::Validation(format!(
            "too many metadata entries ({} > {})",
            metadata.len(),
            MAX_METADATA_ENTRIES
        )));
    }

    for (key, value) in metadata {
        if key.is_empty() || key.len() > MAX_METADATA_KEY_LEN {
            return Err(StorageError::Validation(format!(
                "metadata key length must be 1..={}",
                MAX_METADATA_KEY_LEN
            )));
        }
        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(StorageError::Validation(format!(
                "metadata key '{}' contains invalid characters",
                key
            )));
        }
        if is_sensitive_key(key) {
            return Err(StorageError::Validation(format!(
                "metadata key '{}' looks sensitive; move it into the payload",
                key
            )));
        }
        if value.len() > MAX_METADATA_VALUE_LEN {
            return Err(StorageError::Validation(format!(
                "metadata value for '{}' exceeds {} bytes",
                key, MAX_METADATA_VALUE_LEN
            )));
        }
    }

    Ok(())
}
