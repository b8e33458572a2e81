// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Secure Storage Module
//!
//! Durable key-value storage for key material and keyring metadata.
//! Uses OS keychains when the `secure-storage` feature is enabled, with a
//! fallback to wrapped files on disk. Every backend offers atomic per-entry
//! write, read and delete.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::Mutex;

use crate::crypto::{decrypt, encrypt, SymmetricKey};
use crate::storage::StorageError;

/// Durable secret storage used by the key manager.
///
/// Implementations must make each `write` atomic: a reader sees either the
/// previous value or the new one, never a partial write.
pub trait SecureStorage: Send + Sync {
    /// Stores `value` under `name`, replacing any previous value.
    fn write(&self, name: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Loads the value stored under `name`.
    /// Returns None if the entry doesn't exist.
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Deletes the entry. Deleting a missing entry is not an error.
    fn delete(&self, name: &str) -> Result<(), StorageError>;

    /// Checks if an entry exists.
    fn contains(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.read(name)?.is_some())
    }
}

/// Platform keyring implementation using the `keyring` crate.
/// Available when the `secure-storage` feature is enabled.
#[cfg(feature = "secure-storage")]
pub struct PlatformKeyring {
    service: String,
}

#[cfg(feature = "secure-storage")]
impl PlatformKeyring {
    /// Creates a keyring accessor for the given service name (e.g. "outpost").
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, name: &str) -> Result<keyring::Entry, StorageError> {
        keyring::Entry::new(&self.service, name)
            .map_err(|e| StorageError::SecureStorage(format!("Keyring error: {}", e)))
    }
}

#[cfg(feature = "secure-storage")]
impl SecureStorage for PlatformKeyring {
    fn write(&self, name: &str, value: &[u8]) -> Result<(), StorageError> {
        self.entry(name)?.set_secret(value).map_err(|e| {
            StorageError::SecureStorage(format!("Failed to save to keychain: {}", e))
        })
    }

    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match self.entry(name)?.get_secret() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StorageError::SecureStorage(format!(
                "Failed to load from keychain: {}",
                e
            ))),
        }
    }

    fn delete(&self, name: &str) -> Result<(), StorageError> {
        match self.entry(name)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StorageError::SecureStorage(format!(
                "Failed to delete from keychain: {}",
                e
            ))),
        }
    }
}

/// File-based storage (fallback when no keyring is available).
///
/// Each entry is a separate file wrapped with XChaCha20-Poly1305 under a
/// device wrapping key. Writes go to a temporary file that is renamed into
/// place.
pub struct FileKeyStorage {
    dir: PathBuf,
    wrapping_key: SymmetricKey,
}

impl FileKeyStorage {
    /// Creates a file-based store rooted at `dir`.
    pub fn new(dir: PathBuf, wrapping_key: SymmetricKey) -> Self {
        Self { dir, wrapping_key }
    }

    fn entry_path(&self, name: &str) -> PathBuf {
        // Sanitize the name to prevent path traversal
        let safe_name: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.sealed", safe_name))
    }
}

impl SecureStorage for FileKeyStorage {
    fn write(&self, name: &str, value: &[u8]) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            StorageError::SecureStorage(format!("Failed to create directory: {}", e))
        })?;

        let sealed = encrypt(&self.wrapping_key, value)
            .map_err(|e| StorageError::Encryption(e.to_string()))?;

        let path = self.entry_path(name);
        let tmp_path = path.with_extension("sealed.tmp");
        std::fs::write(&tmp_path, &sealed)
            .map_err(|e| StorageError::SecureStorage(format!("Failed to write entry: {}", e)))?;
        std::fs::rename(&tmp_path, &path)
            .map_err(|e| StorageError::SecureStorage(format!("Failed to commit entry: {}", e)))
    }

    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.entry_path(name);
        let sealed = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::SecureStorage(format!(
                    "Failed to read entry: {}",
                    e
                )))
            }
        };

        decrypt(&self.wrapping_key, &sealed)
            .map(Some)
            .map_err(|e| StorageError::Encryption(e.to_string()))
    }

    fn delete(&self, name: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.entry_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::SecureStorage(format!(
                "Failed to delete entry: {}",
                e
            ))),
        }
    }
}

/// In-process storage. Contents do not survive a restart; used for
/// ephemeral sessions and tests.
#[derive(Default)]
pub struct MemoryKeyStorage {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKeyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl SecureStorage for MemoryKeyStorage {
    fn write(&self, name: &str, value: &[u8]) -> Result<(), StorageError> {
        self.entries.lock().insert(name.to_string(), value.to_vec());
        Ok(())
    }

    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.lock().get(name).cloned())
    }

    fn delete(&self, name: &str) -> Result<(), StorageError> {
        if let Some(mut value) = self.entries.lock().remove(name) {
            zeroize::Zeroize::zeroize(&mut value);
        }
        Ok(())
    }
}
