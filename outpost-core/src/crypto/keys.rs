// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Key & Cipher Manager
//!
//! Owns the symmetric key generations used to protect queued payloads.
//! A keyring record (`outpost.keyring`) lists the active generation and the
//! retired ones, newest first; each generation's 32-byte key lives in its own
//! secure storage entry (`outpost.key.<key_id>`).
//!
//! Rotation never re-encrypts existing items. Retired generations older than
//! the immediately-previous one are erased once no unsynced item references
//! them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use zeroize::Zeroizing;

use super::encryption::{open, seal, EncryptionError, SymmetricKey};
use super::integrity::{integrity_hash, verify_integrity};
use crate::storage::{SecureStorage, StorageError};
use crate::time::now_millis;

/// Secure storage entry holding the keyring record.
const KEYRING_ENTRY: &str = "outpost.keyring";
/// Prefix of per-generation key entries.
const KEY_ENTRY_PREFIX: &str = "outpost.key.";
/// Length of a key id in random bytes (hex-encoded to twice this).
const KEY_ID_BYTES: usize = 8;

/// Default rotation interval (30 days).
pub const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Key & cipher errors.
#[derive(Error, Debug)]
pub enum CipherError {
    /// AEAD tag or plaintext hash did not verify.
    #[error("integrity check failed (key {key_id})")]
    Integrity { key_id: String },

    /// The payload was sealed under a key generation that is not available.
    #[error("key generation not found: {0}")]
    KeyNotFound(String),

    #[error("cipher error: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("key storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("corrupt keyring: {0}")]
    CorruptKeyring(String),
}

/// A sealed payload as stored in the queue.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedBlob {
    /// AES-256-GCM ciphertext with the tag appended.
    pub ciphertext: Vec<u8>,
    /// 12-byte nonce used for this payload.
    pub nonce: Vec<u8>,
    /// Hex SHA-256 of the plaintext.
    pub integrity_hash: String,
    /// Key generation the payload was sealed under.
    pub key_id: String,
}

impl std::fmt::Debug for EncryptedBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedBlob")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("key_id", &self.key_id)
            .finish()
    }
}

/// Metadata describing one key generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyGeneration {
    pub key_id: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyringRecord {
    active: KeyGeneration,
    /// Retired generations, newest first.
    retired: Vec<KeyGeneration>,
    last_rotation_at: u64,
}

struct KeyRing {
    record: KeyringRecord,
    keys: HashMap<String, SymmetricKey>,
}

/// Manages key generations and authenticated encryption of payloads.
pub struct KeyManager {
    storage: Arc<dyn SecureStorage>,
    rotation_interval: Duration,
    ring: RwLock<KeyRing>,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("active_key_id", &self.active_key_id())
            .field("rotation_interval", &self.rotation_interval)
            .finish()
    }
}

impl KeyManager {
    /// Loads the keyring from `storage`, creating a first generation if none exists.
    pub fn open(
        storage: Arc<dyn SecureStorage>,
        rotation_interval: Duration,
    ) -> Result<Self, CipherError> {
        let record = match storage.read(KEYRING_ENTRY)? {
            Some(bytes) => serde_json::from_slice::<KeyringRecord>(&bytes)
                .map_err(|e| CipherError::CorruptKeyring(e.to_string()))?,
            None => {
                let now = now_millis();
                let generation = KeyGeneration {
                    key_id: new_key_id()?,
                    created_at: now,
                };
                let key = SymmetricKey::generate();
                storage.write(&key_entry(&generation.key_id), key.as_bytes())?;
                let record = KeyringRecord {
                    active: generation,
                    retired: Vec::new(),
                    last_rotation_at: now,
                };
                persist_record(storage.as_ref(), &record)?;
                info!(key_id = %record.active.key_id, "created initial key generation");
                record
            }
        };

        let mut keys = HashMap::new();
        let active_id = record.active.key_id.clone();
        for generation in std::iter::once(&record.active).chain(record.retired.iter()) {
            match storage.read(&key_entry(&generation.key_id))? {
                Some(bytes) => {
                    let bytes = Zeroizing::new(bytes);
                    let key = SymmetricKey::from_slice(&bytes).ok_or_else(|| {
                        CipherError::CorruptKeyring(format!(
                            "key {} has invalid length",
                            generation.key_id
                        ))
                    })?;
                    keys.insert(generation.key_id.clone(), key);
                }
                None if generation.key_id == active_id => {
                    return Err(CipherError::KeyNotFound(active_id));
                }
                None => {
                    warn!(key_id = %generation.key_id, "retired key material missing");
                }
            }
        }

        Ok(KeyManager {
            storage,
            rotation_interval,
            ring: RwLock::new(KeyRing { record, keys }),
        })
    }

    /// Encrypts `plaintext` under the active key generation.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedBlob, CipherError> {
        let ring = self.ring.read();
        let key_id = &ring.record.active.key_id;
        let key = ring
            .keys
            .get(key_id)
            .ok_or_else(|| CipherError::KeyNotFound(key_id.clone()))?;

        let (nonce, ciphertext) = seal(key, key_id.as_bytes(), plaintext)?;

        Ok(EncryptedBlob {
            ciphertext,
            nonce: nonce.to_vec(),
            integrity_hash: integrity_hash(plaintext),
            key_id: key_id.clone(),
        })
    }

    /// Decrypts a blob and re-verifies its plaintext hash.
    ///
    /// Any tampering with the ciphertext, nonce, key id or hash surfaces as
    /// [`CipherError::Integrity`].
    pub fn decrypt(&self, blob: &EncryptedBlob) -> Result<Zeroizing<Vec<u8>>, CipherError> {
        let ring = self.ring.read();
        let key = ring
            .keys
            .get(&blob.key_id)
            .ok_or_else(|| CipherError::KeyNotFound(blob.key_id.clone()))?;

        let plaintext = open(key, blob.key_id.as_bytes(), &blob.nonce, &blob.ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| CipherError::Integrity {
                key_id: blob.key_id.clone(),
            })?;

        if !verify_integrity(&plaintext, &blob.integrity_hash) {
            return Err(CipherError::Integrity {
                key_id: blob.key_id.clone(),
            });
        }

        Ok(plaintext)
    }

    /// Generates a new key generation and makes it active.
    ///
    /// Existing ciphertexts stay under their original generation.
    pub fn rotate_keys(&self) -> Result<KeyGeneration, CipherError> {
        let mut ring = self.ring.write();
        let now = now_millis();

        let generation = KeyGeneration {
            key_id: new_key_id()?,
            created_at: now,
        };
        let key = SymmetricKey::generate();
        self.storage
            .write(&key_entry(&generation.key_id), key.as_bytes())?;

        let mut record = ring.record.clone();
        let previous = std::mem::replace(&mut record.active, generation.clone());
        record.retired.insert(0, previous);
        record.last_rotation_at = now;
        persist_record(self.storage.as_ref(), &record)?;

        ring.record = record;
        ring.keys.insert(generation.key_id.clone(), key);

        info!(key_id = %generation.key_id, "rotated key generation");
        Ok(generation)
    }

    /// Returns true when the active generation is older than the rotation interval.
    pub fn should_rotate(&self, now: u64) -> bool {
        let last = self.ring.read().record.last_rotation_at;
        now.saturating_sub(last) >= self.rotation_interval.as_millis() as u64
    }

    /// Erases retired generations older than the immediately-previous one.
    ///
    /// Generations listed in `in_use` are kept regardless of age. Returns the
    /// ids that were erased.
    pub fn cleanup_old_keys(&self, in_use: &HashSet<String>) -> Result<Vec<String>, CipherError> {
        let mut ring = self.ring.write();

        let mut record = ring.record.clone();
        let (kept_tail, removed): (Vec<_>, Vec<_>) = record
            .retired
            .iter()
            .skip(1)
            .cloned()
            .partition(|g| in_use.contains(&g.key_id));
        if removed.is_empty() {
            return Ok(Vec::new());
        }

        record.retired.truncate(1);
        record.retired.extend(kept_tail);
        persist_record(self.storage.as_ref(), &record)?;
        ring.record = record;

        let mut erased = Vec::with_capacity(removed.len());
        for generation in removed {
            // Dropping the SymmetricKey zeroizes the in-memory copy.
            ring.keys.remove(&generation.key_id);
            self.storage.delete(&key_entry(&generation.key_id))?;
            info!(key_id = %generation.key_id, "erased retired key generation");
            erased.push(generation.key_id);
        }

        Ok(erased)
    }

    /// Id of the generation used for new encryptions.
    pub fn active_key_id(&self) -> String {
        self.ring.read().record.active.key_id.clone()
    }

    /// All generations still known locally, active first.
    pub fn generations(&self) -> Vec<KeyGeneration> {
        let ring = self.ring.read();
        std::iter::once(ring.record.active.clone())
            .chain(ring.record.retired.iter().cloned())
            .collect()
    }

    /// Timestamp of the last rotation (or keyring creation).
    pub fn last_rotation_at(&self) -> u64 {
        self.ring.read().record.last_rotation_at
    }
}

fn key_entry(key_id: &str) -> String {
    format!("{}{}", KEY_ENTRY_PREFIX, key_id)
}

fn new_key_id() -> Result<String, CipherError> {
    let mut bytes = [0u8; KEY_ID_BYTES];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| CipherError::Encryption(EncryptionError::EncryptionFailed))?;
    Ok(hex::encode(bytes))
}

fn persist_record(storage: &dyn SecureStorage, record: &KeyringRecord) -> Result<(), CipherError> {
    let bytes = serde_json::to_vec(record).map_err(StorageError::from)?;
    storage.write(KEYRING_ENTRY, &bytes)?;
    Ok(())
}
