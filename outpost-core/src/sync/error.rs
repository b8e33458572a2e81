// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sync error types.

use std::time::Duration;

use thiserror::Error;

use super::config::ConfigError;
use crate::conflict::ConflictError;
use crate::crypto::CipherError;
use crate::network::SyncBlockReason;
use crate::queue::OperationType;
use crate::storage::StorageError;

/// Errors raised while reconciling queue items.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Decrypted payload did not match its integrity hash.
    #[error("integrity check failed for item {item_id}")]
    Integrity { item_id: String },

    /// The key generation that sealed the item is gone.
    #[error("key {key_id} not found for item {item_id}")]
    KeyNotFound { item_id: String, key_id: String },

    #[error("conflict resolution for {operation_type} timed out after {timeout:?}")]
    ConflictTimeout {
        operation_type: OperationType,
        timeout: Duration,
    },

    /// The conflict policy refused the local operation.
    #[error("rejected by conflict policy: {0}")]
    Rejected(String),

    /// Connection failure or timeout; worth retrying.
    #[error("network error: {0}")]
    RetryableNetwork(String),

    /// Validation or authorization failure reported by the remote.
    #[error("remote rejected operation: {0}")]
    PermanentRemote(String),

    #[error("no executor registered for {0}")]
    NoExecutor(OperationType),

    #[error("cipher error: {0}")]
    Cipher(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("a sync session is already running")]
    AlreadySyncing,

    #[error("sync is disabled")]
    Disabled,

    #[error("sync blocked: {0}")]
    Blocked(SyncBlockReason),

    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Maps a decryption failure for `item_id` onto the sync taxonomy.
    pub fn from_cipher(item_id: &str, err: CipherError) -> Self {
        match err {
            CipherError::Integrity { .. } => SyncError::Integrity {
                item_id: item_id.to_string(),
            },
            CipherError::KeyNotFound(key_id) => SyncError::KeyNotFound {
                item_id: item_id.to_string(),
                key_id,
            },
            CipherError::Storage(e) => SyncError::Storage(e),
            other => SyncError::Cipher(other.to_string()),
        }
    }

    /// Whether the failed attempt may be repeated with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::RetryableNetwork(_) => true,
            SyncError::Storage(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<ConflictError> for SyncError {
    fn from(err: ConflictError) -> Self {
        match err {
            ConflictError::Timeout {
                operation_type,
                timeout,
            } => SyncError::ConflictTimeout {
                operation_type,
                timeout,
            },
            ConflictError::Task(message) => {
                SyncError::Rejected(format!("conflict resolution failed: {}", message))
            }
        }
    }
}
