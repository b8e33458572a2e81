// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Storage error types.

use thiserror::Error;

use crate::queue::QueueStatus;

/// Storage error types.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Secure storage error: {0}")]
    SecureStorage(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: QueueStatus,
        to: QueueStatus,
    },

    #[error("Queue is full ({0} items)")]
    QueueFull(usize),
}

impl StorageError {
    /// Whether the same call may succeed later without any change on our side:
    /// the queue has drained or the database lock was released.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::QueueFull(_) => true,
            StorageError::Database(e) => matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
