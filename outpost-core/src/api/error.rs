// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! API Error Types
//!
//! Unified error type for the Outpost API layer.

use thiserror::Error;

use crate::conflict::ConflictError;
use crate::crypto::CipherError;
use crate::storage::StorageError;
use crate::sync::{ConfigError, SyncError};

/// Unified error type for Outpost operations.
#[derive(Error, Debug)]
pub enum OutpostError {
    /// Storage operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Key management or decryption failed.
    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),

    /// Sync operation failed.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("conflict error: {0}")]
    Conflict(#[from] ConflictError),

    /// Configuration could not be loaded or is invalid.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// The instance was built with missing or contradictory parts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Result type for Outpost operations.
pub type OutpostResult<T> = Result<T, OutpostError>;
