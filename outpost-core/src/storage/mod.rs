// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Persistent Storage Module
//!
//! SQLite storage for queue rows and sync history. Payload columns only ever
//! hold ciphertext; sealing happens in the queue layer before rows reach
//! this module.

mod error;
mod history;
mod queue;

pub mod migration;
pub mod secure;

pub use error::StorageError;
pub use history::{HistoryTotals, SessionRecord};
pub use secure::{FileKeyStorage, MemoryKeyStorage, SecureStorage};

#[cfg(feature = "secure-storage")]
pub use secure::PlatformKeyring;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use std::path::Path;

/// SQLite-based storage implementation.
///
/// The connection sits behind a mutex so the store can be shared between
/// sync workers. Each method holds the lock for one statement or one
/// transaction, which serializes all writes to a given row.
pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    /// Opens or creates a storage database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::from_connection(conn)
    }

    /// Creates an in-memory storage (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        let storage = Storage {
            conn: Mutex::new(conn),
        };
        storage.run_migrations()?;
        Ok(storage)
    }

    /// Runs all pending schema migrations.
    fn run_migrations(&self) -> Result<(), StorageError> {
        let migrations = migration::all_migrations();
        migration::MigrationRunner::run(&self.conn(), &migrations)
    }

    /// Returns the current schema version.
    pub fn schema_version(&self) -> Result<u32, StorageError> {
        migration::MigrationRunner::current_version(&self.conn())
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}
