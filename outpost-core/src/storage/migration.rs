// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Database Schema Migration Framework
//!
//! Versioned schema migrations with transactional safety. The runner tracks
//! applied versions in a `schema_version` table and applies pending
//! migrations in order within a single transaction.

use rusqlite::Connection;
use tracing::info;

use super::StorageError;
use crate::time::now_millis;

/// A single schema migration step.
pub struct Migration {
    /// Monotonically increasing version number (starting at 1).
    pub version: u32,
    /// Human-readable name for this migration.
    pub name: &'static str,
    /// The migration action: either SQL or a Rust callback.
    pub action: MigrationAction,
}

/// The action a migration performs.
pub enum MigrationAction {
    /// Pure SQL migration.
    Sql(&'static str),
    /// Rust callback migration (for data transformations SQL cannot express).
    Callback(fn(&Connection) -> Result<(), StorageError>),
}

/// Runs schema migrations against a database connection.
pub struct MigrationRunner;

impl MigrationRunner {
    /// Runs all pending migrations in a transaction.
    ///
    /// If any migration fails, all changes are rolled back.
    pub fn run(conn: &Connection, migrations: &[Migration]) -> Result<(), StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            );",
        )?;

        let current_version = Self::current_version(conn)?;

        let pending: Vec<&Migration> = migrations
            .iter()
            .filter(|m| m.version > current_version)
            .collect();

        if pending.is_empty() {
            return Ok(());
        }

        for window in pending.windows(2) {
            if window[0].version >= window[1].version {
                return Err(StorageError::Migration(format!(
                    "Migrations are not in order: v{} before v{}",
                    window[0].version, window[1].version
                )));
            }
        }

        conn.execute_batch("BEGIN EXCLUSIVE TRANSACTION;")?;

        for migration in &pending {
            let outcome = match &migration.action {
                MigrationAction::Sql(sql) => conn.execute_batch(sql).map_err(StorageError::from),
                MigrationAction::Callback(cb) => cb(conn),
            }
            .and_then(|()| {
                conn.execute(
                    "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                    rusqlite::params![migration.version, now_millis() as i64],
                )
                .map(|_| ())
                .map_err(StorageError::from)
            });

            if let Err(e) = outcome {
                conn.execute_batch("ROLLBACK;")?;
                return Err(StorageError::Migration(format!(
                    "Migration v{} '{}' failed: {}",
                    migration.version, migration.name, e
                )));
            }

            info!(version = migration.version, name = migration.name, "applied migration");
        }

        conn.execute_batch("COMMIT;")?;
        Ok(())
    }

    /// Returns the current schema version, or 0 if no migrations have been applied.
    pub fn current_version(conn: &Connection) -> Result<u32, StorageError> {
        let table_exists: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get(0),
        )?;

        if !table_exists {
            return Ok(0);
        }

        let version: Option<u32> =
            conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })?;

        Ok(version.unwrap_or(0))
    }
}

/// Returns all registered migrations in version order.
///
/// New migrations are appended to the end of this list.
pub fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            name: "queue_items",
            action: MigrationAction::Sql(MIGRATION_V1_QUEUE),
        },
        Migration {
            version: 2,
            name: "sync_history",
            action: MigrationAction::Sql(MIGRATION_V2_SYNC_HISTORY),
        },
    ]
}

/// Migration v1: encrypted operation queue.
///
/// `sequence` uses AUTOINCREMENT so values are never reused, even after
/// the highest row is deleted.
const MIGRATION_V1_QUEUE: &str = "
    CREATE TABLE IF NOT EXISTS queue_items (
        sequence INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        operation_type TEXT NOT NULL,
        priority INTEGER NOT NULL,
        status TEXT NOT NULL,
        ciphertext BLOB NOT NULL,
        nonce BLOB NOT NULL,
        integrity_hash TEXT NOT NULL,
        key_id TEXT NOT NULL,
        metadata_json TEXT NOT NULL DEFAULT '{}',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        scheduled_at INTEGER,
        synced_at INTEGER,
        expires_at INTEGER,
        retry_count INTEGER NOT NULL DEFAULT 0,
        max_retries INTEGER NOT NULL,
        next_retry_at INTEGER,
        last_error TEXT,
        related_entity_id TEXT,
        user_id TEXT,
        device_fingerprint TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_queue_status_priority
        ON queue_items(status, priority DESC, sequence);
    CREATE INDEX IF NOT EXISTS idx_queue_type ON queue_items(operation_type);
    CREATE INDEX IF NOT EXISTS idx_queue_key ON queue_items(key_id);
    CREATE INDEX IF NOT EXISTS idx_queue_hash ON queue_items(operation_type, integrity_hash);
    CREATE INDEX IF NOT EXISTS idx_queue_expires ON queue_items(expires_at)
        WHERE expires_at IS NOT NULL;
";

/// Migration v2: summaries of finished sync sessions.
const MIGRATION_V2_SYNC_HISTORY: &str = "
    CREATE TABLE IF NOT EXISTS sync_history (
        session_id TEXT PRIMARY KEY,
        trigger_kind TEXT NOT NULL,
        outcome TEXT NOT NULL,
        started_at INTEGER NOT NULL,
        ended_at INTEGER NOT NULL,
        successful INTEGER NOT NULL,
        failed INTEGER NOT NULL,
        errors_json TEXT NOT NULL DEFAULT '[]'
    );

    CREATE INDEX IF NOT EXISTS idx_history_started ON sync_history(started_at);
";
