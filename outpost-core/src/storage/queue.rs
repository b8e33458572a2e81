// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Queue row storage operations.

use std::collections::{BTreeMap, HashMap, HashSet};

use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};

use super::{Storage, StorageError};
use crate::crypto::EncryptedBlob;
use crate::queue::{OperationType, Priority, QueueItem, QueueStatus};

const QUEUE_COLUMNS: &str = "sequence, id, operation_type, priority, status, ciphertext, nonce,
     integrity_hash, key_id, metadata_json, created_at, updated_at, scheduled_at, synced_at,
     expires_at, retry_count, max_retries, next_retry_at, last_error, related_entity_id,
     user_id, device_fingerprint";

/// Raw per-dimension counts used to build queue statistics.
#[derive(Debug, Default)]
pub(crate) struct QueueCounts {
    pub by_status: HashMap<QueueStatus, usize>,
    pub by_type: HashMap<String, usize>,
    pub by_priority: HashMap<Priority, usize>,
    pub oldest_pending_at: Option<u64>,
}

impl Storage {
    // === Queue Item Operations ===

    /// Inserts a new queue item and returns its assigned sequence.
    ///
    /// The `sequence` field of `item` is ignored.
    pub fn insert_queue_item(&self, item: &QueueItem) -> Result<i64, StorageError> {
        let metadata_json = serde_json::to_string(&item.metadata)?;
        let conn = self.conn();

        let inserted = conn.execute(
            "INSERT INTO queue_items
             (id, operation_type, priority, status, ciphertext, nonce, integrity_hash, key_id,
              metadata_json, created_at, updated_at, scheduled_at, synced_at, expires_at,
              retry_count, max_retries, next_retry_at, last_error, related_entity_id, user_id,
              device_fingerprint)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                     ?18, ?19, ?20, ?21)",
            params![
                item.id,
                item.operation_type.as_str(),
                item.priority.as_i64(),
                item.status.as_str(),
                item.payload.ciphertext,
                item.payload.nonce,
                item.payload.integrity_hash,
                item.payload.key_id,
                metadata_json,
                item.created_at as i64,
                item.updated_at as i64,
                item.scheduled_at.map(|v| v as i64),
                item.synced_at.map(|v| v as i64),
                item.expires_at.map(|v| v as i64),
                item.retry_count,
                item.max_retries,
                item.next_retry_at.map(|v| v as i64),
                item.last_error,
                item.related_entity_id,
                item.user_id,
                item.device_fingerprint,
            ],
        );

        match inserted {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::AlreadyExists(item.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Gets a queue item by ID.
    pub fn get_queue_item(&self, id: &str) -> Result<Option<QueueItem>, StorageError> {
        let sql = format!("SELECT {} FROM queue_items WHERE id = ?1", QUEUE_COLUMNS);
        let item = self
            .conn()
            .query_row(&sql, params![id], row_to_queue_item)
            .optional()?;
        Ok(item)
    }

    /// Gets all items in a status, highest priority first, FIFO within a priority.
    pub fn get_queue_items_by_status(
        &self,
        status: QueueStatus,
    ) -> Result<Vec<QueueItem>, StorageError> {
        self.query_items(
            "WHERE status = ?1 ORDER BY priority DESC, sequence ASC",
            params![status.as_str()],
        )
    }

    /// Gets all items of an operation type in sequence order.
    pub fn get_queue_items_by_type(
        &self,
        operation_type: &OperationType,
    ) -> Result<Vec<QueueItem>, StorageError> {
        self.query_items(
            "WHERE operation_type = ?1 ORDER BY sequence ASC",
            params![operation_type.as_str()],
        )
    }

    /// Gets pending items that are due at `now`: not delayed, not waiting on a
    /// retry and not past their expiry.
    pub fn get_due_queue_items(&self, now: u64) -> Result<Vec<QueueItem>, StorageError> {
        self.query_items(
            "WHERE status = 'pending'
               AND (scheduled_at IS NULL OR scheduled_at <= ?1)
               AND (next_retry_at IS NULL OR next_retry_at <= ?1)
               AND (expires_at IS NULL OR expires_at > ?1)
             ORDER BY priority DESC, sequence ASC",
            params![now as i64],
        )
    }

    /// Writes back all mutable fields of an item.
    ///
    /// The write only lands if the stored status may transition to
    /// `item.status`; otherwise `InvalidTransition` is returned and the row is
    /// left untouched.
    pub fn update_queue_item(&self, item: &QueueItem) -> Result<(), StorageError> {
        let metadata_json = serde_json::to_string(&item.metadata)?;
        let conn = self.conn();

        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM queue_items WHERE id = ?1",
                params![item.id],
                |row| row.get(0),
            )
            .optional()?;
        let current = current.ok_or_else(|| StorageError::NotFound(item.id.clone()))?;
        let current = QueueStatus::parse(&current).ok_or_else(|| {
            StorageError::Serialization(format!("Unknown status '{}' for {}", current, item.id))
        })?;

        if !current.can_transition_to(item.status) {
            return Err(StorageError::InvalidTransition {
                id: item.id.clone(),
                from: current,
                to: item.status,
            });
        }

        let rows_affected = conn.execute(
            "UPDATE queue_items SET
                priority = ?1, status = ?2, metadata_json = ?3, updated_at = ?4,
                scheduled_at = ?5, synced_at = ?6, expires_at = ?7, retry_count = ?8,
                max_retries = ?9, next_retry_at = ?10, last_error = ?11
             WHERE id = ?12 AND status = ?13",
            params![
                item.priority.as_i64(),
                item.status.as_str(),
                metadata_json,
                item.updated_at as i64,
                item.scheduled_at.map(|v| v as i64),
                item.synced_at.map(|v| v as i64),
                item.expires_at.map(|v| v as i64),
                item.retry_count,
                item.max_retries,
                item.next_retry_at.map(|v| v as i64),
                item.last_error,
                item.id,
                current.as_str(),
            ],
        )?;

        if rows_affected == 0 {
            return Err(StorageError::NotFound(item.id.clone()));
        }
        Ok(())
    }

    /// Atomically moves an item from `pending` to `processing`.
    ///
    /// Returns false if the item is not pending (already claimed, finished or
    /// missing).
    pub fn claim_queue_item(&self, id: &str, now: u64) -> Result<bool, StorageError> {
        let rows_affected = self.conn().execute(
            "UPDATE queue_items SET status = 'processing', updated_at = ?1
             WHERE id = ?2 AND status = 'pending'",
            params![now as i64, id],
        )?;
        Ok(rows_affected == 1)
    }

    /// Deletes a queue item by ID.
    pub fn delete_queue_item(&self, id: &str) -> Result<bool, StorageError> {
        let rows_affected = self
            .conn()
            .execute("DELETE FROM queue_items WHERE id = ?1", params![id])?;
        Ok(rows_affected > 0)
    }

    /// Marks pending items whose TTL elapsed as expired.
    ///
    /// Returns the number of expired items.
    pub fn expire_queue_items(&self, now: u64) -> Result<usize, StorageError> {
        let rows_affected = self.conn().execute(
            "UPDATE queue_items SET status = 'expired', updated_at = ?1
             WHERE status = 'pending' AND expires_at IS NOT NULL AND expires_at <= ?1",
            params![now as i64],
        )?;
        Ok(rows_affected)
    }

    /// Deletes terminal items last updated before `cutoff`.
    pub fn purge_terminal_queue_items(&self, cutoff: u64) -> Result<usize, StorageError> {
        let rows_affected = self.conn().execute(
            "DELETE FROM queue_items
             WHERE status IN ('synced', 'failed', 'expired') AND updated_at < ?1",
            params![cutoff as i64],
        )?;
        Ok(rows_affected)
    }

    /// Counts items that still need work (pending or processing).
    pub fn count_active_queue_items(&self) -> Result<usize, StorageError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM queue_items WHERE status IN ('pending', 'processing')",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Key generations referenced by items that still need work.
    pub fn queue_key_ids_in_use(&self) -> Result<HashSet<String>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT key_id FROM queue_items WHERE status IN ('pending', 'processing')",
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    /// Finds a synced item of the same type carrying the same plaintext hash.
    pub fn find_synced_duplicate(
        &self,
        operation_type: &OperationType,
        integrity_hash: &str,
        exclude_id: &str,
    ) -> Result<Option<String>, StorageError> {
        let id = self
            .conn()
            .query_row(
                "SELECT id FROM queue_items
                 WHERE operation_type = ?1 AND integrity_hash = ?2 AND status = 'synced'
                   AND id != ?3
                 ORDER BY sequence ASC LIMIT 1",
                params![operation_type.as_str(), integrity_hash, exclude_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub(crate) fn queue_counts(&self) -> Result<QueueCounts, StorageError> {
        let conn = self.conn();
        let mut counts = QueueCounts::default();

        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM queue_items GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = QueueStatus::parse(&status) {
                counts.by_status.insert(status, count as usize);
            }
        }

        let mut stmt = conn.prepare(
            "SELECT operation_type, COUNT(*) FROM queue_items GROUP BY operation_type",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (operation_type, count) = row?;
            counts.by_type.insert(operation_type, count as usize);
        }

        let mut stmt =
            conn.prepare("SELECT priority, COUNT(*) FROM queue_items GROUP BY priority")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (priority, count) = row?;
            if let Some(priority) = Priority::from_i64(priority) {
                counts.by_priority.insert(priority, count as usize);
            }
        }

        let oldest: Option<i64> = conn.query_row(
            "SELECT MIN(created_at) FROM queue_items WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        counts.oldest_pending_at = oldest.map(|v| v as u64);

        Ok(counts)
    }

    fn query_items(
        &self,
        clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<QueueItem>, StorageError> {
        let sql = format!("SELECT {} FROM queue_items {}", QUEUE_COLUMNS, clause);
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params, row_to_queue_item)?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)
    }
}

fn conversion_error(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, message.into())
}

/// Converts database row to QueueItem.
fn row_to_queue_item(row: &Row<'_>) -> rusqlite::Result<QueueItem> {
    let operation_type: String = row.get(2)?;
    let operation_type = operation_type
        .parse::<OperationType>()
        .map_err(|e| conversion_error(2, e))?;

    let priority: i64 = row.get(3)?;
    let priority = Priority::from_i64(priority)
        .ok_or_else(|| conversion_error(3, format!("unknown priority {}", priority)))?;

    let status: String = row.get(4)?;
    let status = QueueStatus::parse(&status)
        .ok_or_else(|| conversion_error(4, format!("unknown status {}", status)))?;

    let metadata_json: String = row.get(9)?;
    let metadata: BTreeMap<String, String> =
        serde_json::from_str(&metadata_json).map_err(|e| conversion_error(9, e.to_string()))?;

    Ok(QueueItem {
        sequence: row.get(0)?,
        id: row.get(1)?,
        operation_type,
        priority,
        status,
        payload: EncryptedBlob {
            ciphertext: row.get(5)?,
            nonce: row.get(6)?,
            integrity_hash: row.get(7)?,
            key_id: row.get(8)?,
        },
        metadata,
        created_at: row.get::<_, i64>(10)? as u64,
        updated_at: row.get::<_, i64>(11)? as u64,
        scheduled_at: row.get::<_, Option<i64>>(12)?.map(|v| v as u64),
        synced_at: row.get::<_, Option<i64>>(13)?.map(|v| v as u64),
        expires_at: row.get::<_, Option<i64>>(14)?.map(|v| v as u64),
        retry_count: row.get(15)?,
        max_retries: row.get(16)?,
        next_retry_at: row.get::<_, Option<i64>>(17)?.map(|v| v as u64),
        last_error: row.get(18)?,
        related_entity_id: row.get(19)?,
        user_id: row.get(20)?,
        device_fingerprint: row.get(21)?,
    })
}
