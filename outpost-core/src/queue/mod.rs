// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Encrypted Durable Queue Store
//!
//! Captures user operations with a sealed payload and schedules them for
//! reconciliation. Plaintext only passes through [`QueueStore::enqueue`] on
//! the way in and [`QueueStore::decrypt_payload`] on the way out.

mod metadata;
mod types;

pub use metadata::{is_sensitive_key, validate_metadata};
pub use types::{
    EnqueueOptions, OperationType, Priority, QueueFilter, QueueItem, QueueStats, QueueStatus,
};

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::{CipherError, KeyManager};
use crate::storage::{Storage, StorageError};
use crate::time::{add_duration, now_millis};

/// Store-wide limits and defaults.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Retry limit given to new items unless overridden per item.
    pub default_max_retries: u32,
    /// Maximum number of pending + processing items.
    pub max_queue_size: usize,
    /// TTL applied when the caller does not give one.
    pub default_ttl: Option<Duration>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueSettings {
            default_max_retries: 5,
            max_queue_size: 1000,
            default_ttl: None,
        }
    }
}

/// The encrypted operation queue.
pub struct QueueStore {
    storage: Arc<Storage>,
    keys: Arc<KeyManager>,
    settings: QueueSettings,
}

impl QueueStore {
    pub fn new(storage: Arc<Storage>, keys: Arc<KeyManager>, settings: QueueSettings) -> Self {
        QueueStore {
            storage,
            keys,
            settings,
        }
    }

    /// Seals `payload` and queues it as a new pending item. Returns the item id.
    pub fn enqueue(
        &self,
        operation_type: OperationType,
        payload: &[u8],
        options: EnqueueOptions,
    ) -> Result<String, StorageError> {
        validate_metadata(&options.metadata)?;

        let active = self.storage.count_active_queue_items()?;
        if active >= self.settings.max_queue_size {
            return Err(StorageError::QueueFull(active));
        }

        let sealed = self
            .keys
            .encrypt(payload)
            .map_err(|e| StorageError::Encryption(e.to_string()))?;

        let now = now_millis();
        let id = Uuid::new_v4().to_string();
        let ttl = options.ttl.or(self.settings.default_ttl);

        let mut item = QueueItem {
            id: id.clone(),
            sequence: 0,
            operation_type,
            priority: options.priority,
            status: QueueStatus::Pending,
            payload: sealed,
            metadata: options.metadata,
            created_at: now,
            updated_at: now,
            scheduled_at: options.delay.map(|d| add_duration(now, d)),
            synced_at: None,
            expires_at: ttl.map(|d| add_duration(now, d)),
            retry_count: 0,
            max_retries: options
                .max_retries
                .unwrap_or(self.settings.default_max_retries),
            next_retry_at: None,
            last_error: None,
            related_entity_id: options.related_entity_id,
            user_id: options.user_id,
            device_fingerprint: options.device_fingerprint,
        };
        item.sequence = self.storage.insert_queue_item(&item)?;

        debug!(
            item_id = %item.id,
            operation_type = %item.operation_type,
            priority = %item.priority,
            sequence = item.sequence,
            "enqueued operation"
        );
        Ok(id)
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<QueueItem>, StorageError> {
        self.storage.get_queue_item(id)
    }

    pub fn get_by_status(&self, status: QueueStatus) -> Result<Vec<QueueItem>, StorageError> {
        self.storage.get_queue_items_by_status(status)
    }

    pub fn get_by_type(
        &self,
        operation_type: &OperationType,
    ) -> Result<Vec<QueueItem>, StorageError> {
        self.storage.get_queue_items_by_type(operation_type)
    }

    /// Persists an item, enforcing the status state machine.
    pub fn update(&self, item: &QueueItem) -> Result<(), StorageError> {
        self.storage.update_queue_item(item)
    }

    pub fn delete(&self, id: &str) -> Result<bool, StorageError> {
        self.storage.delete_queue_item(id)
    }

    /// Claims a pending item for processing. Only one caller wins per item.
    pub fn claim(&self, id: &str) -> Result<bool, StorageError> {
        self.storage.claim_queue_item(id, now_millis())
    }

    /// Pending items due at `now` that match `filter`, ordered by
    /// `priority_order` and then by sequence.
    pub fn eligible(
        &self,
        now: u64,
        filter: &QueueFilter,
        priority_order: &[Priority],
    ) -> Result<Vec<QueueItem>, StorageError> {
        let mut items: Vec<QueueItem> = self
            .storage
            .get_due_queue_items(now)?
            .into_iter()
            .filter(|item| filter.matches(item))
            .collect();

        let rank = |priority: Priority| {
            priority_order
                .iter()
                .position(|p| *p == priority)
                .unwrap_or(priority_order.len())
        };
        items.sort_by(|a, b| {
            rank(a.priority)
                .cmp(&rank(b.priority))
                .then(a.sequence.cmp(&b.sequence))
        });

        Ok(items)
    }

    /// Marks pending items past their TTL as expired. Returns how many expired.
    pub fn clean_expired(&self) -> Result<usize, StorageError> {
        let expired = self.storage.expire_queue_items(now_millis())?;
        if expired > 0 {
            info!(count = expired, "expired queue items");
        }
        Ok(expired)
    }

    /// Deletes finished items older than `age`.
    pub fn purge_terminal(&self, age: Duration) -> Result<usize, StorageError> {
        let cutoff = now_millis().saturating_sub(age.as_millis() as u64);
        self.storage.purge_terminal_queue_items(cutoff)
    }

    /// Returns items left in `processing` by an interrupted run to the retry
    /// loop. Each one counts as a failed attempt.
    pub fn recover_interrupted(&self) -> Result<usize, StorageError> {
        let now = now_millis();
        let stale = self.storage.get_queue_items_by_status(QueueStatus::Processing)?;
        let count = stale.len();

        for mut item in stale {
            let error = "interrupted before completion".to_string();
            if item.retry_count + 1 >= item.max_retries {
                item.mark_failed(error, now);
            } else {
                item.schedule_retry(error, now, now);
            }
            self.storage.update_queue_item(&item)?;
            warn!(item_id = %item.id, status = %item.status, "recovered interrupted item");
        }

        Ok(count)
    }

    /// Queue counts by status, type and priority.
    pub fn stats(&self) -> Result<QueueStats, StorageError> {
        let counts = self.storage.queue_counts()?;
        let total = counts.by_status.values().sum();
        let synced = counts.by_status.get(&QueueStatus::Synced).copied().unwrap_or(0);
        let failed = counts.by_status.get(&QueueStatus::Failed).copied().unwrap_or(0);
        let success_rate = if synced + failed == 0 {
            1.0
        } else {
            synced as f64 / (synced + failed) as f64
        };

        Ok(QueueStats {
            total,
            by_status: counts.by_status,
            by_type: counts.by_type,
            by_priority: counts.by_priority,
            oldest_pending_at: counts.oldest_pending_at,
            success_rate,
        })
    }

    /// Decrypts an item's payload. The plaintext is zeroized on drop.
    pub fn decrypt_payload(&self, item: &QueueItem) -> Result<Zeroizing<Vec<u8>>, CipherError> {
        self.keys.decrypt(&item.payload)
    }

    /// Id of an already-synced item with identical type and plaintext, if any.
    pub fn find_synced_duplicate(&self, item: &QueueItem) -> Result<Option<String>, StorageError> {
        self.storage.find_synced_duplicate(
            &item.operation_type,
            &item.payload.integrity_hash,
            &item.id,
        )
    }

    /// Rotates the active key if the rotation interval elapsed.
    pub fn rotate_keys_if_due(&self) -> Result<bool, CipherError> {
        if !self.keys.should_rotate(now_millis()) {
            return Ok(false);
        }
        self.keys.rotate_keys()?;
        Ok(true)
    }

    /// Erases old key generations no unsynced item still needs.
    pub fn cleanup_old_keys(&self) -> Result<Vec<String>, CipherError> {
        let in_use = self.storage.queue_key_ids_in_use()?;
        self.keys.cleanup_old_keys(&in_use)
    }

    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }
}

impl QueueItem {
    /// `processing -> synced`.
    pub fn mark_synced(&mut self, now: u64) {
        self.status = QueueStatus::Synced;
        self.synced_at = Some(now);
        self.updated_at = now;
        self.next_retry_at = None;
        self.last_error = None;
    }

    /// `processing -> pending` with the next attempt at `next_retry_at`.
    pub fn schedule_retry(&mut self, error: String, next_retry_at: u64, now: u64) {
        self.status = QueueStatus::Pending;
        self.retry_count += 1;
        self.next_retry_at = Some(next_retry_at);
        self.last_error = Some(error);
        self.updated_at = now;
    }

    /// `processing -> failed`.
    pub fn mark_failed(&mut self, error: String, now: u64) {
        self.status = QueueStatus::Failed;
        self.retry_count += 1;
        self.next_retry_at = None;
        self.last_error = Some(error);
        self.updated_at = now;
    }
}
