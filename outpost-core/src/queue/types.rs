// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Queue data model.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::crypto::EncryptedBlob;

/// Kind of user operation carried by a queue item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr)]
pub enum OperationType {
    Vote,
    AuthRefresh,
    ProfileUpdate,
    NotificationAck,
    TimetableEvent,
    /// Application-defined operation routed to a registered executor.
    Custom(String),
}

impl OperationType {
    pub fn as_str(&self) -> &str {
        match self {
            OperationType::Vote => "vote",
            OperationType::AuthRefresh => "auth_refresh",
            OperationType::ProfileUpdate => "profile_update",
            OperationType::NotificationAck => "notification_ack",
            OperationType::TimetableEvent => "timetable_event",
            OperationType::Custom(name) => name,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "vote" => OperationType::Vote,
            "auth_refresh" => OperationType::AuthRefresh,
            "profile_update" => OperationType::ProfileUpdate,
            "notification_ack" => OperationType::NotificationAck,
            "timetable_event" => OperationType::TimetableEvent,
            "" => return Err("operation type must not be empty".into()),
            other => OperationType::Custom(other.to_string()),
        })
    }
}

/// Item priority. Ordering is `Low < Normal < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    /// All priorities, highest first.
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }

    pub(crate) fn as_i64(self) -> i64 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Critical => 3,
        }
    }

    pub(crate) fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Priority::Low),
            1 => Some(Priority::Normal),
            2 => Some(Priority::High),
            3 => Some(Priority::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a queue item.
///
/// ```text
/// pending -> processing -> synced
/// processing -> pending   (retry scheduled)
/// processing -> failed
/// pending -> expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Synced,
    Failed,
    Expired,
}

impl QueueStatus {
    pub const ALL: [QueueStatus; 5] = [
        QueueStatus::Pending,
        QueueStatus::Processing,
        QueueStatus::Synced,
        QueueStatus::Failed,
        QueueStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Synced => "synced",
            QueueStatus::Failed => "failed",
            QueueStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueueStatus::Pending),
            "processing" => Some(QueueStatus::Processing),
            "synced" => Some(QueueStatus::Synced),
            "failed" => Some(QueueStatus::Failed),
            "expired" => Some(QueueStatus::Expired),
            _ => None,
        }
    }

    /// Terminal states never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueStatus::Synced | QueueStatus::Failed | QueueStatus::Expired
        )
    }

    /// Whether an item may move from `self` to `next`.
    ///
    /// Rewriting a non-terminal item without changing its status is allowed.
    pub fn can_transition_to(&self, next: QueueStatus) -> bool {
        use QueueStatus::*;
        match (self, next) {
            (Pending, Pending) | (Processing, Processing) => true,
            (Pending, Processing) | (Pending, Expired) => true,
            (Processing, Synced) | (Processing, Pending) | (Processing, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One captured, not-yet-confirmed operation.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub id: String,
    /// Monotonic local sequence, FIFO tie-break within a priority.
    pub sequence: i64,
    pub operation_type: OperationType,
    pub priority: Priority,
    pub status: QueueStatus,
    /// Sealed payload. Never stored or held in clear.
    pub payload: EncryptedBlob,
    /// Unencrypted routing/display data. Must not contain secrets.
    pub metadata: BTreeMap<String, String>,
    pub created_at: u64,
    pub updated_at: u64,
    pub scheduled_at: Option<u64>,
    pub synced_at: Option<u64>,
    pub expires_at: Option<u64>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: Option<u64>,
    pub last_error: Option<String>,
    pub related_entity_id: Option<String>,
    pub user_id: Option<String>,
    pub device_fingerprint: Option<String>,
}

impl QueueItem {
    /// True once `expires_at` has passed.
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// True if the item is pending and neither delayed nor waiting on a retry.
    pub fn is_due_at(&self, now: u64) -> bool {
        self.status == QueueStatus::Pending
            && !self.is_expired_at(now)
            && self.scheduled_at.map_or(true, |at| at <= now)
            && self.next_retry_at.map_or(true, |at| at <= now)
    }
}

/// Caller-supplied options for [`crate::queue::QueueStore::enqueue`].
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub priority: Priority,
    pub metadata: BTreeMap<String, String>,
    /// Time-to-live before the first attempt.
    pub ttl: Option<Duration>,
    /// Delay before the item becomes eligible.
    pub delay: Option<Duration>,
    /// Overrides the configured retry limit.
    pub max_retries: Option<u32>,
    pub related_entity_id: Option<String>,
    pub user_id: Option<String>,
    pub device_fingerprint: Option<String>,
}

impl EnqueueOptions {
    pub fn with_priority(priority: Priority) -> Self {
        EnqueueOptions {
            priority,
            ..Default::default()
        }
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn related_entity(mut self, id: impl Into<String>) -> Self {
        self.related_entity_id = Some(id.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Restricts which items a sync pass selects. `None` means no restriction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueFilter {
    pub operation_types: Option<Vec<OperationType>>,
    pub priorities: Option<Vec<Priority>>,
}

impl QueueFilter {
    pub fn matches(&self, item: &QueueItem) -> bool {
        self.operation_types
            .as_ref()
            .map_or(true, |types| types.contains(&item.operation_type))
            && self
                .priorities
                .as_ref()
                .map_or(true, |priorities| priorities.contains(&item.priority))
    }
}

/// Aggregate queue counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub by_status: HashMap<QueueStatus, usize>,
    pub by_type: HashMap<String, usize>,
    pub by_priority: HashMap<Priority, usize>,
    pub oldest_pending_at: Option<u64>,
    /// `synced / (synced + failed)`, or 1.0 when nothing has finished yet.
    pub success_rate: f64,
}

impl QueueStats {
    pub fn count(&self, status: QueueStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}
