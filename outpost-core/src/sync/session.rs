// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sync sessions, batches and orchestrator status.

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use super::handler::SyncResult;
use crate::queue::QueueStatus;
use crate::storage::SessionRecord;

/// Errors kept per session. Later errors are counted but not stored.
pub const MAX_SESSION_ERRORS: usize = 50;

/// What started a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Manual,
    NetworkRestored,
    Periodic,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTrigger::Manual => "manual",
            SyncTrigger::NetworkRestored => "network_restored",
            SyncTrigger::Periodic => "periodic",
        }
    }
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed,
    Cancelled,
    TimedOut,
    /// A systemic error stopped the pass before any item ran.
    Aborted,
}

impl SessionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionOutcome::Completed => "completed",
            SessionOutcome::Cancelled => "cancelled",
            SessionOutcome::TimedOut => "timed_out",
            SessionOutcome::Aborted => "aborted",
        }
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSession {
    pub id: String,
    pub trigger: SyncTrigger,
    pub started_at: u64,
    pub ended_at: Option<u64>,
    pub successful: u32,
    pub failed: u32,
    /// Items that failed this time but were scheduled for another attempt.
    pub retried: u32,
    pub errors: Vec<String>,
    pub dropped_errors: u32,
    pub cancelled: bool,
    pub outcome: Option<SessionOutcome>,
}

impl SyncSession {
    pub fn start(trigger: SyncTrigger, now: u64) -> Self {
        SyncSession {
            id: Uuid::new_v4().to_string(),
            trigger,
            started_at: now,
            ended_at: None,
            successful: 0,
            failed: 0,
            retried: 0,
            errors: Vec::new(),
            dropped_errors: 0,
            cancelled: false,
            outcome: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    pub fn processed(&self) -> u32 {
        self.successful + self.failed + self.retried
    }

    /// Folds one item result into the session counters.
    pub fn record(&mut self, result: &SyncResult) {
        match result.final_status {
            QueueStatus::Synced => self.successful += 1,
            QueueStatus::Failed => self.failed += 1,
            _ if result.should_retry => self.retried += 1,
            _ => {}
        }
        if let Some(error) = &result.error {
            self.push_error(format!("{}: {}", result.item_id, error));
        }
    }

    pub fn push_error(&mut self, message: String) {
        if self.errors.len() < MAX_SESSION_ERRORS {
            self.errors.push(message);
        } else {
            self.dropped_errors += 1;
        }
    }

    pub fn close(&mut self, outcome: SessionOutcome, now: u64) {
        self.cancelled = outcome == SessionOutcome::Cancelled;
        self.outcome = Some(outcome);
        self.ended_at = Some(now);
    }

    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            session_id: self.id.clone(),
            trigger: self.trigger.as_str().to_string(),
            outcome: self
                .outcome
                .map_or("active", |outcome| outcome.as_str())
                .to_string(),
            started_at: self.started_at,
            ended_at: self.ended_at.unwrap_or(self.started_at),
            successful: self.successful,
            failed: self.failed,
            errors: self.errors.clone(),
        }
    }
}

/// Lifecycle of a batch within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
    /// Stopped dispatching early because of cancellation or its deadline.
    Interrupted,
}

/// Items selected together for one step of a pass. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncBatch {
    pub index: usize,
    pub item_ids: Vec<String>,
    pub status: BatchStatus,
    /// Unix millis after which no further items of the batch are dispatched.
    pub deadline: u64,
}

impl SyncBatch {
    pub fn new(index: usize, item_ids: Vec<String>, deadline: u64) -> Self {
        SyncBatch {
            index,
            item_ids,
            status: BatchStatus::Pending,
            deadline,
        }
    }

    pub fn len(&self) -> usize {
        self.item_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.item_ids.is_empty()
    }

    pub fn is_past_deadline(&self, now: u64) -> bool {
        now >= self.deadline
    }
}

/// Coarse orchestrator state for the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OrchestratorStatus {
    Idle,
    Syncing { session_id: String },
    Error { message: String },
}
