// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sync session history.

use rusqlite::params;

use super::{Storage, StorageError};

/// Summary of a finished sync session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub session_id: String,
    pub trigger: String,
    pub outcome: String,
    pub started_at: u64,
    pub ended_at: u64,
    pub successful: u32,
    pub failed: u32,
    pub errors: Vec<String>,
}

/// Totals across all recorded sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryTotals {
    pub sessions: u64,
    pub successful: u64,
    pub failed: u64,
    pub last_ended_at: Option<u64>,
}

impl Storage {
    /// Records a finished session.
    pub fn record_session(&self, record: &SessionRecord) -> Result<(), StorageError> {
        let errors_json = serde_json::to_string(&record.errors)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO sync_history
             (session_id, trigger_kind, outcome, started_at, ended_at,
              successful, failed, errors_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.session_id,
                record.trigger,
                record.outcome,
                record.started_at as i64,
                record.ended_at as i64,
                record.successful,
                record.failed,
                errors_json,
            ],
        )?;
        Ok(())
    }

    /// Most recent sessions, newest first.
    pub fn recent_sessions(&self, limit: usize) -> Result<Vec<SessionRecord>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT session_id, trigger_kind, outcome, started_at, ended_at, successful, failed,
                    errors_json
             FROM sync_history ORDER BY started_at DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            let errors_json: String = row.get(7)?;
            Ok(SessionRecord {
                session_id: row.get(0)?,
                trigger: row.get(1)?,
                outcome: row.get(2)?,
                started_at: row.get::<_, i64>(3)? as u64,
                ended_at: row.get::<_, i64>(4)? as u64,
                successful: row.get(5)?,
                failed: row.get(6)?,
                errors: serde_json::from_str(&errors_json).unwrap_or_default(),
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)
    }

    /// Aggregates all recorded sessions.
    pub fn history_totals(&self) -> Result<HistoryTotals, StorageError> {
        let totals = self.conn().query_row(
            "SELECT COUNT(*), COALESCE(SUM(successful), 0), COALESCE(SUM(failed), 0), MAX(ended_at)
             FROM sync_history",
            [],
            |row| {
                Ok(HistoryTotals {
                    sessions: row.get::<_, i64>(0)? as u64,
                    successful: row.get::<_, i64>(1)? as u64,
                    failed: row.get::<_, i64>(2)? as u64,
                    last_ended_at: row.get::<_, Option<i64>>(3)?.map(|v| v as u64),
                })
            },
        )?;
        Ok(totals)
    }
}
