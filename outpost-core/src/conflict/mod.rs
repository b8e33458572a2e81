// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Conflict Resolution Policy
//!
//! Maps each operation type to a strategy for settling disagreements with the
//! server. Resolution itself is pure; [`ConflictPolicy::resolve_within`] only
//! adds the per-rule deadline.
//!
//! | operation        | strategy    | duplicates |
//! |------------------|-------------|------------|
//! | vote             | reject      | no         |
//! | profile_update   | latest-wins | no         |
//! | auth_refresh     | local-wins  | no         |
//! | notification_ack | merge       | yes        |
//! | timetable_event  | latest-wins | no         |

mod merge;

pub use merge::{merge_json, merge_json_bytes};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::queue::OperationType;

/// Resolution timeout for rules that do not set one.
pub const DEFAULT_RESOLUTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Conflict resolution errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    #[error("conflict resolution for {operation_type} exceeded {timeout:?}")]
    Timeout {
        operation_type: OperationType,
        timeout: Duration,
    },

    #[error("conflict resolution task failed: {0}")]
    Task(String),
}

/// How a conflict is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Never overwrite; the local operation fails.
    Reject,
    LocalWins,
    ServerWins,
    /// The side with the newer timestamp wins.
    LatestWins,
    /// Combine both sides into a new payload.
    Merge,
}

/// Resolution rule for one operation type.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRule {
    pub strategy: ConflictStrategy,
    pub allow_duplicates: bool,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub timeout: Duration,
}

impl ConflictRule {
    pub const fn new(
        strategy: ConflictStrategy,
        allow_duplicates: bool,
        timeout: Duration,
    ) -> Self {
        ConflictRule {
            strategy,
            allow_duplicates,
            timeout,
        }
    }

    /// Rule for operation types nobody configured.
    pub const fn conservative() -> Self {
        ConflictRule::new(ConflictStrategy::Reject, false, DEFAULT_RESOLUTION_TIMEOUT)
    }
}

/// Which version a resolution kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Local,
    Server,
}

/// Result of resolving a conflict.
#[derive(Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The conflict is settled in favour of one side; the item is done.
    Accept(Side),
    /// The local operation must not be applied.
    Reject(String),
    /// A new payload combining both sides must be submitted.
    Merge(Zeroizing<Vec<u8>>),
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Accept(side) => f.debug_tuple("Accept").field(side).finish(),
            Outcome::Reject(reason) => f.debug_tuple("Reject").field(reason).finish(),
            Outcome::Merge(payload) => write!(f, "Merge([{} bytes])", payload.len()),
        }
    }
}

/// The local side of a conflict.
#[derive(Clone)]
pub struct LocalVersion {
    pub payload: Zeroizing<Vec<u8>>,
    pub timestamp: u64,
}

/// The server side of a conflict as reported by the remote executor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerVersion {
    pub state: Option<Vec<u8>>,
    pub timestamp: Option<u64>,
    /// The server already holds an identical operation.
    pub duplicate: bool,
}

/// Custom merge function for one operation type. Returns `None` if the two
/// versions cannot be combined.
pub type Merger = Arc<dyn Fn(&[u8], &[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// Immutable rule set. Swapped as a whole.
#[derive(Clone)]
pub struct RuleTable {
    rules: HashMap<OperationType, ConflictRule>,
    mergers: HashMap<OperationType, Merger>,
    fallback: ConflictRule,
}

impl RuleTable {
    pub fn rule_for(&self, operation_type: &OperationType) -> ConflictRule {
        self.rules
            .get(operation_type)
            .copied()
            .unwrap_or(self.fallback)
    }

    /// Settles a conflict. Pure over the table's contents.
    pub fn resolve(
        &self,
        operation_type: &OperationType,
        local: &LocalVersion,
        server: &ServerVersion,
    ) -> Outcome {
        let rule = self.rule_for(operation_type);

        if server.duplicate {
            return if rule.allow_duplicates {
                Outcome::Accept(Side::Server)
            } else {
                Outcome::Reject(format!("duplicate {} rejected", operation_type))
            };
        }

        match rule.strategy {
            ConflictStrategy::Reject => {
                Outcome::Reject(format!("{} conflicts with server state", operation_type))
            }
            ConflictStrategy::LocalWins => Outcome::Accept(Side::Local),
            ConflictStrategy::ServerWins => Outcome::Accept(Side::Server),
            ConflictStrategy::LatestWins => match server.timestamp {
                Some(server_ts) if local.timestamp > server_ts => Outcome::Accept(Side::Local),
                _ => Outcome::Accept(Side::Server),
            },
            ConflictStrategy::Merge => self.merge(operation_type, local, server),
        }
    }

    fn merge(
        &self,
        operation_type: &OperationType,
        local: &LocalVersion,
        server: &ServerVersion,
    ) -> Outcome {
        let Some(server_state) = server.state.as_deref() else {
            return Outcome::Accept(Side::Local);
        };
        let local_newer = server.timestamp.map_or(true, |ts| local.timestamp > ts);

        let merged = match self.mergers.get(operation_type) {
            Some(merger) => merger(&local.payload, server_state),
            None => merge_json_bytes(&local.payload, server_state, local_newer),
        };

        match merged {
            Some(bytes) if bytes.as_slice() == server_state => Outcome::Accept(Side::Server),
            Some(bytes) => Outcome::Merge(Zeroizing::new(bytes)),
            None => {
                debug!(operation_type = %operation_type, "payloads not mergeable, keeping server");
                Outcome::Accept(Side::Server)
            }
        }
    }
}

/// Shared, hot-swappable conflict policy.
pub struct ConflictPolicy {
    table: RwLock<Arc<RuleTable>>,
}

impl ConflictPolicy {
    pub fn new(rules: HashMap<OperationType, ConflictRule>) -> Self {
        ConflictPolicy {
            table: RwLock::new(Arc::new(RuleTable {
                rules,
                mergers: HashMap::new(),
                fallback: ConflictRule::conservative(),
            })),
        }
    }

    /// The built-in rule table.
    pub fn default_rules() -> HashMap<OperationType, ConflictRule> {
        use ConflictStrategy::*;
        HashMap::from([
            (
                OperationType::Vote,
                ConflictRule::new(Reject, false, Duration::from_secs(5)),
            ),
            (
                OperationType::ProfileUpdate,
                ConflictRule::new(LatestWins, false, Duration::from_secs(10)),
            ),
            (
                OperationType::AuthRefresh,
                ConflictRule::new(LocalWins, false, Duration::from_secs(5)),
            ),
            (
                OperationType::NotificationAck,
                ConflictRule::new(Merge, true, Duration::from_secs(10)),
            ),
            (
                OperationType::TimetableEvent,
                ConflictRule::new(LatestWins, false, Duration::from_secs(10)),
            ),
        ])
    }

    /// Default rules with `overrides` applied on top.
    pub fn with_overrides(overrides: &HashMap<OperationType, ConflictRule>) -> Self {
        let mut rules = Self::default_rules();
        rules.extend(overrides.iter().map(|(k, v)| (k.clone(), *v)));
        ConflictPolicy::new(rules)
    }

    /// Current rule table. Callers keep using the snapshot they took even if
    /// the rules are swapped meanwhile.
    pub fn snapshot(&self) -> Arc<RuleTable> {
        Arc::clone(&self.table.read())
    }

    pub fn rule_for(&self, operation_type: &OperationType) -> ConflictRule {
        self.snapshot().rule_for(operation_type)
    }

    /// Atomically replaces all rules. Registered mergers are kept.
    pub fn replace_rules(&self, rules: HashMap<OperationType, ConflictRule>) {
        self.swap(|table| table.rules = rules);
    }

    pub fn set_rule(&self, operation_type: OperationType, rule: ConflictRule) {
        self.swap(|table| {
            table.rules.insert(operation_type, rule);
        });
    }

    /// Registers a custom merge function for an operation type.
    pub fn set_merger(&self, operation_type: OperationType, merger: Merger) {
        self.swap(|table| {
            table.mergers.insert(operation_type, merger);
        });
    }

    fn swap(&self, change: impl FnOnce(&mut RuleTable)) {
        let mut guard = self.table.write();
        let mut next = RuleTable::clone(&guard);
        change(&mut next);
        *guard = Arc::new(next);
    }

    /// Settles a conflict synchronously.
    pub fn resolve(
        &self,
        operation_type: &OperationType,
        local: &LocalVersion,
        server: &ServerVersion,
    ) -> Outcome {
        self.snapshot().resolve(operation_type, local, server)
    }

    /// Settles a conflict on the blocking pool, giving up after the rule's
    /// timeout.
    pub async fn resolve_within(
        &self,
        operation_type: &OperationType,
        local: LocalVersion,
        server: ServerVersion,
    ) -> Result<Outcome, ConflictError> {
        let table = self.snapshot();
        let timeout = table.rule_for(operation_type).timeout;
        let op = operation_type.clone();

        let task = tokio::task::spawn_blocking(move || table.resolve(&op, &local, &server));

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(join_error)) => Err(ConflictError::Task(join_error.to_string())),
            Err(_) => {
                warn!(operation_type = %operation_type, ?timeout, "conflict resolution timed out");
                Err(ConflictError::Timeout {
                    operation_type: operation_type.clone(),
                    timeout,
                })
            }
        }
    }
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        ConflictPolicy::new(Self::default_rules())
    }
}
