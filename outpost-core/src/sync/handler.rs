// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sync Handler
//!
//! Executes one claimed queue item against its remote executor, applies the
//! conflict policy to conflict responses and writes the resulting status
//! back to the queue. The decrypted payload lives only for the duration of
//! [`SyncHandler::execute`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use zeroize::Zeroizing;

use super::config::RetryConfig;
use super::error::SyncError;
use super::retry::RetryDecision;
use crate::conflict::{
    ConflictPolicy, ConflictStrategy, LocalVersion, Outcome, ServerVersion, Side,
};
use crate::queue::{EnqueueOptions, OperationType, QueueItem, QueueStatus, QueueStore};
use crate::time::{add_duration, now_millis};

/// Classification of a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection refused, reset or DNS failure.
    Network,
    Timeout,
    /// Temporary server-side failure.
    Unavailable,
    /// The request itself is invalid.
    Validation,
    /// Credentials were rejected for good.
    Unauthorized,
}

impl FailureKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::Network | FailureKind::Timeout | FailureKind::Unavailable
        )
    }
}

/// Server-side state reported with a conflict.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteConflict {
    pub server_state: Option<Vec<u8>>,
    pub server_timestamp: Option<u64>,
    /// The server already holds this exact operation.
    pub duplicate: bool,
}

/// What a remote executor reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteResponse {
    Success { data: Option<Vec<u8>> },
    Conflict(RemoteConflict),
    Failure { kind: FailureKind, message: String },
}

impl RemoteResponse {
    pub fn ok() -> Self {
        RemoteResponse::Success { data: None }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        RemoteResponse::Failure {
            kind,
            message: message.into(),
        }
    }
}

/// A decrypted operation handed to a remote executor.
pub struct RemoteRequest {
    pub item_id: String,
    pub operation_type: OperationType,
    pub payload: Zeroizing<Vec<u8>>,
    pub metadata: BTreeMap<String, String>,
    pub related_entity_id: Option<String>,
    pub user_id: Option<String>,
    pub device_fingerprint: Option<String>,
    /// Zero on the first attempt.
    pub attempt: u32,
}

impl fmt::Debug for RemoteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteRequest")
            .field("item_id", &self.item_id)
            .field("operation_type", &self.operation_type)
            .field("payload_len", &self.payload.len())
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// Performs one kind of operation against the remote service.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(&self, request: &RemoteRequest) -> RemoteResponse;
}

/// Executors by operation type.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: RwLock<HashMap<OperationType, Arc<dyn RemoteExecutor>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `executor`, replacing any previous one for the type.
    pub fn register(&self, operation_type: OperationType, executor: Arc<dyn RemoteExecutor>) {
        self.executors.write().insert(operation_type, executor);
    }

    pub fn get(&self, operation_type: &OperationType) -> Option<Arc<dyn RemoteExecutor>> {
        self.executors.read().get(operation_type).cloned()
    }

    pub fn contains(&self, operation_type: &OperationType) -> bool {
        self.executors.read().contains_key(operation_type)
    }
}

/// Result of one attempt at one item.
#[derive(Debug)]
pub struct SyncResult {
    pub item_id: String,
    pub operation_type: OperationType,
    pub success: bool,
    /// Status the item was left in.
    pub final_status: QueueStatus,
    pub error: Option<SyncError>,
    /// Server data returned on success or accepted from a conflict.
    pub response: Option<Vec<u8>>,
    pub duration: Duration,
    pub should_retry: bool,
    pub retry_delay: Option<Duration>,
    /// Item created from a merge outcome.
    pub merged_item_id: Option<String>,
}

/// How an attempt ended, before it is written back.
enum Completion {
    Synced {
        response: Option<Vec<u8>>,
        merged_item_id: Option<String>,
    },
    Failed(SyncError),
}

/// Runs claimed items against their executors.
pub struct SyncHandler {
    queue: Arc<QueueStore>,
    executors: Arc<ExecutorRegistry>,
    policy: Arc<ConflictPolicy>,
}

impl SyncHandler {
    pub fn new(
        queue: Arc<QueueStore>,
        executors: Arc<ExecutorRegistry>,
        policy: Arc<ConflictPolicy>,
    ) -> Self {
        SyncHandler {
            queue,
            executors,
            policy,
        }
    }

    pub fn policy(&self) -> &Arc<ConflictPolicy> {
        &self.policy
    }

    pub fn executors(&self) -> &Arc<ExecutorRegistry> {
        &self.executors
    }

    /// Executes an item the caller has claimed (`processing`) and moves it
    /// to `synced`, `failed` or back to `pending` for a retry.
    pub async fn execute(
        &self,
        item: QueueItem,
        timeout: Duration,
        retry: RetryConfig,
    ) -> SyncResult {
        let started = Instant::now();
        let completion = self.attempt(&item, timeout).await;
        self.complete(item, completion, retry, started.elapsed())
    }

    async fn attempt(&self, item: &QueueItem, timeout: Duration) -> Completion {
        let payload = match self.queue.decrypt_payload(item) {
            Ok(payload) => payload,
            Err(e) => {
                let err = SyncError::from_cipher(&item.id, e);
                error!(item_id = %item.id, error = %err, "cannot decrypt queue item");
                return Completion::Failed(err);
            }
        };

        // Only operations that must never be applied twice are checked
        // against history; for the others a repeat is a legitimate new write.
        let rule = self.policy.rule_for(&item.operation_type);
        if !rule.allow_duplicates && rule.strategy == ConflictStrategy::Reject {
            match self.queue.find_synced_duplicate(item) {
                Ok(Some(original)) => {
                    debug!(item_id = %item.id, original = %original, "local duplicate detected");
                    let conflict = RemoteConflict {
                        duplicate: true,
                        ..Default::default()
                    };
                    return self.resolve_conflict(item, payload, conflict).await;
                }
                Ok(None) => {}
                Err(e) => return Completion::Failed(SyncError::Storage(e)),
            }
        }

        let Some(executor) = self.executors.get(&item.operation_type) else {
            return Completion::Failed(SyncError::NoExecutor(item.operation_type.clone()));
        };

        let request = RemoteRequest {
            item_id: item.id.clone(),
            operation_type: item.operation_type.clone(),
            payload,
            metadata: item.metadata.clone(),
            related_entity_id: item.related_entity_id.clone(),
            user_id: item.user_id.clone(),
            device_fingerprint: item.device_fingerprint.clone(),
            attempt: item.retry_count,
        };

        debug!(
            item_id = %item.id,
            operation_type = %item.operation_type,
            attempt = item.retry_count,
            "dispatching"
        );
        let response = match tokio::time::timeout(timeout, executor.execute(&request)).await {
            Ok(response) => response,
            Err(_) => {
                return Completion::Failed(SyncError::RetryableNetwork(format!(
                    "remote call timed out after {:?}",
                    timeout
                )))
            }
        };

        match response {
            RemoteResponse::Success { data } => Completion::Synced {
                response: data,
                merged_item_id: None,
            },
            RemoteResponse::Failure { kind, message } if kind.is_retryable() => {
                Completion::Failed(SyncError::RetryableNetwork(message))
            }
            RemoteResponse::Failure { message, .. } => {
                Completion::Failed(SyncError::PermanentRemote(message))
            }
            RemoteResponse::Conflict(conflict) => {
                self.resolve_conflict(item, request.payload, conflict).await
            }
        }
    }

    async fn resolve_conflict(
        &self,
        item: &QueueItem,
        payload: Zeroizing<Vec<u8>>,
        conflict: RemoteConflict,
    ) -> Completion {
        let local = LocalVersion {
            payload,
            timestamp: item.created_at,
        };
        let server_state = conflict.server_state.clone();
        let server = ServerVersion {
            state: conflict.server_state,
            timestamp: conflict.server_timestamp,
            duplicate: conflict.duplicate,
        };

        let outcome = match self
            .policy
            .resolve_within(&item.operation_type, local, server)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return Completion::Failed(e.into()),
        };
        debug!(item_id = %item.id, outcome = ?outcome, "conflict resolved");

        match outcome {
            Outcome::Accept(Side::Server) => Completion::Synced {
                response: server_state,
                merged_item_id: None,
            },
            Outcome::Accept(Side::Local) => Completion::Synced {
                response: None,
                merged_item_id: None,
            },
            Outcome::Reject(reason) => Completion::Failed(SyncError::Rejected(reason)),
            Outcome::Merge(merged) => {
                let options = EnqueueOptions {
                    priority: item.priority,
                    metadata: item.metadata.clone(),
                    max_retries: Some(item.max_retries),
                    related_entity_id: item.related_entity_id.clone(),
                    user_id: item.user_id.clone(),
                    device_fingerprint: item.device_fingerprint.clone(),
                    ..Default::default()
                };
                match self
                    .queue
                    .enqueue(item.operation_type.clone(), &merged, options)
                {
                    Ok(merged_id) => Completion::Synced {
                        response: None,
                        merged_item_id: Some(merged_id),
                    },
                    Err(e) => {
                        error!(item_id = %item.id, error = %e, "could not queue merged payload");
                        Completion::Failed(SyncError::Storage(e))
                    }
                }
            }
        }
    }

    fn complete(
        &self,
        mut item: QueueItem,
        completion: Completion,
        retry: RetryConfig,
        duration: Duration,
    ) -> SyncResult {
        let now = now_millis();
        let mut result = SyncResult {
            item_id: item.id.clone(),
            operation_type: item.operation_type.clone(),
            success: false,
            final_status: QueueStatus::Processing,
            error: None,
            response: None,
            duration,
            should_retry: false,
            retry_delay: None,
            merged_item_id: None,
        };

        match completion {
            Completion::Synced {
                response,
                merged_item_id,
            } => {
                item.mark_synced(now);
                result.success = true;
                result.response = response;
                result.merged_item_id = merged_item_id;
            }
            Completion::Failed(err) if err.is_retryable() => {
                match retry.decide(item.retry_count, item.max_retries) {
                    RetryDecision::Retry { delay } => {
                        warn!(
                            item_id = %item.id,
                            retry_count = item.retry_count + 1,
                            ?delay,
                            error = %err,
                            "scheduling retry"
                        );
                        item.schedule_retry(err.to_string(), add_duration(now, delay), now);
                        result.should_retry = true;
                        result.retry_delay = Some(delay);
                    }
                    RetryDecision::GiveUp => {
                        warn!(item_id = %item.id, error = %err, "retries exhausted");
                        item.mark_failed(err.to_string(), now);
                    }
                }
                result.error = Some(err);
            }
            Completion::Failed(err) => {
                warn!(item_id = %item.id, error = %err, "item failed permanently");
                item.mark_failed(err.to_string(), now);
                result.error = Some(err);
            }
        }

        match self.queue.update(&item) {
            Ok(()) => result.final_status = item.status,
            Err(e) => {
                // Left in processing; recovered on the next pass start.
                error!(item_id = %item.id, error = %e, "failed to record sync result");
                result.success = false;
                result.should_retry = false;
                result.retry_delay = None;
                result.error = Some(SyncError::Storage(e));
            }
        }

        result
    }
}
