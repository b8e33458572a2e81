// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Tests for the sync handler and orchestrator.

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::broadcast;

use common::{init_tracing, test_config, CallLog, Gate, Harness, MockExecutor};
use outpost_core::conflict::{ConflictRule, ConflictStrategy};
use outpost_core::crypto::integrity_hash;
use outpost_core::network::{ConnectionType, ConnectivitySignal, SyncBlockReason};
use outpost_core::queue::{EnqueueOptions, OperationType, Priority, QueueStatus};
use outpost_core::storage::{Storage, StorageError};
use outpost_core::sync::{
    CallbackHandler, FailureKind, OrchestratorStatus, RemoteConflict, RemoteResponse, RetryConfig,
    SessionOutcome, SyncError, SyncEvent, SyncRequest, SyncSession, SyncTrigger,
};
use outpost_core::time::now_millis;

const WAIT: Duration = Duration::from_secs(5);

fn conflict(server_state: Option<&[u8]>, server_timestamp: Option<u64>) -> RemoteResponse {
    RemoteResponse::Conflict(RemoteConflict {
        server_state: server_state.map(<[u8]>::to_vec),
        server_timestamp,
        duplicate: false,
    })
}

async fn next_finished(events: &mut broadcast::Receiver<SyncEvent>) -> SyncSession {
    loop {
        match tokio::time::timeout(WAIT, events.recv()).await {
            Ok(Ok(SyncEvent::SessionFinished(session))) => return session,
            Ok(Ok(_)) => continue,
            other => panic!("no session finished: {:?}", other.map(|r| r.is_ok())),
        }
    }
}

async fn forced(h: &Harness) -> SyncSession {
    h.orchestrator.start_sync(SyncRequest::forced()).await.unwrap()
}

// === Scenarios ===

#[tokio::test]
async fn test_reconnect_syncs_vote_before_ack() {
    init_tracing();
    let h = Harness::new(test_config());
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    h.register(
        OperationType::Vote,
        MockExecutor::succeeding().logging_to(log.clone()),
    );
    h.register(
        OperationType::NotificationAck,
        MockExecutor::succeeding().logging_to(log.clone()),
    );

    let ack = h.enqueue(OperationType::NotificationAck, br#"{"read":["n1"]}"#, Priority::Low);
    let vote = h.enqueue(OperationType::Vote, br#"{"choice":"a"}"#, Priority::High);

    assert!(matches!(
        h.orchestrator.start_sync(SyncRequest::manual()).await,
        Err(SyncError::Blocked(SyncBlockReason::Offline))
    ));

    let mut events = h.orchestrator.subscribe_events();
    let auto = h.orchestrator.spawn_auto_sync();
    h.online();

    let session = next_finished(&mut events).await;
    auto.abort();

    assert_eq!(session.trigger, SyncTrigger::NetworkRestored);
    assert_eq!(session.outcome, Some(SessionOutcome::Completed));
    assert_eq!(session.successful, 2);
    assert_eq!(*log.lock(), vec![vote.clone(), ack.clone()]);
    assert_eq!(h.item(&vote).status, QueueStatus::Synced);
    assert_eq!(h.item(&ack).status, QueueStatus::Synced);
}

#[tokio::test]
async fn test_latest_wins_accepts_newer_local_profile() {
    let h = Harness::new(test_config());
    let server_ts = now_millis() - 60_000;
    let executor = h.register(
        OperationType::ProfileUpdate,
        MockExecutor::answering(conflict(Some(br#"{"name":"Old"}"#), Some(server_ts))),
    );
    let id = h.enqueue(OperationType::ProfileUpdate, br#"{"name":"New"}"#, Priority::Normal);

    let session = forced(&h).await;

    assert_eq!(session.successful, 1);
    assert_eq!(executor.call_count(), 1);
    let item = h.item(&id);
    assert_eq!(item.status, QueueStatus::Synced);
    assert!(item.synced_at.is_some());
}

#[tokio::test]
async fn test_latest_wins_with_newer_server_keeps_server_data() {
    let h = Harness::new(test_config());
    let executor = h.register(
        OperationType::TimetableEvent,
        MockExecutor::answering(conflict(Some(b"server"), Some(now_millis() + 60_000))),
    );
    let id = h.enqueue(OperationType::TimetableEvent, b"{}", Priority::Normal);

    let item = h.claimed(&id);
    let result = h
        .handler
        .execute(item, Duration::from_secs(1), RetryConfig::default())
        .await;

    assert!(result.success);
    assert_eq!(result.response.as_deref(), Some(b"server".as_slice()));
    assert_eq!(result.final_status, QueueStatus::Synced);
    assert_eq!(executor.call_count(), 1);
}

#[tokio::test]
async fn test_cancel_leaves_undispatched_items_pending() {
    let h = Harness::new(test_config().with_concurrency(1));
    let gate = Arc::new(Gate::default());
    let executor = h.register(
        OperationType::Vote,
        MockExecutor::succeeding().gated(gate.clone()),
    );
    let ids: Vec<String> = (0..3)
        .map(|i| {
            let payload = format!("ballot-{}", i);
            h.enqueue(OperationType::Vote, payload.as_bytes(), Priority::Normal)
        })
        .collect();

    let orchestrator = Arc::clone(&h.orchestrator);
    let run = tokio::spawn(async move { orchestrator.start_sync(SyncRequest::forced()).await });

    tokio::time::timeout(WAIT, gate.started.notified()).await.unwrap();
    assert!(h.orchestrator.is_syncing());
    assert!(h.orchestrator.cancel_sync());
    gate.release.notify_one();

    let session = tokio::time::timeout(WAIT, run).await.unwrap().unwrap().unwrap();
    assert_eq!(session.outcome, Some(SessionOutcome::Cancelled));
    assert!(session.cancelled);
    assert_eq!(session.successful, 1);
    assert_eq!(executor.calls(), vec![ids[0].clone()]);

    assert_eq!(h.item(&ids[0]).status, QueueStatus::Synced);
    assert_eq!(h.item(&ids[1]).status, QueueStatus::Pending);
    assert_eq!(h.item(&ids[2]).status, QueueStatus::Pending);
    assert!(h.queue.get_by_status(QueueStatus::Processing).unwrap().is_empty());
    assert!(!h.orchestrator.cancel_sync());
}

#[tokio::test]
async fn test_duplicate_vote_never_accepted_twice() {
    let h = Harness::new(test_config());
    let executor = h.register(OperationType::Vote, MockExecutor::succeeding());

    let first = h.enqueue(OperationType::Vote, br#"{"poll":"p1","choice":"a"}"#, Priority::High);
    forced(&h).await;
    assert_eq!(h.item(&first).status, QueueStatus::Synced);

    let second = h.enqueue(OperationType::Vote, br#"{"poll":"p1","choice":"a"}"#, Priority::High);
    let session = forced(&h).await;

    assert_eq!(session.failed, 1);
    assert_eq!(executor.call_count(), 1);
    let item = h.item(&second);
    assert_eq!(item.status, QueueStatus::Failed);
    assert!(item.last_error.unwrap().contains("duplicate"));
}

#[tokio::test]
async fn test_repeated_profile_value_is_sent_again() {
    let h = Harness::new(test_config());
    let executor = h.register(OperationType::ProfileUpdate, MockExecutor::succeeding());

    let mut ids = Vec::new();
    for payload in [br#"{"name":"A"}"#, br#"{"name":"B"}"#, br#"{"name":"A"}"#] {
        let id = h.enqueue(OperationType::ProfileUpdate, payload, Priority::Normal);
        forced(&h).await;
        ids.push(id);
    }

    assert_eq!(executor.call_count(), 3);
    assert_eq!(executor.payloads()[2], br#"{"name":"A"}"#.to_vec());
    for id in &ids {
        assert_eq!(h.item(id).status, QueueStatus::Synced);
    }
}

#[tokio::test]
async fn test_identical_auth_refresh_is_not_treated_as_duplicate() {
    let h = Harness::new(test_config());
    let executor = h.register(OperationType::AuthRefresh, MockExecutor::succeeding());

    let first = h.enqueue(OperationType::AuthRefresh, b"refresh", Priority::Critical);
    forced(&h).await;
    let second = h.enqueue(OperationType::AuthRefresh, b"refresh", Priority::Critical);
    let session = forced(&h).await;

    assert_eq!(session.successful, 1);
    assert_eq!(executor.call_count(), 2);
    assert_eq!(h.item(&first).status, QueueStatus::Synced);
    assert_eq!(h.item(&second).status, QueueStatus::Synced);
}

#[tokio::test]
async fn test_server_reported_duplicate_vote_rejected() {
    let h = Harness::new(test_config());
    h.register(
        OperationType::Vote,
        MockExecutor::answering(RemoteResponse::Conflict(RemoteConflict {
            duplicate: true,
            ..RemoteConflict::default()
        })),
    );
    let id = h.enqueue(OperationType::Vote, b"v", Priority::High);

    let result = h
        .handler
        .execute(h.claimed(&id), Duration::from_secs(1), RetryConfig::default())
        .await;
    assert!(matches!(result.error, Some(SyncError::Rejected(_))));
    assert!(!result.should_retry);
    assert_eq!(h.item(&id).status, QueueStatus::Failed);
}

#[tokio::test]
async fn test_batch_dispatch_follows_priority_then_fifo() {
    let h = Harness::new(test_config().with_batch_size(2));
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    h.register(
        OperationType::NotificationAck,
        MockExecutor::succeeding().logging_to(log.clone()),
    );

    let low = h.enqueue(OperationType::NotificationAck, b"1", Priority::Low);
    let normal_a = h.enqueue(OperationType::NotificationAck, b"2", Priority::Normal);
    let critical = h.enqueue(OperationType::NotificationAck, b"3", Priority::Critical);
    let normal_b = h.enqueue(OperationType::NotificationAck, b"4", Priority::Normal);
    let high = h.enqueue(OperationType::NotificationAck, b"5", Priority::High);

    let mut events = h.orchestrator.subscribe_events();
    let session = forced(&h).await;
    assert_eq!(session.successful, 5);
    assert_eq!(*log.lock(), vec![critical, high, normal_a, normal_b, low]);

    let mut batches = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::BatchStarted {
            batch_index,
            item_count,
            ..
        } = event
        {
            batches.push((batch_index, item_count));
        }
    }
    assert_eq!(batches, vec![(0, 2), (1, 2), (2, 1)]);
}

// === Retry ===

#[tokio::test]
async fn test_retry_delays_grow_until_failed() {
    let h = Harness::new(test_config());
    h.register(
        OperationType::AuthRefresh,
        MockExecutor::answering(RemoteResponse::failure(FailureKind::Network, "unreachable")),
    );
    let retry = RetryConfig {
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(500),
        multiplier: 2.0,
        max_retries: 5,
        jitter_factor: 0.0,
    };
    let id = h
        .queue
        .enqueue(
            OperationType::AuthRefresh,
            b"refresh",
            EnqueueOptions::default().max_retries(5),
        )
        .unwrap();

    let mut delays = Vec::new();
    loop {
        let result = h
            .handler
            .execute(h.claimed(&id), Duration::from_secs(1), retry)
            .await;
        assert!(matches!(result.error, Some(SyncError::RetryableNetwork(_))));
        match result.retry_delay {
            Some(delay) => {
                assert!(result.should_retry);
                assert_eq!(result.final_status, QueueStatus::Pending);
                delays.push(delay.as_millis());
            }
            None => {
                assert_eq!(result.final_status, QueueStatus::Failed);
                break;
            }
        }
    }

    assert_eq!(delays, vec![100, 200, 400, 500]);
    let item = h.item(&id);
    assert_eq!(item.status, QueueStatus::Failed);
    assert_eq!(item.retry_count, item.max_retries);
    assert_eq!(item.last_error.as_deref(), Some("network error: unreachable"));
}

#[tokio::test]
async fn test_failing_item_fails_after_max_retries_across_sessions() {
    let config = test_config().with_retry(RetryConfig {
        initial_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        multiplier: 1.0,
        max_retries: 3,
        jitter_factor: 0.0,
    });
    let h = Harness::new(config);
    let executor = h.register(
        OperationType::Vote,
        MockExecutor::answering(RemoteResponse::failure(FailureKind::Unavailable, "503")),
    );
    let id = h.enqueue(OperationType::Vote, b"v", Priority::High);

    let mut retried = 0;
    for _ in 0..3 {
        retried += forced(&h).await.retried;
    }
    let last = forced(&h).await;

    assert_eq!(retried, 2);
    assert_eq!(last.processed(), 0);
    assert_eq!(executor.call_count(), 3);
    let item = h.item(&id);
    assert_eq!(item.status, QueueStatus::Failed);
    assert_eq!(item.retry_count, 3);
}

#[tokio::test]
async fn test_recovering_item_syncs_after_retry() {
    let config = test_config().with_retry(RetryConfig {
        initial_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        multiplier: 1.0,
        max_retries: 5,
        jitter_factor: 0.0,
    });
    let h = Harness::new(config);
    h.register(
        OperationType::ProfileUpdate,
        MockExecutor::succeeding().scripted(vec![
            RemoteResponse::failure(FailureKind::Timeout, "slow"),
            RemoteResponse::failure(FailureKind::Network, "reset"),
        ]),
    );
    let id = h.enqueue(OperationType::ProfileUpdate, b"{}", Priority::Normal);

    forced(&h).await;
    forced(&h).await;
    let session = forced(&h).await;

    assert_eq!(session.successful, 1);
    let item = h.item(&id);
    assert_eq!(item.status, QueueStatus::Synced);
    assert_eq!(item.retry_count, 2);
    assert!(item.last_error.is_none());
}

#[tokio::test]
async fn test_executor_timeout_is_retryable() {
    let h = Harness::new(test_config().with_sync_timeout(Duration::from_millis(50)));
    h.register(
        OperationType::Vote,
        MockExecutor::succeeding().delayed(Duration::from_millis(500)),
    );
    let id = h.enqueue(OperationType::Vote, b"v", Priority::High);

    let session = forced(&h).await;

    assert_eq!(session.retried, 1);
    let item = h.item(&id);
    assert_eq!(item.status, QueueStatus::Pending);
    assert_eq!(item.retry_count, 1);
    assert!(item.next_retry_at.is_some());
}

// === Permanent failures ===

#[tokio::test]
async fn test_permanent_remote_failure_is_not_retried() {
    let h = Harness::new(test_config());
    let executor = h.register(
        OperationType::ProfileUpdate,
        MockExecutor::answering(RemoteResponse::failure(FailureKind::Validation, "bad field")),
    );
    let id = h.enqueue(OperationType::ProfileUpdate, b"{}", Priority::Normal);

    let session = forced(&h).await;
    forced(&h).await;

    assert_eq!(session.failed, 1);
    assert_eq!(executor.call_count(), 1);
    let item = h.item(&id);
    assert_eq!(item.status, QueueStatus::Failed);
    assert_eq!(item.retry_count, 1);
    assert!(session.errors[0].contains("bad field"));
}

#[tokio::test]
async fn test_missing_executor_fails_item() {
    let h = Harness::new(test_config());
    let id = h.enqueue(
        OperationType::Custom("room_booking".into()),
        b"{}",
        Priority::Normal,
    );

    let result = h
        .handler
        .execute(h.claimed(&id), Duration::from_secs(1), RetryConfig::default())
        .await;
    assert!(matches!(
        result.error,
        Some(SyncError::NoExecutor(OperationType::Custom(ref name))) if name == "room_booking"
    ));
    assert_eq!(h.item(&id).status, QueueStatus::Failed);
}

#[tokio::test]
async fn test_tampered_hash_fails_without_remote_call() {
    let h = Harness::new(test_config());
    let executor = h.register(OperationType::Vote, MockExecutor::succeeding());
    let id = h.enqueue(OperationType::Vote, b"ballot", Priority::High);

    let mut item = h.claimed(&id);
    item.payload.integrity_hash = integrity_hash(b"forged");
    let result = h
        .handler
        .execute(item, Duration::from_secs(1), RetryConfig::default())
        .await;

    assert!(matches!(result.error, Some(SyncError::Integrity { ref item_id }) if *item_id == id));
    assert!(!result.should_retry);
    assert_eq!(executor.call_count(), 0);
    assert_eq!(h.item(&id).status, QueueStatus::Failed);
}

#[tokio::test]
async fn test_unknown_key_generation_fails_item() {
    let h = Harness::new(test_config());
    h.register(OperationType::Vote, MockExecutor::succeeding());
    let id = h.enqueue(OperationType::Vote, b"ballot", Priority::High);

    let mut item = h.claimed(&id);
    item.payload.key_id = "ffffffffffffffff".to_string();
    let result = h
        .handler
        .execute(item, Duration::from_secs(1), RetryConfig::default())
        .await;

    assert!(matches!(
        result.error,
        Some(SyncError::KeyNotFound { ref key_id, .. }) if key_id == "ffffffffffffffff"
    ));
    assert_eq!(result.final_status, QueueStatus::Failed);
}

#[tokio::test]
async fn test_corrupted_row_is_reported_in_session() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("outpost.db");
    let h = Harness::with_storage(test_config(), Arc::new(Storage::open(&path).unwrap()));
    let executor = h.register(OperationType::Vote, MockExecutor::succeeding());
    let tampered = h.enqueue(OperationType::Vote, b"ballot-1", Priority::High);
    let intact = h.enqueue(OperationType::Vote, b"ballot-2", Priority::High);

    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute(
        "UPDATE queue_items SET ciphertext = zeroblob(length(ciphertext)) WHERE id = ?1",
        [&tampered],
    )
    .unwrap();
    drop(conn);

    let session = forced(&h).await;

    assert_eq!(session.outcome, Some(SessionOutcome::Completed));
    assert_eq!(session.successful, 1);
    assert_eq!(session.failed, 1);
    assert!(session.errors.iter().any(|e| e.contains("integrity")));
    assert_eq!(executor.calls(), vec![intact.clone()]);
    assert_eq!(h.item(&tampered).status, QueueStatus::Failed);
    assert_eq!(h.item(&intact).status, QueueStatus::Synced);
}

// === Conflicts ===

#[tokio::test]
async fn test_merge_queues_combined_payload() {
    let h = Harness::new(test_config());
    let executor = h.register(
        OperationType::NotificationAck,
        MockExecutor::succeeding().scripted(vec![conflict(
            Some(br#"{"read":["n1"]}"#),
            Some(now_millis() - 1_000),
        )]),
    );
    let id = h.enqueue(OperationType::NotificationAck, br#"{"read":["n2"]}"#, Priority::Low);

    let result = h
        .handler
        .execute(h.claimed(&id), Duration::from_secs(1), RetryConfig::default())
        .await;
    assert!(result.success);
    let merged_id = result.merged_item_id.unwrap();
    assert_eq!(h.item(&id).status, QueueStatus::Synced);

    let merged = h.item(&merged_id);
    assert_eq!(merged.status, QueueStatus::Pending);
    assert_eq!(merged.priority, Priority::Low);
    let payload: serde_json::Value =
        serde_json::from_slice(&h.queue.decrypt_payload(&merged).unwrap()).unwrap();
    assert_eq!(payload, serde_json::json!({"read": ["n1", "n2"]}));

    let session = forced(&h).await;
    assert_eq!(session.successful, 1);
    assert_eq!(h.item(&merged_id).status, QueueStatus::Synced);
    let sent: serde_json::Value = serde_json::from_slice(&executor.payloads()[1]).unwrap();
    assert_eq!(sent, payload);
}

#[tokio::test]
async fn test_merge_into_full_queue_reports_storage_error() {
    let h = Harness::new(test_config().with_max_queue_size(1));
    let executor = h.register(
        OperationType::NotificationAck,
        MockExecutor::answering(conflict(Some(br#"{"read":["n1"]}"#), Some(1))),
    );
    let id = h.enqueue(OperationType::NotificationAck, br#"{"read":["n2"]}"#, Priority::Low);

    let result = h
        .handler
        .execute(h.claimed(&id), Duration::from_secs(1), RetryConfig::default())
        .await;

    assert_eq!(executor.call_count(), 1);
    assert!(!result.success);
    assert!(result.merged_item_id.is_none());
    assert!(matches!(
        result.error,
        Some(SyncError::Storage(StorageError::QueueFull(1)))
    ));
    assert!(result.should_retry);

    let item = h.item(&id);
    assert_eq!(item.status, QueueStatus::Pending);
    assert_eq!(item.retry_count, 1);
    assert!(item.last_error.unwrap().starts_with("storage error"));
    assert_eq!(h.queue.get_by_status(QueueStatus::Pending).unwrap().len(), 1);
}

#[tokio::test]
async fn test_slow_merge_fails_item_with_conflict_timeout() {
    let h = Harness::new(test_config());
    h.policy.set_rule(
        OperationType::NotificationAck,
        ConflictRule::new(ConflictStrategy::Merge, true, Duration::from_millis(20)),
    );
    h.policy.set_merger(
        OperationType::NotificationAck,
        Arc::new(|_: &[u8], server: &[u8]| {
            std::thread::sleep(Duration::from_millis(200));
            Some(server.to_vec())
        }),
    );
    h.register(
        OperationType::NotificationAck,
        MockExecutor::answering(conflict(Some(b"{}"), Some(1))),
    );
    let id = h.enqueue(OperationType::NotificationAck, b"{}", Priority::Low);

    let result = h
        .handler
        .execute(h.claimed(&id), Duration::from_secs(1), RetryConfig::default())
        .await;

    assert!(matches!(result.error, Some(SyncError::ConflictTimeout { .. })));
    assert!(!result.should_retry);
    assert_eq!(h.item(&id).status, QueueStatus::Failed);
}

#[tokio::test]
async fn test_update_config_swaps_conflict_rules() {
    let h = Harness::new(test_config());
    h.register(
        OperationType::Vote,
        MockExecutor::answering(conflict(Some(b"server"), Some(1))),
    );
    h.orchestrator
        .update_config(test_config().with_conflict_rule(
            &OperationType::Vote,
            ConflictRule::new(ConflictStrategy::ServerWins, false, Duration::from_secs(1)),
        ))
        .unwrap();
    let id = h.enqueue(OperationType::Vote, b"v", Priority::High);

    forced(&h).await;
    assert_eq!(h.item(&id).status, QueueStatus::Synced);
    assert_eq!(
        h.orchestrator.config().conflict_rules["vote"].strategy,
        ConflictStrategy::ServerWins
    );
}

// === Gating ===

#[tokio::test]
async fn test_second_pass_rejected_or_queued() {
    let h = Harness::new(test_config());
    let gate = Arc::new(Gate::default());
    h.register(
        OperationType::Vote,
        MockExecutor::succeeding().gated(gate.clone()),
    );
    h.online();
    h.enqueue(OperationType::Vote, b"v", Priority::High);

    let orchestrator = Arc::clone(&h.orchestrator);
    let first = tokio::spawn(async move { orchestrator.start_sync(SyncRequest::forced()).await });
    tokio::time::timeout(WAIT, gate.started.notified()).await.unwrap();

    assert!(matches!(
        h.orchestrator.status(),
        OrchestratorStatus::Syncing { .. }
    ));
    assert!(matches!(
        h.orchestrator.start_sync(SyncRequest::manual()).await,
        Err(SyncError::AlreadySyncing)
    ));

    let orchestrator = Arc::clone(&h.orchestrator);
    let queued = tokio::spawn(async move { orchestrator.start_sync(SyncRequest::forced()).await });
    tokio::task::yield_now().await;
    gate.release.notify_one();

    let first = tokio::time::timeout(WAIT, first).await.unwrap().unwrap().unwrap();
    let queued = tokio::time::timeout(WAIT, queued).await.unwrap().unwrap().unwrap();
    assert_eq!(first.successful, 1);
    assert_eq!(queued.outcome, Some(SessionOutcome::Completed));
    assert_eq!(queued.processed(), 0);
    assert!(queued.started_at >= first.started_at);
    assert_eq!(h.orchestrator.status(), OrchestratorStatus::Idle);
}

#[tokio::test]
async fn test_disabled_and_blocked_only_stop_unforced_passes() {
    let h = Harness::new(test_config().disabled());
    let executor = h.register(OperationType::Vote, MockExecutor::succeeding());
    h.enqueue(OperationType::Vote, b"v", Priority::High);
    h.online();

    assert!(matches!(
        h.orchestrator.start_sync(SyncRequest::manual()).await,
        Err(SyncError::Disabled)
    ));
    assert!(h.orchestrator.trigger(SyncTrigger::Periodic).await.is_none());
    assert_eq!(executor.call_count(), 0);

    let session = forced(&h).await;
    assert_eq!(session.successful, 1);
}

#[tokio::test]
async fn test_wifi_only_blocks_cellular() {
    let h = Harness::new(test_config().with_wifi_only(true));
    h.network.update(ConnectivitySignal::connected(
        ConnectionType::Cellular,
    ));
    assert!(matches!(
        h.orchestrator.start_sync(SyncRequest::manual()).await,
        Err(SyncError::Blocked(SyncBlockReason::MeteredConnection))
    ));
}

#[tokio::test]
async fn test_filter_limits_selection() {
    let h = Harness::new(test_config());
    let votes = h.register(OperationType::Vote, MockExecutor::succeeding());
    let acks = h.register(OperationType::NotificationAck, MockExecutor::succeeding());
    h.enqueue(OperationType::Vote, b"v", Priority::High);
    h.enqueue(OperationType::NotificationAck, b"a", Priority::Low);
    h.online();

    let session = h
        .orchestrator
        .start_sync(
            SyncRequest::manual().with_operation_types(vec![OperationType::NotificationAck]),
        )
        .await
        .unwrap();
    assert_eq!(session.successful, 1);
    assert_eq!(votes.call_count(), 0);
    assert_eq!(acks.call_count(), 1);

    let session = h
        .orchestrator
        .start_sync(SyncRequest::manual().with_priorities(vec![Priority::Low]))
        .await
        .unwrap();
    assert_eq!(session.processed(), 0);
}

#[tokio::test]
async fn test_session_deadline_interrupts_pass() {
    let config = test_config()
        .with_concurrency(1)
        .with_session_timeout(Duration::from_millis(50));
    let h = Harness::new(config);
    h.register(
        OperationType::Vote,
        MockExecutor::succeeding().delayed(Duration::from_millis(150)),
    );
    let first = h.enqueue(OperationType::Vote, b"1", Priority::High);
    let second = h.enqueue(OperationType::Vote, b"2", Priority::High);

    let session = forced(&h).await;

    assert_eq!(session.outcome, Some(SessionOutcome::TimedOut));
    assert_eq!(h.item(&first).status, QueueStatus::Synced);
    assert_eq!(h.item(&second).status, QueueStatus::Pending);
}

#[tokio::test]
async fn test_interrupted_items_are_recovered_at_pass_start() {
    let h = Harness::new(test_config().with_retry(RetryConfig {
        initial_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        multiplier: 1.0,
        max_retries: 3,
        jitter_factor: 0.0,
    }));
    h.register(OperationType::Vote, MockExecutor::succeeding());
    let id = h.enqueue(OperationType::Vote, b"v", Priority::High);
    // Simulates a crash mid-dispatch.
    assert!(h.queue.claim(&id).unwrap());

    let session = forced(&h).await;

    assert_eq!(session.successful, 1);
    let item = h.item(&id);
    assert_eq!(item.status, QueueStatus::Synced);
    assert_eq!(item.retry_count, 1);
}

// === Observability ===

#[tokio::test]
async fn test_events_and_status_stream() {
    let h = Harness::new(test_config());
    h.register(OperationType::Vote, MockExecutor::succeeding());
    h.register(
        OperationType::ProfileUpdate,
        MockExecutor::answering(RemoteResponse::failure(FailureKind::Unauthorized, "denied")),
    );
    h.enqueue(OperationType::Vote, b"v", Priority::High);
    h.enqueue(OperationType::ProfileUpdate, b"{}", Priority::Normal);

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    h.orchestrator
        .add_event_handler(Arc::new(CallbackHandler::new(move |event: &SyncEvent| {
            let name = match event {
                SyncEvent::SessionStarted { .. } => "started".to_string(),
                SyncEvent::BatchStarted { item_count, .. } => format!("batch:{}", item_count),
                SyncEvent::ItemCompleted { status, .. } => format!("item:{}", status),
                SyncEvent::SessionFinished(_) => "finished".to_string(),
            };
            sink.lock().push(name);
        })));
    let mut status = h.orchestrator.status_stream();

    forced(&h).await;

    assert_eq!(
        *seen.lock(),
        vec!["started", "batch:2", "item:synced", "item:failed", "finished"]
    );
    assert!(status.has_changed().unwrap());
    assert_eq!(*status.borrow_and_update(), OrchestratorStatus::Idle);
}

#[tokio::test]
async fn test_statistics_include_history() {
    let h = Harness::new(test_config());
    h.register(OperationType::NotificationAck, MockExecutor::succeeding());
    h.register(
        OperationType::Vote,
        MockExecutor::answering(RemoteResponse::failure(FailureKind::Validation, "closed")),
    );
    h.enqueue(OperationType::NotificationAck, b"1", Priority::Low);
    h.enqueue(OperationType::NotificationAck, b"2", Priority::Low);
    h.enqueue(OperationType::Vote, b"v", Priority::High);

    let before = h.orchestrator.statistics().unwrap();
    assert_eq!(before.sessions, 0);
    assert_eq!(before.pending, 3);
    assert_eq!(before.last_sync_at, None);

    forced(&h).await;
    let stats = h.orchestrator.statistics().unwrap();

    assert_eq!(stats.sessions, 1);
    assert_eq!(stats.items_synced, 2);
    assert_eq!(stats.items_failed, 1);
    assert_eq!(stats.synced, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.pending, 0);
    assert!((stats.success_rate - 2.0 / 3.0).abs() < 1e-9);
    assert!(!stats.is_syncing);
    assert!(stats.last_sync_at.is_some());

    let map = stats.to_map();
    assert_eq!(map["items_synced"], serde_json::json!(2));
    assert_eq!(map["is_syncing"], serde_json::json!(false));

    let history = h.queue.storage().recent_sessions(10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, "completed");
    assert_eq!(history[0].trigger, "manual");
}

#[tokio::test(start_paused = true)]
async fn test_periodic_trigger_runs_pass() {
    let h = Harness::new(test_config().with_background_interval(Duration::from_secs(60)));
    h.register(OperationType::Vote, MockExecutor::succeeding());
    h.online();
    let id = h.enqueue(OperationType::Vote, b"v", Priority::High);

    let mut events = h.orchestrator.subscribe_events();
    let auto = h.orchestrator.spawn_auto_sync();

    let session = loop {
        match tokio::time::timeout(Duration::from_secs(120), events.recv()).await {
            Ok(Ok(SyncEvent::SessionFinished(session))) => break session,
            Ok(Ok(_)) => continue,
            other => panic!("no periodic session: {:?}", other.map(|r| r.is_ok())),
        }
    };
    auto.abort();

    assert_eq!(session.trigger, SyncTrigger::Periodic);
    assert_eq!(h.item(&id).status, QueueStatus::Synced);
}
