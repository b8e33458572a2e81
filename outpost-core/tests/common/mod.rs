// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Common Test Utilities
//!
//! Shared fixtures, mock executors and strategies.

#![allow(dead_code)]

pub mod strategies;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use outpost_core::crypto::KeyManager;
use outpost_core::network::{ConnectionType, ConnectivitySignal, NetworkMonitor};
use outpost_core::queue::{
    EnqueueOptions, OperationType, Priority, QueueItem, QueueSettings, QueueStore,
};
use outpost_core::storage::{MemoryKeyStorage, Storage};
use outpost_core::sync::{
    ExecutorRegistry, RemoteExecutor, RemoteRequest, RemoteResponse, SyncConfig, SyncHandler,
    SyncOrchestrator,
};
use outpost_core::ConflictPolicy;

/// Installs a tracing subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn key_manager() -> Arc<KeyManager> {
    Arc::new(
        KeyManager::open(
            Arc::new(MemoryKeyStorage::new()),
            outpost_core::crypto::DEFAULT_ROTATION_INTERVAL,
        )
        .unwrap(),
    )
}

pub fn test_queue() -> Arc<QueueStore> {
    test_queue_with(QueueSettings::default())
}

pub fn test_queue_with(settings: QueueSettings) -> Arc<QueueStore> {
    let storage = Arc::new(Storage::in_memory().unwrap());
    Arc::new(QueueStore::new(storage, key_manager(), settings))
}

/// Fast, deterministic settings: one item at a time, no delays or jitter.
pub fn test_config() -> SyncConfig {
    SyncConfig::development()
        .with_sync_timeout(Duration::from_secs(5))
        .with_batch_delay(Duration::ZERO)
}

pub fn wifi() -> ConnectivitySignal {
    ConnectivitySignal::connected(ConnectionType::Wifi).with_charging(true)
}

/// All components wired by hand, for tests that poke at the parts.
pub struct Harness {
    pub queue: Arc<QueueStore>,
    pub executors: Arc<ExecutorRegistry>,
    pub policy: Arc<ConflictPolicy>,
    pub handler: Arc<SyncHandler>,
    pub network: Arc<NetworkMonitor>,
    pub orchestrator: Arc<SyncOrchestrator>,
}

impl Harness {
    pub fn new(config: SyncConfig) -> Self {
        Self::with_storage(config, Arc::new(Storage::in_memory().unwrap()))
    }

    /// Wires the components over `storage`, e.g. a tempfile database.
    pub fn with_storage(config: SyncConfig, storage: Arc<Storage>) -> Self {
        let queue = Arc::new(QueueStore::new(
            storage,
            key_manager(),
            config.queue_settings(),
        ));
        let executors = Arc::new(ExecutorRegistry::new());
        let policy = Arc::new(ConflictPolicy::with_overrides(
            &config.conflict_overrides().unwrap(),
        ));
        let handler = Arc::new(SyncHandler::new(
            Arc::clone(&queue),
            Arc::clone(&executors),
            Arc::clone(&policy),
        ));
        let network = Arc::new(NetworkMonitor::default());
        let orchestrator = Arc::new(
            SyncOrchestrator::new(
                Arc::clone(&queue),
                Arc::clone(&handler),
                Arc::clone(&network),
                config,
            )
            .unwrap(),
        );
        Harness {
            queue,
            executors,
            policy,
            handler,
            network,
            orchestrator,
        }
    }

    pub fn online(&self) {
        self.network.update(wifi());
    }

    /// Registers `executor` and hands it back for inspection.
    pub fn register(
        &self,
        operation_type: OperationType,
        executor: MockExecutor,
    ) -> Arc<MockExecutor> {
        let executor = Arc::new(executor);
        self.executors.register(operation_type, executor.clone());
        executor
    }

    pub fn enqueue(
        &self,
        operation_type: OperationType,
        payload: &[u8],
        priority: Priority,
    ) -> String {
        self.queue
            .enqueue(operation_type, payload, EnqueueOptions::with_priority(priority))
            .unwrap()
    }

    pub fn item(&self, id: &str) -> QueueItem {
        self.queue.get_by_id(id).unwrap().unwrap()
    }

    /// Claims an item and returns it ready for the handler.
    pub fn claimed(&self, id: &str) -> QueueItem {
        assert!(self.queue.claim(id).unwrap());
        self.item(id)
    }
}

/// Shared record of dispatched item ids across executors.
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Pauses an executor until the test releases it.
#[derive(Default)]
pub struct Gate {
    pub started: Notify,
    pub release: Notify,
}

/// Executor that replays scripted responses and records every call.
pub struct MockExecutor {
    responses: Mutex<VecDeque<RemoteResponse>>,
    fallback: RemoteResponse,
    calls: Mutex<Vec<String>>,
    payloads: Mutex<Vec<Vec<u8>>>,
    log: Option<CallLog>,
    gate: Option<Arc<Gate>>,
    delay: Option<Duration>,
}

impl MockExecutor {
    pub fn succeeding() -> Self {
        Self::answering(RemoteResponse::ok())
    }

    /// Answers every call with `response`.
    pub fn answering(response: RemoteResponse) -> Self {
        MockExecutor {
            responses: Mutex::new(VecDeque::new()),
            fallback: response,
            calls: Mutex::new(Vec::new()),
            payloads: Mutex::new(Vec::new()),
            log: None,
            gate: None,
            delay: None,
        }
    }

    /// Answers with `script` in order, then with the fallback.
    pub fn scripted(mut self, script: Vec<RemoteResponse>) -> Self {
        self.responses = Mutex::new(script.into());
        self
    }

    pub fn logging_to(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn gated(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().clone()
    }
}

#[async_trait]
impl RemoteExecutor for MockExecutor {
    async fn execute(&self, request: &RemoteRequest) -> RemoteResponse {
        self.calls.lock().push(request.item_id.clone());
        self.payloads.lock().push(request.payload.to_vec());
        if let Some(log) = &self.log {
            log.lock().push(request.item_id.clone());
        }
        if let Some(gate) = &self.gate {
            gate.started.notify_one();
            gate.release.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.responses.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}
