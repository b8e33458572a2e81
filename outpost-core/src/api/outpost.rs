// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Outpost facade and builder.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::info;

use super::error::{OutpostError, OutpostResult};
use crate::conflict::ConflictPolicy;
use crate::crypto::{KeyGeneration, KeyManager};
use crate::network::{ConnectivitySignal, NetworkMonitor, NetworkStatus};
use crate::queue::{EnqueueOptions, OperationType, QueueItem, QueueStats, QueueStatus, QueueStore};
use crate::storage::{SecureStorage, Storage};
use crate::sync::{
    EventHandler, ExecutorRegistry, OrchestratorStatus, RemoteExecutor, SyncConfig, SyncEvent,
    SyncHandler, SyncOrchestrator, SyncRequest, SyncSession, SyncStatistics,
};

/// Offline-first operation queue with encrypted storage and background sync.
pub struct Outpost {
    queue: Arc<QueueStore>,
    network: Arc<NetworkMonitor>,
    executors: Arc<ExecutorRegistry>,
    policy: Arc<ConflictPolicy>,
    orchestrator: Arc<SyncOrchestrator>,
    auto_sync: Mutex<Option<JoinHandle<()>>>,
}

impl Outpost {
    // === Capture ===

    /// Seals and queues an operation. Returns the item id.
    pub fn enqueue(
        &self,
        operation_type: OperationType,
        payload: &[u8],
        options: EnqueueOptions,
    ) -> OutpostResult<String> {
        Ok(self.queue.enqueue(operation_type, payload, options)?)
    }

    pub fn get_item(&self, id: &str) -> OutpostResult<QueueItem> {
        self.queue
            .get_by_id(id)?
            .ok_or_else(|| OutpostError::NotFound(id.to_string()))
    }

    pub fn items_by_status(&self, status: QueueStatus) -> OutpostResult<Vec<QueueItem>> {
        Ok(self.queue.get_by_status(status)?)
    }

    pub fn get_queue_stats(&self) -> OutpostResult<QueueStats> {
        Ok(self.queue.stats()?)
    }

    /// Deletes synced, failed and expired items older than `age`.
    pub fn purge_finished(&self, age: Duration) -> OutpostResult<usize> {
        Ok(self.queue.purge_terminal(age)?)
    }

    // === Sync ===

    pub async fn start_sync(&self, request: SyncRequest) -> OutpostResult<SyncSession> {
        Ok(self.orchestrator.start_sync(request).await?)
    }

    pub fn cancel_sync(&self) -> bool {
        self.orchestrator.cancel_sync()
    }

    pub fn sync_status(&self) -> OrchestratorStatus {
        self.orchestrator.status()
    }

    pub fn status_stream(&self) -> watch::Receiver<OrchestratorStatus> {
        self.orchestrator.status_stream()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.orchestrator.subscribe_events()
    }

    pub fn add_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.orchestrator.add_event_handler(handler);
    }

    pub fn statistics(&self) -> OutpostResult<SyncStatistics> {
        Ok(self.orchestrator.statistics()?)
    }

    pub fn register_executor(
        &self,
        operation_type: OperationType,
        executor: Arc<dyn RemoteExecutor>,
    ) {
        self.executors.register(operation_type, executor);
    }

    pub fn config(&self) -> SyncConfig {
        self.orchestrator.config()
    }

    pub fn update_config(&self, config: SyncConfig) -> OutpostResult<()> {
        Ok(self.orchestrator.update_config(config)?)
    }

    pub fn conflict_policy(&self) -> &Arc<ConflictPolicy> {
        &self.policy
    }

    /// Starts the background trigger loop. Must be called inside a Tokio
    /// runtime. Calling it again while running is a no-op.
    pub fn start_auto_sync(&self) {
        let mut handle = self.auto_sync.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        *handle = Some(self.orchestrator.spawn_auto_sync());
        info!("auto sync started");
    }

    pub fn stop_auto_sync(&self) {
        if let Some(handle) = self.auto_sync.lock().take() {
            handle.abort();
            info!("auto sync stopped");
        }
    }

    // === Network ===

    pub fn network_status(&self) -> NetworkStatus {
        self.network.current()
    }

    pub fn network_updates(&self) -> watch::Receiver<NetworkStatus> {
        self.network.subscribe()
    }

    pub fn network_stream(&self) -> impl Stream<Item = NetworkStatus> + Send + 'static {
        self.network.status_stream()
    }

    /// Reports a connectivity change from the platform.
    pub fn report_connectivity(&self, signal: ConnectivitySignal) -> NetworkStatus {
        self.network.update(signal)
    }

    /// Feeds a platform connectivity stream into the monitor.
    pub fn attach_connectivity<S>(&self, signals: S) -> JoinHandle<()>
    where
        S: Stream<Item = ConnectivitySignal> + Send + 'static,
    {
        self.network.attach(signals)
    }

    // === Keys ===

    pub fn rotate_keys(&self) -> OutpostResult<KeyGeneration> {
        Ok(self.queue.keys().rotate_keys()?)
    }

    /// Erases retired key generations no unsynced item still needs.
    pub fn cleanup_old_keys(&self) -> OutpostResult<Vec<String>> {
        Ok(self.queue.cleanup_old_keys()?)
    }

    pub fn key_generations(&self) -> Vec<KeyGeneration> {
        self.queue.keys().generations()
    }
}

impl Drop for Outpost {
    fn drop(&mut self) {
        if let Some(handle) = self.auto_sync.get_mut().take() {
            handle.abort();
        }
    }
}

enum Database {
    Memory,
    Path(PathBuf),
}

/// Builder for [`Outpost`].
pub struct OutpostBuilder {
    config: SyncConfig,
    database: Database,
    key_storage: Option<Arc<dyn SecureStorage>>,
    network: Option<Arc<NetworkMonitor>>,
    executors: Vec<(OperationType, Arc<dyn RemoteExecutor>)>,
}

impl OutpostBuilder {
    /// Creates a builder with the production preset and an in-memory database.
    pub fn new() -> Self {
        OutpostBuilder {
            config: SyncConfig::default(),
            database: Database::Memory,
            key_storage: None,
            network: None,
            executors: Vec::new(),
        }
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Stores the queue in a SQLite file at `path`.
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database = Database::Path(path.into());
        self
    }

    pub fn in_memory(mut self) -> Self {
        self.database = Database::Memory;
        self
    }

    /// Where key material lives. Defaults to the platform keyring when the
    /// `secure-storage` feature is enabled.
    pub fn key_storage(mut self, storage: Arc<dyn SecureStorage>) -> Self {
        self.key_storage = Some(storage);
        self
    }

    /// Shares an existing network monitor.
    pub fn network_monitor(mut self, monitor: Arc<NetworkMonitor>) -> Self {
        self.network = Some(monitor);
        self
    }

    pub fn executor(
        mut self,
        operation_type: OperationType,
        executor: Arc<dyn RemoteExecutor>,
    ) -> Self {
        self.executors.push((operation_type, executor));
        self
    }

    /// Opens storage and key material and wires the components.
    pub fn build(self) -> OutpostResult<Outpost> {
        self.config.validate()?;

        let storage = Arc::new(match &self.database {
            Database::Memory => Storage::in_memory()?,
            Database::Path(path) => Storage::open(path)?,
        });
        let key_storage = match self.key_storage {
            Some(storage) => storage,
            None => default_key_storage()?,
        };
        let keys = Arc::new(KeyManager::open(
            key_storage,
            self.config.key_rotation_interval,
        )?);
        let queue = Arc::new(QueueStore::new(
            storage,
            keys,
            self.config.queue_settings(),
        ));

        let executors = Arc::new(ExecutorRegistry::new());
        for (operation_type, executor) in self.executors {
            executors.register(operation_type, executor);
        }

        let policy = Arc::new(ConflictPolicy::with_overrides(
            &self.config.conflict_overrides()?,
        ));
        let handler = Arc::new(SyncHandler::new(
            Arc::clone(&queue),
            Arc::clone(&executors),
            Arc::clone(&policy),
        ));
        let network = self
            .network
            .unwrap_or_else(|| Arc::new(NetworkMonitor::default()));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::clone(&queue),
            handler,
            Arc::clone(&network),
            self.config,
        )?);

        Ok(Outpost {
            queue,
            network,
            executors,
            policy,
            orchestrator,
            auto_sync: Mutex::new(None),
        })
    }
}

impl Default for OutpostBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "secure-storage")]
fn default_key_storage() -> OutpostResult<Arc<dyn SecureStorage>> {
    Ok(Arc::new(crate::storage::PlatformKeyring::new("outpost")))
}

#[cfg(not(feature = "secure-storage"))]
fn default_key_storage() -> OutpostResult<Arc<dyn SecureStorage>> {
    Err(OutpostError::Configuration(
        "no key storage configured; pass one to OutpostBuilder::key_storage".to_string(),
    ))
}
