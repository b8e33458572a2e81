// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sync Orchestrator
//!
//! Runs sync passes: selects eligible items in priority order, splits them
//! into batches, dispatches them with bounded concurrency and records the
//! session. Only one pass runs at a time. Network transitions and the
//! background timer both go through [`SyncOrchestrator::trigger`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::config::SyncConfig;
use super::error::SyncError;
use super::events::{EventDispatcher, EventHandler, SyncEvent};
use super::handler::SyncHandler;
use super::session::{
    BatchStatus, OrchestratorStatus, SessionOutcome, SyncBatch, SyncSession, SyncTrigger,
};
use crate::conflict::ConflictPolicy;
use crate::network::NetworkMonitor;
use crate::queue::{OperationType, Priority, QueueFilter, QueueItem, QueueStatus, QueueStore};
use crate::time::{add_duration, now_millis};

/// Parameters of one `start_sync` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub filter: QueueFilter,
    /// Wait for a running pass instead of failing, and ignore the `enabled`
    /// flag and the network recommendation.
    pub force: bool,
    pub trigger: SyncTrigger,
}

impl SyncRequest {
    pub fn manual() -> Self {
        SyncRequest {
            filter: QueueFilter::default(),
            force: false,
            trigger: SyncTrigger::Manual,
        }
    }

    pub fn forced() -> Self {
        SyncRequest {
            force: true,
            ..Self::manual()
        }
    }

    pub fn triggered_by(trigger: SyncTrigger) -> Self {
        SyncRequest {
            trigger,
            ..Self::manual()
        }
    }

    pub fn with_operation_types(mut self, types: Vec<OperationType>) -> Self {
        self.filter.operation_types = Some(types);
        self
    }

    pub fn with_priorities(mut self, priorities: Vec<Priority>) -> Self {
        self.filter.priorities = Some(priorities);
        self
    }
}

/// Aggregate sync statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatistics {
    pub sessions: u64,
    pub items_synced: u64,
    pub items_failed: u64,
    pub last_sync_at: Option<u64>,
    pub pending: usize,
    pub processing: usize,
    pub synced: usize,
    pub failed: usize,
    pub expired: usize,
    pub success_rate: f64,
    pub is_syncing: bool,
}

impl SyncStatistics {
    /// Flat key/value view for display layers.
    pub fn to_map(&self) -> BTreeMap<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        }
    }
}

/// Coordinates sync passes.
pub struct SyncOrchestrator {
    queue: Arc<QueueStore>,
    handler: Arc<SyncHandler>,
    network: Arc<NetworkMonitor>,
    config: RwLock<SyncConfig>,
    run_lock: Mutex<()>,
    cancel_requested: AtomicBool,
    status: watch::Sender<OrchestratorStatus>,
    events: EventDispatcher,
}

impl SyncOrchestrator {
    pub fn new(
        queue: Arc<QueueStore>,
        handler: Arc<SyncHandler>,
        network: Arc<NetworkMonitor>,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        network.set_policy(config.network_policy());
        let (status, _) = watch::channel(OrchestratorStatus::Idle);
        Ok(SyncOrchestrator {
            queue,
            handler,
            network,
            config: RwLock::new(config),
            run_lock: Mutex::new(()),
            cancel_requested: AtomicBool::new(false),
            status,
            events: EventDispatcher::new(),
        })
    }

    pub fn config(&self) -> SyncConfig {
        self.config.read().clone()
    }

    /// Replaces the configuration. Takes effect at the next pass; conflict
    /// rule overrides are swapped in immediately.
    pub fn update_config(&self, config: SyncConfig) -> Result<(), SyncError> {
        config.validate()?;
        let overrides = config.conflict_overrides()?;
        let mut rules = ConflictPolicy::default_rules();
        rules.extend(overrides);
        self.handler.policy().replace_rules(rules);
        self.network.set_policy(config.network_policy());
        *self.config.write() = config;
        Ok(())
    }

    pub fn status(&self) -> OrchestratorStatus {
        self.status.borrow().clone()
    }

    pub fn status_stream(&self) -> watch::Receiver<OrchestratorStatus> {
        self.status.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn add_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.events.add_handler(handler);
    }

    pub fn is_syncing(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// Asks the running pass to stop dispatching. In-flight items finish.
    /// Returns false if no pass was running.
    pub fn cancel_sync(&self) -> bool {
        if !self.is_syncing() {
            return false;
        }
        self.cancel_requested.store(true, Ordering::SeqCst);
        info!("sync cancellation requested");
        true
    }

    /// Runs one sync pass.
    pub async fn start_sync(&self, request: SyncRequest) -> Result<SyncSession, SyncError> {
        let _running = if request.force {
            self.run_lock.lock().await
        } else {
            self.run_lock
                .try_lock()
                .map_err(|_| SyncError::AlreadySyncing)?
        };

        let result = self.run_locked(request).await;
        // Cleared while the lock is still held so a request never outlives
        // the pass it was aimed at.
        self.cancel_requested.store(false, Ordering::SeqCst);
        result
    }

    /// Body of a pass. The caller holds `run_lock`; a cancellation requested
    /// at any point after the lock was taken applies to this pass.
    async fn run_locked(&self, request: SyncRequest) -> Result<SyncSession, SyncError> {
        let config = self.config();
        if !request.force {
            if !config.enabled {
                return Err(SyncError::Disabled);
            }
            let network = self.network.current();
            if let Some(reason) = network.sync_block_reason {
                return Err(SyncError::Blocked(reason));
            }
        }

        let mut session = SyncSession::start(request.trigger, now_millis());
        self.status.send_replace(OrchestratorStatus::Syncing {
            session_id: session.id.clone(),
        });
        self.events.dispatch(SyncEvent::SessionStarted {
            session_id: session.id.clone(),
            trigger: request.trigger,
        });
        info!(
            session_id = %session.id,
            trigger = %request.trigger,
            force = request.force,
            "sync session started"
        );

        let outcome = match self.prepare(&request, &config) {
            Ok(items) => self.run_batches(&mut session, items, &config).await,
            Err(e) => {
                error!(session_id = %session.id, error = %e, "sync session aborted");
                session.push_error(e.to_string());
                SessionOutcome::Aborted
            }
        };

        self.finish(&mut session, outcome);
        Ok(session)
    }

    /// Single entry point for automatic triggers. Rotates keys when due and
    /// starts a non-forced pass; skipped passes are not errors.
    pub async fn trigger(&self, trigger: SyncTrigger) -> Option<SyncSession> {
        match self.queue.rotate_keys_if_due() {
            Ok(true) => info!("rotated queue encryption key"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "key rotation failed"),
        }

        match self.start_sync(SyncRequest::triggered_by(trigger)).await {
            Ok(session) => Some(session),
            Err(e @ (SyncError::AlreadySyncing | SyncError::Disabled | SyncError::Blocked(_))) => {
                debug!(trigger = %trigger, reason = %e, "sync trigger skipped");
                None
            }
            Err(e) => {
                warn!(trigger = %trigger, error = %e, "triggered sync failed");
                None
            }
        }
    }

    /// Spawns the background loop that turns network recoveries and the
    /// periodic timer into triggers.
    pub fn spawn_auto_sync(self: &Arc<Self>) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        let interval = self.config().background_sync_interval;
        // Subscribe before spawning so no transition is missed.
        let mut network = self.network.subscribe();
        let mut was_recommended = network.borrow_and_update().sync_recommended;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                let trigger = tokio::select! {
                    changed = network.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let recommended = network.borrow_and_update().sync_recommended;
                        let restored = recommended && !was_recommended;
                        was_recommended = recommended;
                        if !restored {
                            continue;
                        }
                        SyncTrigger::NetworkRestored
                    }
                    _ = ticker.tick() => SyncTrigger::Periodic,
                };
                debug!(trigger = %trigger, "auto sync trigger");
                orchestrator.trigger(trigger).await;
            }
            debug!("auto sync loop stopped");
        })
    }

    /// Queue and key statistics plus recorded session totals.
    pub fn statistics(&self) -> Result<SyncStatistics, SyncError> {
        let stats = self.queue.stats()?;
        let totals = self.queue.storage().history_totals()?;
        Ok(SyncStatistics {
            sessions: totals.sessions,
            items_synced: totals.successful,
            items_failed: totals.failed,
            last_sync_at: totals.last_ended_at,
            pending: stats.count(QueueStatus::Pending),
            processing: stats.count(QueueStatus::Processing),
            synced: stats.count(QueueStatus::Synced),
            failed: stats.count(QueueStatus::Failed),
            expired: stats.count(QueueStatus::Expired),
            success_rate: stats.success_rate,
            is_syncing: self.is_syncing(),
        })
    }

    /// Housekeeping before selection, then the eligible items in order.
    fn prepare(
        &self,
        request: &SyncRequest,
        config: &SyncConfig,
    ) -> Result<Vec<QueueItem>, SyncError> {
        let recovered = self.queue.recover_interrupted()?;
        if recovered > 0 {
            warn!(count = recovered, "recovered items left in processing");
        }
        self.queue.clean_expired()?;
        let items = self
            .queue
            .eligible(now_millis(), &request.filter, &config.priority_order)?;
        Ok(items)
    }

    async fn run_batches(
        &self,
        session: &mut SyncSession,
        items: Vec<QueueItem>,
        config: &SyncConfig,
    ) -> SessionOutcome {
        let session_deadline = add_duration(session.started_at, config.session_timeout);
        let per_batch = config
            .sync_timeout
            .saturating_mul(u32::try_from(config.max_batch_size).unwrap_or(u32::MAX));
        let mut batches = items.chunks(config.max_batch_size).enumerate().peekable();

        while let Some((index, chunk)) = batches.next() {
            if self.is_cancelled() {
                return SessionOutcome::Cancelled;
            }
            if now_millis() >= session_deadline {
                warn!(session_id = %session.id, "sync session timed out");
                return SessionOutcome::TimedOut;
            }

            let deadline = add_duration(now_millis(), per_batch).min(session_deadline);
            let mut batch = SyncBatch::new(
                index,
                chunk.iter().map(|item| item.id.clone()).collect(),
                deadline,
            );
            self.events.dispatch(SyncEvent::BatchStarted {
                session_id: session.id.clone(),
                batch_index: index,
                item_count: batch.len(),
            });
            debug!(session_id = %session.id, batch = index, items = batch.len(), "batch started");

            self.run_batch(session, &mut batch, chunk.to_vec(), config)
                .await;

            if batch.status == BatchStatus::Interrupted {
                return if self.is_cancelled() {
                    SessionOutcome::Cancelled
                } else {
                    SessionOutcome::TimedOut
                };
            }

            if batches.peek().is_some() && !config.batch_delay.is_zero() {
                tokio::time::sleep(config.batch_delay).await;
            }
        }

        if self.is_cancelled() {
            SessionOutcome::Cancelled
        } else {
            SessionOutcome::Completed
        }
    }

    async fn run_batch(
        &self,
        session: &mut SyncSession,
        batch: &mut SyncBatch,
        items: Vec<QueueItem>,
        config: &SyncConfig,
    ) {
        batch.status = BatchStatus::Running;
        let permits = Arc::new(Semaphore::new(config.max_concurrent_syncs));
        let mut in_flight = JoinSet::new();

        for mut item in items {
            // Dispatch order follows selection order; a permit frees up when
            // an earlier item completes.
            let permit = match Arc::clone(&permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            if self.is_cancelled() || batch.is_past_deadline(now_millis()) {
                batch.status = BatchStatus::Interrupted;
                break;
            }

            match self.queue.claim(&item.id) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(item_id = %item.id, "item no longer pending, skipped");
                    continue;
                }
                Err(e) => {
                    session.push_error(format!("{}: {}", item.id, e));
                    continue;
                }
            }
            item.status = QueueStatus::Processing;

            let handler = Arc::clone(&self.handler);
            let timeout = config.sync_timeout;
            let retry = config.retry;
            in_flight.spawn(async move {
                let _permit = permit;
                handler.execute(item, timeout, retry).await
            });
        }

        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok(result) => {
                    session.record(&result);
                    self.events.dispatch(SyncEvent::ItemCompleted {
                        session_id: session.id.clone(),
                        item_id: result.item_id.clone(),
                        operation_type: result.operation_type.clone(),
                        status: result.final_status,
                        error: result.error.as_ref().map(|e| e.to_string()),
                    });
                }
                Err(e) => {
                    error!(session_id = %session.id, error = %e, "item task panicked");
                    session.push_error(format!("item task failed: {}", e));
                }
            }
        }

        if batch.status == BatchStatus::Running {
            batch.status = BatchStatus::Completed;
        }
    }

    fn finish(&self, session: &mut SyncSession, outcome: SessionOutcome) {
        session.close(outcome, now_millis());

        if let Err(e) = self.queue.storage().record_session(&session.to_record()) {
            error!(session_id = %session.id, error = %e, "failed to record sync session");
            session.push_error(format!("session history: {}", e));
        }

        if outcome == SessionOutcome::Completed {
            match self.queue.cleanup_old_keys() {
                Ok(erased) if !erased.is_empty() => {
                    info!(count = erased.len(), "erased retired key generations")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "key cleanup failed"),
            }
        }

        let status = match outcome {
            SessionOutcome::Aborted => OrchestratorStatus::Error {
                message: session.errors.first().cloned().unwrap_or_default(),
            },
            _ => OrchestratorStatus::Idle,
        };
        self.status.send_replace(status);

        info!(
            session_id = %session.id,
            outcome = %outcome,
            successful = session.successful,
            failed = session.failed,
            retried = session.retried,
            "sync session finished"
        );
        self.events.dispatch(SyncEvent::SessionFinished(session.clone()));
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }
}
