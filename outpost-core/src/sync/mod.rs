// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sync Module
//!
//! Reconciles queued operations with the remote service.

pub mod config;
mod error;
pub mod events;
pub mod handler;
pub mod orchestrator;
pub mod retry;
pub mod session;

pub use config::{ConfigError, RetryConfig, SyncConfig};
pub use error::SyncError;
pub use events::{CallbackHandler, EventDispatcher, EventHandler, SyncEvent};
pub use handler::{
    ExecutorRegistry, FailureKind, RemoteConflict, RemoteExecutor, RemoteRequest, RemoteResponse,
    SyncHandler, SyncResult,
};
pub use orchestrator::{SyncOrchestrator, SyncRequest, SyncStatistics};
pub use retry::RetryDecision;
pub use session::{
    BatchStatus, OrchestratorStatus, SessionOutcome, SyncBatch, SyncSession, SyncTrigger,
};
