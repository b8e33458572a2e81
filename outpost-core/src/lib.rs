// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Outpost Core Library
//!
//! Offline-first reconciliation engine: user operations are sealed into a
//! durable local queue and synced with the remote service when the network
//! allows, with retry/backoff and per-operation conflict policies.
//! All cryptographic operations use the audited `ring` crate.

pub mod api;
pub mod conflict;
pub mod crypto;
pub mod network;
pub mod queue;
pub mod storage;
pub mod sync;
pub mod time;

pub use api::{Outpost, OutpostBuilder, OutpostError, OutpostResult};
pub use conflict::{ConflictPolicy, ConflictRule, ConflictStrategy, Outcome};
pub use crypto::{CipherError, EncryptedBlob, KeyManager, SymmetricKey};
pub use network::{
    ConnectionType, ConnectivitySignal, NetworkMonitor, NetworkQuality, NetworkStatus,
    SyncBlockReason,
};
pub use queue::{
    EnqueueOptions, OperationType, Priority, QueueFilter, QueueItem, QueueStats, QueueStatus,
    QueueStore,
};
pub use storage::{FileKeyStorage, MemoryKeyStorage, SecureStorage, Storage, StorageError};
pub use sync::{
    OrchestratorStatus, RemoteExecutor, RemoteResponse, SyncConfig, SyncError, SyncEvent,
    SyncOrchestrator, SyncRequest, SyncSession,
};
