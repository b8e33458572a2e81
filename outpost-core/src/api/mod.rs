// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Outpost API Layer
//!
//! Wires the queue, key manager, network monitor, conflict policy and
//! orchestrator together behind one handle.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use outpost_core::api::OutpostBuilder;
//! use outpost_core::queue::{EnqueueOptions, OperationType, Priority};
//! use outpost_core::storage::MemoryKeyStorage;
//!
//! let outpost = OutpostBuilder::new()
//!     .database_path("outpost.db")
//!     .key_storage(Arc::new(MemoryKeyStorage::new()))
//!     .executor(OperationType::Vote, Arc::new(VoteExecutor::new(client)))
//!     .build()?;
//!
//! outpost.enqueue(
//!     OperationType::Vote,
//!     br#"{"candidate":"c-7"}"#,
//!     EnqueueOptions::with_priority(Priority::High),
//! )?;
//! let session = outpost.start_sync(SyncRequest::manual()).await?;
//! ```

mod error;
mod outpost;

pub use error::{OutpostError, OutpostResult};
pub use outpost::{Outpost, OutpostBuilder};
