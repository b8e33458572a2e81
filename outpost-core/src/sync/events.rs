// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Event System
//!
//! Sync events are published on a broadcast channel and to registered
//! callback handlers.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::session::{SyncSession, SyncTrigger};
use crate::queue::{OperationType, QueueStatus};

/// Capacity of the broadcast channel. Slow subscribers see `Lagged`.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A sync pass started.
    SessionStarted {
        session_id: String,
        trigger: SyncTrigger,
    },

    /// A batch is about to be dispatched.
    BatchStarted {
        session_id: String,
        batch_index: usize,
        item_count: usize,
    },

    /// An item finished an attempt.
    ItemCompleted {
        session_id: String,
        item_id: String,
        operation_type: OperationType,
        status: QueueStatus,
        error: Option<String>,
    },

    /// A sync pass ended.
    SessionFinished(SyncSession),
}

/// Event handler trait.
///
/// Implement this trait to receive sync events.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &SyncEvent);
}

/// Wraps a closure as an [`EventHandler`].
pub struct CallbackHandler<F>
where
    F: Fn(&SyncEvent) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackHandler<F>
where
    F: Fn(&SyncEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        CallbackHandler { callback }
    }
}

impl<F> EventHandler for CallbackHandler<F>
where
    F: Fn(&SyncEvent) + Send + Sync,
{
    fn on_event(&self, event: &SyncEvent) {
        (self.callback)(event);
    }
}

/// Fans events out to handlers and broadcast subscribers.
pub struct EventDispatcher {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
    sender: broadcast::Sender<SyncEvent>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        EventDispatcher {
            handlers: RwLock::new(Vec::new()),
            sender,
        }
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().push(handler);
    }

    pub fn clear_handlers(&self) {
        self.handlers.write().clear();
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Dispatches an event to all handlers and subscribers.
    pub fn dispatch(&self, event: SyncEvent) {
        let handlers = self.handlers.read().clone();
        for handler in &handlers {
            handler.on_event(&event);
        }
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
