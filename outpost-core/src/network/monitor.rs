// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Network Condition Monitor
//!
//! Turns raw connectivity signals into [`NetworkStatus`] values and publishes
//! them on a watch channel. The last value is always available through
//! [`NetworkMonitor::current`].

use std::sync::Arc;

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::status::{ConnectivitySignal, NetworkPolicy, NetworkStatus};
use crate::time::now_millis;

/// Publishes the current network assessment.
pub struct NetworkMonitor {
    sender: watch::Sender<NetworkStatus>,
    state: Mutex<MonitorState>,
}

struct MonitorState {
    signal: ConnectivitySignal,
    policy: NetworkPolicy,
}

impl NetworkMonitor {
    /// Creates a monitor that starts out offline.
    pub fn new(policy: NetworkPolicy) -> Self {
        let signal = ConnectivitySignal::offline();
        let status = NetworkStatus::assess(&signal, policy, now_millis());
        let (sender, _) = watch::channel(status);
        NetworkMonitor {
            sender,
            state: Mutex::new(MonitorState { signal, policy }),
        }
    }

    /// Latest assessment.
    pub fn current(&self) -> NetworkStatus {
        self.sender.borrow().clone()
    }

    /// Receiver that observes every published assessment.
    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.sender.subscribe()
    }

    /// Stream of assessments published after the call.
    pub fn status_stream(&self) -> impl Stream<Item = NetworkStatus> + Send + 'static {
        let receiver = self.sender.subscribe();
        futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.changed().await.ok()?;
            let status = receiver.borrow_and_update().clone();
            Some((status, receiver))
        })
    }

    /// Records a new connectivity observation and publishes the assessment.
    pub fn update(&self, signal: ConnectivitySignal) -> NetworkStatus {
        let mut state = self.state.lock();
        state.signal = signal;
        self.publish(&state)
    }

    /// Replaces the device policy and re-assesses the last signal.
    pub fn set_policy(&self, policy: NetworkPolicy) -> NetworkStatus {
        let mut state = self.state.lock();
        state.policy = policy;
        self.publish(&state)
    }

    pub fn policy(&self) -> NetworkPolicy {
        self.state.lock().policy
    }

    /// Feeds a platform connectivity stream into the monitor until the
    /// stream ends.
    pub fn attach<S>(self: &Arc<Self>, signals: S) -> JoinHandle<()>
    where
        S: Stream<Item = ConnectivitySignal> + Send + 'static,
    {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            futures::pin_mut!(signals);
            while let Some(signal) = signals.next().await {
                monitor.update(signal);
            }
            debug!("connectivity signal stream ended");
        })
    }

    fn publish(&self, state: &MonitorState) -> NetworkStatus {
        let status = NetworkStatus::assess(&state.signal, state.policy, now_millis());
        let previous = self.sender.send_replace(status.clone());
        if previous.quality != status.quality
            || previous.sync_recommended != status.sync_recommended
        {
            debug!(
                quality = %status.quality,
                sync_recommended = status.sync_recommended,
                block_reason = ?status.sync_block_reason,
                "network status changed"
            );
        }
        status
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        NetworkMonitor::new(NetworkPolicy::default())
    }
}
