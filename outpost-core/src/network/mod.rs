// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Network Module
//!
//! Connectivity classification and the monitor that decides whether a sync
//! is worth attempting.

mod monitor;
mod status;

pub use monitor::NetworkMonitor;
pub use status::{
    classify_quality, ConnectionType, ConnectivitySignal, NetworkPolicy, NetworkQuality,
    NetworkStatus, SyncBlockReason,
};
