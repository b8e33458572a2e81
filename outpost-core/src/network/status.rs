// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Network status model and classification.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Signal strength (percent) below which a link is poor.
pub const POOR_SIGNAL_PERCENT: u8 = 25;
/// Signal strength (percent) below which a link is at most moderate.
pub const MODERATE_SIGNAL_PERCENT: u8 = 50;
/// Latency above which a link is poor.
pub const POOR_LATENCY_MS: u32 = 1000;
/// Latency above which a link is at most moderate.
pub const MODERATE_LATENCY_MS: u32 = 300;
/// Latency below which a good link is promoted to excellent.
pub const EXCELLENT_LATENCY_MS: u32 = 50;
/// Throughput below which a link is poor.
pub const POOR_BANDWIDTH_KBPS: u32 = 256;
/// Throughput below which a link is at most moderate.
pub const MODERATE_BANDWIDTH_KBPS: u32 = 1500;

/// Interface class reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    #[default]
    None,
    Wifi,
    Cellular,
    Ethernet,
    Other,
}

/// Qualitative link quality, ordered from worst to best.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum NetworkQuality {
    #[default]
    Offline,
    Poor,
    Moderate,
    Good,
    Excellent,
}

impl NetworkQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkQuality::Offline => "offline",
            NetworkQuality::Poor => "poor",
            NetworkQuality::Moderate => "moderate",
            NetworkQuality::Good => "good",
            NetworkQuality::Excellent => "excellent",
        }
    }
}

impl fmt::Display for NetworkQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a sync is not recommended right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncBlockReason {
    Offline,
    PoorQuality,
    MeteredConnection,
    NotCharging,
}

impl fmt::Display for SyncBlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SyncBlockReason::Offline => "device is offline",
            SyncBlockReason::PoorQuality => "connection quality is too low",
            SyncBlockReason::MeteredConnection => "connection is metered and sync is Wi-Fi only",
            SyncBlockReason::NotCharging => "device is not charging",
        };
        f.write_str(text)
    }
}

/// Raw connectivity observation from the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivitySignal {
    pub connected: bool,
    pub connection_type: ConnectionType,
    /// Platform-reported metered flag. Cellular links count as metered regardless.
    pub metered: bool,
    /// Signal strength in percent, if the platform reports one.
    pub signal_strength: Option<u8>,
    pub latency_ms: Option<u32>,
    pub bandwidth_kbps: Option<u32>,
    /// `None` when the platform cannot tell; treated as not charging.
    pub is_charging: Option<bool>,
}

impl ConnectivitySignal {
    pub fn offline() -> Self {
        ConnectivitySignal::default()
    }

    pub fn connected(connection_type: ConnectionType) -> Self {
        ConnectivitySignal {
            connected: true,
            connection_type,
            ..Default::default()
        }
    }

    pub fn with_signal_strength(mut self, percent: u8) -> Self {
        self.signal_strength = Some(percent.min(100));
        self
    }

    pub fn with_latency(mut self, latency_ms: u32) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    pub fn with_bandwidth(mut self, kbps: u32) -> Self {
        self.bandwidth_kbps = Some(kbps);
        self
    }

    pub fn with_metered(mut self, metered: bool) -> Self {
        self.metered = metered;
        self
    }

    pub fn with_charging(mut self, charging: bool) -> Self {
        self.is_charging = Some(charging);
        self
    }
}

/// Device-side conditions a sync must satisfy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkPolicy {
    pub wifi_only: bool,
    pub requires_charging: bool,
}

/// Point-in-time assessment of the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub connected: bool,
    pub connection_type: ConnectionType,
    pub quality: NetworkQuality,
    pub metered: bool,
    pub signal_strength: Option<u8>,
    pub latency_ms: Option<u32>,
    pub bandwidth_kbps: Option<u32>,
    pub sync_recommended: bool,
    pub sync_block_reason: Option<SyncBlockReason>,
    pub observed_at: u64,
}

impl NetworkStatus {
    /// Builds a status from a raw signal under `policy`.
    pub fn assess(signal: &ConnectivitySignal, policy: NetworkPolicy, now: u64) -> Self {
        let quality = classify_quality(signal);
        let metered = signal.metered || signal.connection_type == ConnectionType::Cellular;

        let sync_block_reason = if quality == NetworkQuality::Offline {
            Some(SyncBlockReason::Offline)
        } else if quality < NetworkQuality::Moderate {
            Some(SyncBlockReason::PoorQuality)
        } else if policy.wifi_only && metered {
            Some(SyncBlockReason::MeteredConnection)
        } else if policy.requires_charging && signal.is_charging != Some(true) {
            Some(SyncBlockReason::NotCharging)
        } else {
            None
        };

        NetworkStatus {
            connected: quality != NetworkQuality::Offline,
            connection_type: signal.connection_type,
            quality,
            metered,
            signal_strength: signal.signal_strength,
            latency_ms: signal.latency_ms,
            bandwidth_kbps: signal.bandwidth_kbps,
            sync_recommended: sync_block_reason.is_none(),
            sync_block_reason,
            observed_at: now,
        }
    }

    pub fn offline(now: u64) -> Self {
        NetworkStatus::assess(&ConnectivitySignal::offline(), NetworkPolicy::default(), now)
    }
}

/// Derives link quality from interface type and optional measurements.
///
/// Measurements can only lower the base quality of the interface, except that
/// very low latency promotes a good link to excellent. Anything unknown
/// degrades to `Poor`.
pub fn classify_quality(signal: &ConnectivitySignal) -> NetworkQuality {
    if !signal.connected || signal.connection_type == ConnectionType::None {
        return NetworkQuality::Offline;
    }

    let mut quality = match signal.connection_type {
        ConnectionType::Ethernet => NetworkQuality::Excellent,
        ConnectionType::Wifi => NetworkQuality::Good,
        ConnectionType::Cellular => NetworkQuality::Moderate,
        ConnectionType::Other | ConnectionType::None => NetworkQuality::Poor,
    };

    if let Some(strength) = signal.signal_strength {
        if strength < POOR_SIGNAL_PERCENT {
            quality = quality.min(NetworkQuality::Poor);
        } else if strength < MODERATE_SIGNAL_PERCENT {
            quality = quality.min(NetworkQuality::Moderate);
        }
    }

    if let Some(latency) = signal.latency_ms {
        if latency > POOR_LATENCY_MS {
            quality = quality.min(NetworkQuality::Poor);
        } else if latency > MODERATE_LATENCY_MS {
            quality = quality.min(NetworkQuality::Moderate);
        } else if latency < EXCELLENT_LATENCY_MS && quality == NetworkQuality::Good {
            quality = NetworkQuality::Excellent;
        }
    }

    if let Some(bandwidth) = signal.bandwidth_kbps {
        if bandwidth < POOR_BANDWIDTH_KBPS {
            quality = quality.min(NetworkQuality::Poor);
        } else if bandwidth < MODERATE_BANDWIDTH_KBPS {
            quality = quality.min(NetworkQuality::Moderate);
        }
    }

    quality
}
