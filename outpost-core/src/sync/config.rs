// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sync configuration and presets.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use thiserror::Error;

use crate::conflict::ConflictRule;
use crate::crypto::DEFAULT_ROTATION_INTERVAL;
use crate::network::NetworkPolicy;
use crate::queue::{OperationType, Priority, QueueSettings};

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Exponential backoff settings.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub initial_delay: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Attempts before an item is marked failed.
    pub max_retries: u32,
    /// Relative randomization applied to each delay, in `[0, 1]`.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            max_retries: 5,
            jitter_factor: 0.2,
        }
    }
}

/// Orchestrator configuration.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    /// Skip automatic syncs on metered connections.
    pub wifi_only: bool,
    /// Skip automatic syncs unless the device is charging.
    pub requires_charging: bool,
    pub max_batch_size: usize,
    /// Per-item deadline for the remote call.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub sync_timeout: Duration,
    /// Pause between batches.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub batch_delay: Duration,
    pub max_concurrent_syncs: usize,
    /// Deadline for a whole sync pass.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub session_timeout: Duration,
    pub retry: RetryConfig,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub background_sync_interval: Duration,
    /// Selection order, highest first.
    pub priority_order: Vec<Priority>,
    /// Conflict rule overrides keyed by operation type name.
    pub conflict_rules: HashMap<String, ConflictRule>,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub key_rotation_interval: Duration,
    pub max_queue_size: usize,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub default_ttl: Option<Duration>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            wifi_only: false,
            requires_charging: false,
            max_batch_size: 20,
            sync_timeout: Duration::from_secs(30),
            batch_delay: Duration::from_millis(500),
            max_concurrent_syncs: 3,
            session_timeout: Duration::from_secs(600),
            retry: RetryConfig::default(),
            background_sync_interval: Duration::from_secs(15 * 60),
            priority_order: Priority::ALL.to_vec(),
            conflict_rules: HashMap::new(),
            key_rotation_interval: DEFAULT_ROTATION_INTERVAL,
            max_queue_size: 1000,
            default_ttl: None,
        }
    }
}

impl SyncConfig {
    /// Balanced settings for release builds.
    pub fn production() -> Self {
        Self::default()
    }

    /// Short timeouts and fast retries for local development.
    pub fn development() -> Self {
        Self {
            max_batch_size: 5,
            sync_timeout: Duration::from_secs(10),
            batch_delay: Duration::ZERO,
            max_concurrent_syncs: 1,
            session_timeout: Duration::from_secs(120),
            retry: RetryConfig {
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(5),
                multiplier: 2.0,
                max_retries: 3,
                jitter_factor: 0.0,
            },
            background_sync_interval: Duration::from_secs(60),
            ..Self::default()
        }
    }

    /// Syncs rarely, in large batches, on Wi-Fi while charging.
    pub fn battery_optimized() -> Self {
        Self {
            wifi_only: true,
            requires_charging: true,
            max_batch_size: 50,
            batch_delay: Duration::from_secs(2),
            max_concurrent_syncs: 2,
            retry: RetryConfig {
                initial_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(30 * 60),
                ..RetryConfig::default()
            },
            background_sync_interval: Duration::from_secs(60 * 60),
            ..Self::default()
        }
    }

    /// Parses a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.max_batch_size == 0 {
            return invalid("max_batch_size must be at least 1");
        }
        if self.max_concurrent_syncs == 0 {
            return invalid("max_concurrent_syncs must be at least 1");
        }
        if self.sync_timeout.is_zero() || self.session_timeout.is_zero() {
            return invalid("timeouts must be non-zero");
        }
        if self.background_sync_interval.is_zero() {
            return invalid("background_sync_interval must be non-zero");
        }
        if self.max_queue_size == 0 {
            return invalid("max_queue_size must be at least 1");
        }
        if !(self.retry.multiplier >= 1.0 && self.retry.multiplier.is_finite()) {
            return invalid("retry.multiplier must be a finite value >= 1");
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return invalid("retry.jitter_factor must be within [0, 1]");
        }
        if self.retry.max_delay < self.retry.initial_delay {
            return invalid("retry.max_delay must not be below retry.initial_delay");
        }
        if self.retry.max_retries == 0 {
            return invalid("retry.max_retries must be at least 1");
        }
        let lists_each_once = self.priority_order.len() == Priority::ALL.len()
            && Priority::ALL
                .iter()
                .all(|p| self.priority_order.iter().filter(|q| *q == p).count() == 1);
        if !lists_each_once {
            return invalid("priority_order must list every priority exactly once");
        }
        self.conflict_overrides()?;
        Ok(())
    }

    /// Conflict overrides keyed by parsed operation type.
    pub fn conflict_overrides(&self) -> Result<HashMap<OperationType, ConflictRule>, ConfigError> {
        self.conflict_rules
            .iter()
            .map(|(name, rule)| {
                name.parse::<OperationType>()
                    .map(|op| (op, *rule))
                    .map_err(ConfigError::Invalid)
            })
            .collect()
    }

    pub fn network_policy(&self) -> NetworkPolicy {
        NetworkPolicy {
            wifi_only: self.wifi_only,
            requires_charging: self.requires_charging,
        }
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            default_max_retries: self.retry.max_retries,
            max_queue_size: self.max_queue_size,
            default_ttl: self.default_ttl,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_wifi_only(mut self, wifi_only: bool) -> Self {
        self.wifi_only = wifi_only;
        self
    }

    pub fn with_requires_charging(mut self, requires_charging: bool) -> Self {
        self.requires_charging = requires_charging;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn with_concurrency(mut self, max_concurrent_syncs: usize) -> Self {
        self.max_concurrent_syncs = max_concurrent_syncs;
        self
    }

    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_background_interval(mut self, interval: Duration) -> Self {
        self.background_sync_interval = interval;
        self
    }

    pub fn with_priority_order(mut self, order: Vec<Priority>) -> Self {
        self.priority_order = order;
        self
    }

    pub fn with_conflict_rule(
        mut self,
        operation_type: &OperationType,
        rule: ConflictRule,
    ) -> Self {
        self.conflict_rules
            .insert(operation_type.as_str().to_string(), rule);
        self
    }

    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn with_key_rotation_interval(mut self, interval: Duration) -> Self {
        self.key_rotation_interval = interval;
        self
    }
}
