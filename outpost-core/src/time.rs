// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Wall-clock helpers. All persisted timestamps are Unix milliseconds.

use std::time::Duration;

/// Returns the current Unix timestamp in milliseconds.
/// Falls back to 0 if the system clock is before UNIX_EPOCH.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Adds a duration to a millisecond timestamp, saturating on overflow.
pub fn add_duration(timestamp: u64, duration: Duration) -> u64 {
    timestamp.saturating_add(duration.as_millis().min(u64::MAX as u128) as u64)
}
