// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use super::config::RetryConfig;

/// What to do with an item after a retryable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`.
    Retry { delay: Duration },
    /// Retries are exhausted; the item fails.
    GiveUp,
}

impl RetryConfig {
    /// Un-jittered delay after the attempt numbered `retry_count` (0-based):
    /// `min(max_delay, initial_delay * multiplier^retry_count)`.
    pub fn base_delay(&self, retry_count: u32) -> Duration {
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    /// Base delay randomized by `± jitter_factor`.
    pub fn delay_with_jitter<R: Rng + ?Sized>(&self, retry_count: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(retry_count);
        if self.jitter_factor <= 0.0 || base.is_zero() {
            return base;
        }
        let spread = rng.gen_range(-self.jitter_factor..=self.jitter_factor);
        base.mul_f64((1.0 + spread).max(0.0))
    }

    pub fn next_delay(&self, retry_count: u32) -> Duration {
        self.delay_with_jitter(retry_count, &mut rand::thread_rng())
    }

    /// Decides the fate of an item that has already failed `retry_count`
    /// times before this failure.
    pub fn decide(&self, retry_count: u32, max_retries: u32) -> RetryDecision {
        if retry_count.saturating_add(1) >= max_retries {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry {
                delay: self.next_delay(retry_count),
            }
        }
    }
}
