// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bounded retry and polling.
//!
//! One helper for every wait in the installer: environment liveness,
//! artifact downloads and service readiness. Nothing here ever blocks longer
//! than the policy allows.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Attempt count and spacing for a bounded loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub attempts: u32,
    /// Delay after a failed attempt.
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    /// Multiply the delay by this factor after each failure (1 = fixed).
    #[serde(default = "default_backoff")]
    pub backoff: u32,
}

fn default_backoff() -> u32 {
    1
}

impl RetryPolicy {
    pub const fn fixed(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts,
            interval,
            backoff: 1,
        }
    }

    pub const fn exponential(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts,
            interval,
            backoff: 2,
        }
    }

    fn effective_attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    /// Delay before attempt `n + 1`, given `n` failures so far (n >= 1).
    fn delay_after(&self, failures: u32) -> Duration {
        let factor = self.backoff.max(1).saturating_pow(failures.saturating_sub(1));
        self.interval.saturating_mul(factor)
    }

    /// Upper bound on total sleeping time.
    pub fn max_total_delay(&self) -> Duration {
        (1..self.effective_attempts())
            .map(|n| self.delay_after(n))
            .fold(Duration::ZERO, |acc, d| acc.saturating_add(d))
    }
}

/// Call `predicate` until it returns true or the attempts run out.
///
/// Returns whether the predicate ever succeeded. Never errors.
pub fn poll_until<F>(policy: &RetryPolicy, mut predicate: F) -> bool
where
    F: FnMut(u32) -> bool,
{
    let attempts = policy.effective_attempts();
    for attempt in 1..=attempts {
        if predicate(attempt) {
            return true;
        }
        if attempt < attempts {
            tracing::debug!(attempt, attempts, "poll not satisfied, sleeping");
            thread::sleep(policy.delay_after(attempt));
        }
    }
    false
}

/// Call `op` until it succeeds or the attempts run out, returning the last
/// error on exhaustion.
pub fn retry<T, E, F>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Result<T, E>,
    E: std::fmt::Display,
{
    let attempts = policy.effective_attempts();
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                tracing::warn!(attempt, attempts, error = %e, "attempt failed, retrying");
                thread::sleep(policy.delay_after(attempt));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("interval must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
