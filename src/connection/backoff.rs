// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Reconnect backoff.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::ReconnectPolicy;

/// Exponential backoff with an attempt ceiling.
///
/// Delay for attempt `n` (1-based) is `base * 2^(n-1)`, capped at the
/// policy's maximum, optionally spread by +/-25% jitter. Jittered delays
/// never drop below the previous one, so the sequence only grows until it
/// sits at the ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
    last: Duration,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            last: Duration::ZERO,
        }
    }

    /// Consecutive failures since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a failure and return the delay before the next attempt, or
    /// `None` once the retry ceiling is passed.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts > self.policy.max_retries {
            return None;
        }
        let delay = self.jittered(self.base_delay(self.attempts)).max(self.last);
        self.last = delay;
        Some(delay)
    }

    /// Un-jittered delay for a given 1-based attempt.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay_ms = self
            .policy
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.policy.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// Delay before reconnecting after a live connection degraded.
    pub fn degraded_delay(&self) -> Duration {
        self.jittered(self.base_delay(1))
    }

    /// Called once the connection reaches Ready.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last = Duration::ZERO;
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.policy.jitter {
            return delay;
        }
        apply_jitter(delay, Duration::from_millis(self.policy.max_delay_ms))
    }
}

/// Spread `delay` by +/-25%, never exceeding `max`.
fn apply_jitter(delay: Duration, max: Duration) -> Duration {
    let ms = delay.as_millis() as u64;
    let range = ms / 4;
    if range == 0 {
        return delay;
    }
    let offset = rand_jitter() % (2 * range + 1);
    Duration::from_millis(ms - range + offset).min(max)
}

/// Cheap entropy from the clock; reconnect jitter needs no real randomness.
fn rand_jitter() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: bool) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            max_retries: 6,
            jitter,
        }
    }

    #[test]
    fn test_delays_non_decreasing_to_ceiling() {
        let mut backoff = Backoff::new(policy(false));
        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay()).collect();

        assert_eq!(
            delays,
            [100, 200, 400, 800, 1_000, 1_000].map(Duration::from_millis).to_vec()
        );
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_gives_up_past_ceiling() {
        let mut backoff = Backoff::new(ReconnectPolicy {
            max_retries: 2,
            ..policy(false)
        });
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert_eq!(backoff.attempts(), 3);
    }

    #[test]
    fn test_reset_after_ready() {
        let mut backoff = Backoff::new(policy(false));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let mut backoff = Backoff::new(policy(true));
        for attempt in 1..=6 {
            let delay = backoff.next_delay().unwrap();
            let base = backoff.base_delay(attempt).as_millis() as u64;
            let ms = delay.as_millis() as u64;
            assert!(ms >= base - base / 4, "attempt {attempt}: {ms} < band");
            assert!(ms <= (base + base / 4).min(1_000), "attempt {attempt}: {ms} > band");
        }
    }

    #[test]
    fn test_jittered_delays_non_decreasing() {
        let policy = ReconnectPolicy {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            max_retries: 12,
            jitter: true,
        };
        for _ in 0..200 {
            let mut backoff = Backoff::new(policy.clone());
            let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay()).collect();
            assert_eq!(delays.len(), 12);
            assert!(delays.windows(2).all(|w| w[0] <= w[1]), "{:?}", delays);
            assert!(delays.iter().all(|d| *d <= Duration::from_millis(30_000)));
        }
    }

    #[test]
    fn test_reset_clears_floor() {
        let mut backoff = Backoff::new(policy(true));
        for _ in 0..6 {
            backoff.next_delay();
        }
        backoff.reset();
        let first = backoff.next_delay().unwrap();
        assert!(first <= Duration::from_millis(125), "{:?}", first);
    }

    #[test]
    fn test_huge_attempt_saturates() {
        let backoff = Backoff::new(policy(false));
        assert_eq!(backoff.base_delay(200), Duration::from_millis(1_000));
    }
}
