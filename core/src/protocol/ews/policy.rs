/*
 * policy.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Tagliacarte, a cross-platform email client.
 *
 * Tagliacarte is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Tagliacarte is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Tagliacarte.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Retry policy shared by every request made through one protocol instance.
//!
//! Two flavours: fail-fast (scripts; the first non-200 response is an error) and fault
//! tolerance (long-running tasks; ride out throttling and outages up to `max_wait`). The
//! cool-down deadline is the only state shared between concurrent requests. It only moves
//! forward: a shorter cool-down requested while a longer one is pending is ignored.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

/// Cool-down applied when the server asks us to back off without saying for how long.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(60);
/// Default patience of the fault-tolerance policy.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(3600);

#[derive(Debug)]
pub struct RetryPolicy {
    fail_fast: bool,
    max_wait: Duration,
    back_off_until: Mutex<Option<Instant>>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fail_fast()
    }
}

impl RetryPolicy {
    /// Never retry; surface the first failed response.
    pub fn fail_fast() -> Self {
        Self {
            fail_fast: true,
            max_wait: Duration::ZERO,
            back_off_until: Mutex::new(None),
        }
    }

    /// Retry recoverable failures until the total wait for one request exceeds `max_wait`.
    pub fn fault_tolerance(max_wait: Duration) -> Self {
        Self {
            fail_fast: false,
            max_wait,
            back_off_until: Mutex::new(None),
        }
    }

    pub fn is_fail_fast(&self) -> bool {
        self.fail_fast
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// The pending cool-down deadline, or None if there is none or it has passed.
    pub fn back_off_until(&self) -> Option<Instant> {
        let mut guard = self.lock();
        match *guard {
            Some(until) if until > Instant::now() => Some(until),
            Some(_) => {
                *guard = None;
                None
            }
            None => None,
        }
    }

    /// Time left until the cool-down deadline, if one is pending.
    pub fn remaining_back_off(&self) -> Option<Duration> {
        self.back_off_until()
            .map(|until| until.saturating_duration_since(Instant::now()))
    }

    /// Request a cool-down of `duration` from now (`DEFAULT_BACKOFF` if None). Never shortens
    /// a cool-down that is already pending.
    pub fn back_off(&self, duration: Option<Duration>) {
        let until = Instant::now() + duration.unwrap_or(DEFAULT_BACKOFF);
        let mut guard = self.lock();
        match *guard {
            Some(current) if current >= until => {}
            _ => *guard = Some(until),
        }
    }

    /// Drop any pending cool-down.
    pub fn clear_back_off(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> MutexGuard<'_, Option<Instant>> {
        // The guarded value is a plain timestamp; a panic elsewhere cannot leave it half-written.
        self.back_off_until.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn back_off_is_monotonic() {
        let policy = RetryPolicy::fault_tolerance(Duration::from_secs(600));
        policy.back_off(Some(Duration::from_secs(40)));
        let first = policy.back_off_until().unwrap();
        policy.back_off(Some(Duration::from_secs(10)));
        assert_eq!(policy.back_off_until(), Some(first));
        policy.back_off(Some(Duration::from_secs(90)));
        assert!(policy.back_off_until().unwrap() > first);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_back_off_reads_as_none() {
        let policy = RetryPolicy::fault_tolerance(Duration::from_secs(600));
        policy.back_off(Some(Duration::from_secs(5)));
        assert_eq!(policy.remaining_back_off(), Some(Duration::from_secs(5)));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(policy.back_off_until(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn default_back_off_and_clear() {
        let policy = RetryPolicy::default();
        assert!(policy.is_fail_fast());
        policy.back_off(None);
        assert_eq!(policy.remaining_back_off(), Some(DEFAULT_BACKOFF));
        policy.clear_back_off();
        assert_eq!(policy.back_off_until(), None);
    }

    #[test]
    fn shared_between_threads() {
        let policy = std::sync::Arc::new(RetryPolicy::fault_tolerance(DEFAULT_MAX_WAIT));
        let handles: Vec<_> = (1..=8u64)
            .map(|i| {
                let p = policy.clone();
                std::thread::spawn(move || p.back_off(Some(Duration::from_secs(i * 100))))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let remaining = policy.remaining_back_off().unwrap();
        assert!(remaining > Duration::from_secs(700));
    }
}
