//! Per-host probe pacing. The limiter is an explicit value owned by the
//! labeler run, with an injectable clock so pacing decisions are testable
//! without sleeping.

use std::collections::HashMap;
use std::time::{Duration, Instant};

pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Enforces a minimum interval between requests to the same host.
/// Distinct hosts never delay each other.
pub struct HostRateLimiter<C: Clock = SystemClock> {
    min_interval: Duration,
    last_hit: HashMap<String, Instant>,
    clock: C,
}

impl HostRateLimiter<SystemClock> {
    pub fn new(min_interval: Duration) -> Self {
        Self::with_clock(min_interval, SystemClock)
    }
}

impl<C: Clock> HostRateLimiter<C> {
    pub fn with_clock(min_interval: Duration, clock: C) -> Self {
        Self {
            min_interval,
            last_hit: HashMap::new(),
            clock,
        }
    }

    /// How long the caller must wait before hitting `host`, and record the
    /// hit as happening after that wait. Zero when the host is cold or the
    /// interval has already elapsed.
    pub fn reserve(&mut self, host: &str) -> Duration {
        let now = self.clock.now();
        let wait = match self.last_hit.get(host) {
            Some(&last) => {
                let elapsed = now.duration_since(last);
                self.min_interval.saturating_sub(elapsed)
            }
            None => Duration::ZERO,
        };
        self.last_hit.insert(host.to_string(), now + wait);
        wait
    }
}

/// Host part of a URL, lowercased. `https://a.example.ro/x?y` → `a.example.ro`.
/// Unparseable URLs fall back to the whole string so they still rate-limit
/// against themselves.
pub fn host_of(url: &str) -> String {
    let rest = url
        .split_once("://")
        .map(|(_, r)| r)
        .unwrap_or(url);
    let host = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(rest);
    host.to_ascii_lowercase()
}
