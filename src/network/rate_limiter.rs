//! Per-connection command rate limiting.
//!
//! Each connection owns one limiter, so counters are keyed by command name
//! only. Unknown commands fall under the `general` limit.

use std::collections::HashMap;
use std::time::{Duration, Instant};

const GENERAL: &str = "general";
const FALLBACK_LIMIT: (Duration, u32) = (Duration::from_secs(1), 10);

pub struct RateLimiter {
    limits: HashMap<String, (Duration, u32)>,
    counters: HashMap<String, (Instant, u32)>,
}

impl RateLimiter {
    pub fn new(limits: HashMap<String, (Duration, u32)>) -> Self {
        Self {
            limits,
            counters: HashMap::new(),
        }
    }

    fn limit_for(&self, key: &str) -> (Duration, u32) {
        self.limits
            .get(key)
            .or_else(|| self.limits.get(GENERAL))
            .copied()
            .unwrap_or(FALLBACK_LIMIT)
    }

    /// Count one `key` event. Returns false once the window is full.
    pub fn check(&mut self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    fn check_at(&mut self, key: &str, now: Instant) -> bool {
        let (window, max) = self.limit_for(key);
        let bucket = if self.limits.contains_key(key) {
            key
        } else {
            GENERAL
        };

        let (last_reset, count) = self
            .counters
            .entry(bucket.to_string())
            .or_insert((now, 0));

        if now.duration_since(*last_reset) > window {
            *last_reset = now;
            *count = 0;
        }

        if *count >= max {
            false
        } else {
            *count += 1;
            true
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(crate::config::RateLimitConfig::default().windows())
    }
}
