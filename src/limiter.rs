use moka::sync::Cache;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LimiterSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Limited,
}

/// Fixed-window submission counter per client key.
///
/// The window opens with the first request from a key and the entry expires
/// `window` after insertion, so the next request after expiry starts a fresh
/// count. Entry creation and increments are atomic per key.
///
/// The cache has no size bound: a capacity limit would let moka's admission
/// policy drop a fresh counter, leaving that client unlimited. Memory is
/// bounded by the number of distinct clients seen within one window.
pub struct SubmissionLimiter {
    counters: Cache<String, Arc<AtomicU32>>,
    limit: u32,
    window: Duration,
}

impl SubmissionLimiter {
    pub fn new(window: Duration, limit: u32) -> Self {
        let counters = Cache::builder().time_to_live(window).build();

        Self {
            counters,
            limit,
            window,
        }
    }

    pub fn from_settings(settings: &LimiterSettings) -> Self {
        Self::new(settings.window, settings.limit)
    }

    /// Count one request for `key` and decide whether it may proceed.
    pub fn check(&self, key: &str) -> Decision {
        let counter = self
            .counters
            .get_with(key.to_string(), || Arc::new(AtomicU32::new(0)));

        let previous = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| Some(c.saturating_add(1)))
            .unwrap_or(u32::MAX);
        let count = previous.saturating_add(1);

        if count > self.limit {
            Decision::Limited
        } else {
            Decision::Allowed {
                remaining: self.limit - count,
            }
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}
