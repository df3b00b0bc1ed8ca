//! Fixed-window rate limiting.
//!
//! Each client key gets one counter per window bucket
//! (bucket = floor(unix_seconds / window_seconds)). The counter store
//! serializes increments on a key, so the quota check never races past
//! itself for sequential callers; a burst straddling a window boundary may
//! admit up to twice the quota, which is the documented approximation of
//! the fixed-window scheme.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::warn;

use crate::models::RateLimitConfig;
use crate::store::CounterStore;
use crate::utils::format_window_key;

/// Admit/reject decision for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Admit,
    Reject,
}

/// Rate limiter over a shared counter store
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    /// Decide whether the request identified by `client_key` at `now` is
    /// within quota. If the counter store is unreachable the decision
    /// follows the configured fail-open/fail-closed policy instead of
    /// propagating the error.
    pub async fn check(&self, client_key: &str, now: DateTime<Utc>) -> RateLimitDecision {
        let window = i64::from(self.config.window_seconds).max(1);
        let bucket = now.timestamp().div_euclid(window);
        let key = format_window_key(client_key, bucket);

        // counters outlive their window by one length so a boundary
        // straggler still hits its own bucket before collection
        let ttl = Duration::from_secs(u64::from(self.config.window_seconds) * 2);

        match self.store.incr(&key, ttl).await {
            Ok(count) if count > u64::from(self.config.quota) => RateLimitDecision::Reject,
            Ok(_) => RateLimitDecision::Admit,
            Err(e) => {
                warn!(
                    "counter store unreachable for {}: {}; failing {}",
                    client_key,
                    e,
                    if self.config.fail_open { "open" } else { "closed" }
                );
                if self.config.fail_open {
                    RateLimitDecision::Admit
                } else {
                    RateLimitDecision::Reject
                }
            }
        }
    }

    /// Drop the active window for a key, re-admitting it immediately.
    pub async fn reset(&self, client_key: &str, now: DateTime<Utc>) {
        let window = i64::from(self.config.window_seconds).max(1);
        let bucket = now.timestamp().div_euclid(window);
        let key = format_window_key(client_key, bucket);
        if let Err(e) = self.store.remove(&key).await {
            warn!("failed to reset rate window for {}: {}", client_key, e);
        }
    }
}
