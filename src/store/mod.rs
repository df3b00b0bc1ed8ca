//! Shared-store contracts for the request-security monitor.
//!
//! Rate windows and suspicious-IP flags are the two shared-mutation points
//! in the system; both stores must provide atomic per-key read-modify-write.
//! The in-memory backends serve single-instance deployments and tests, the
//! Redis backend shares counters across processes.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{FlagUpdate, SuspiciousIp};

/// Errors raised by the shared stores
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Atomic per-key counter store backing the rate limiter.
///
/// An increment and its expiry are the only operations the limiter needs;
/// expired keys are lazily collected by the backend.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key`, creating it with the given time-to-live,
    /// and return the post-increment count.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;

    /// Remove a counter, resetting the window for its key.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Keyed store of suspicious-IP flags and the manual blocklist.
///
/// The scanner is the only writer of flags; administrative block/unblock
/// are the only other mutations. `apply` commits a whole scan's staged
/// updates atomically so a failed scan never leaves partial state.
#[async_trait]
pub trait FlagStore: Send + Sync {
    /// Whether the IP must be rejected outright.
    async fn is_blocked(&self, ip: &str) -> Result<bool, StoreError>;

    /// Active flags for one IP, at most one per detection type.
    async fn flags_for(&self, ip: &str) -> Result<Vec<SuspiciousIp>, StoreError>;

    /// All active flags.
    async fn all_flags(&self) -> Result<Vec<SuspiciousIp>, StoreError>;

    /// Commit one scan's staged updates in a single batch. Upserts are
    /// keyed by (ip, detection_type); `block = true` sets `is_blocked`,
    /// `block = false` leaves the stored value untouched.
    async fn apply(&self, updates: Vec<FlagUpdate>) -> Result<(), StoreError>;

    /// Manually block an IP. Returns false if it was already blocked.
    async fn block(&self, ip: &str, reason: Option<String>) -> Result<bool, StoreError>;

    /// Manually unblock an IP: removes the manual entry and clears
    /// `is_blocked` on every flag for it. Returns false if it was not
    /// blocked. This is the only path by which a blocked IP is released.
    async fn unblock(&self, ip: &str) -> Result<bool, StoreError>;

    /// Number of currently blocked IPs (manual entries plus blocked flags).
    async fn blocked_count(&self) -> Result<u64, StoreError>;
}
