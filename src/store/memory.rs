//! In-process store backends.
//!
//! Counters live in a `DashMap` whose entry API serializes concurrent
//! increments on the same key without a global lock. Flag state sits behind
//! a single `RwLock` so a scan's batch commit is atomic with respect to
//! readers and to administrative block/unblock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::models::{DetectionType, FlagUpdate, SuspiciousIp};
use crate::store::{CounterStore, FlagStore, StoreError};

#[derive(Debug)]
struct CounterCell {
    count: u64,
    expires_at: Instant,
}

/// Each rate window mints a fresh key, so expired cells pile up unless
/// something drops them. Every `SWEEP_EVERY` increments the store retains
/// only the cells still inside their TTL.
const SWEEP_EVERY: u64 = 1024;

/// Counter store keeping rate windows in process memory.
#[derive(Default)]
pub struct MemoryCounterStore {
    cells: DashMap<String, CounterCell>,
    ops: AtomicU64,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.cells.len()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let now = Instant::now();
        if self.ops.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.cells.retain(|_, cell| cell.expires_at > now);
        }
        let mut cell = self
            .cells
            .entry(key.to_string())
            .or_insert_with(|| CounterCell {
                count: 0,
                expires_at: now + ttl,
            });
        if cell.expires_at <= now {
            cell.count = 0;
            cell.expires_at = now + ttl;
        }
        cell.count += 1;
        Ok(cell.count)
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.cells.remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct ManualBlock {
    reason: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct FlagState {
    flags: HashMap<(String, DetectionType), SuspiciousIp>,
    manual: HashMap<String, ManualBlock>,
}

/// Flag store keeping suspicious-IP state in process memory.
#[derive(Default)]
pub struct MemoryFlagStore {
    state: RwLock<FlagState>,
}

impl MemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlagStore for MemoryFlagStore {
    async fn is_blocked(&self, ip: &str) -> Result<bool, StoreError> {
        let state = self.state.read().await;
        if state.manual.contains_key(ip) {
            return Ok(true);
        }
        Ok(state
            .flags
            .iter()
            .any(|((addr, _), flag)| addr == ip && flag.is_blocked))
    }

    async fn flags_for(&self, ip: &str) -> Result<Vec<SuspiciousIp>, StoreError> {
        let state = self.state.read().await;
        let mut flags: Vec<SuspiciousIp> = state
            .flags
            .iter()
            .filter(|((addr, _), _)| addr == ip)
            .map(|(_, flag)| flag.clone())
            .collect();
        flags.sort_by_key(|f| f.flagged_at);
        Ok(flags)
    }

    async fn all_flags(&self) -> Result<Vec<SuspiciousIp>, StoreError> {
        let state = self.state.read().await;
        Ok(state.flags.values().cloned().collect())
    }

    async fn apply(&self, updates: Vec<FlagUpdate>) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        for update in updates {
            let key = (update.ip_address.clone(), update.detection_type);
            match state.flags.get_mut(&key) {
                Some(existing) => {
                    existing.flagged_at = update.flagged_at;
                    existing.details = update.details;
                    // blocking is monotonic until manual intervention
                    existing.is_blocked = existing.is_blocked || update.block;
                }
                None => {
                    state.flags.insert(
                        key,
                        SuspiciousIp {
                            ip_address: update.ip_address,
                            detection_type: update.detection_type,
                            flagged_at: update.flagged_at,
                            is_blocked: update.block,
                            details: update.details,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    async fn block(&self, ip: &str, reason: Option<String>) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        if state.manual.contains_key(ip) {
            return Ok(false);
        }
        state.manual.insert(
            ip.to_string(),
            ManualBlock {
                reason,
                created_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn unblock(&self, ip: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let had_manual = match state.manual.remove(ip) {
            Some(entry) => {
                log::info!(
                    "released manual block on {} (created {}, reason: {})",
                    ip,
                    entry.created_at,
                    entry.reason.as_deref().unwrap_or("none given")
                );
                true
            }
            None => false,
        };
        let mut cleared = false;
        for ((addr, _), flag) in state.flags.iter_mut() {
            if addr == ip && flag.is_blocked {
                flag.is_blocked = false;
                cleared = true;
            }
        }
        Ok(had_manual || cleared)
    }

    async fn blocked_count(&self) -> Result<u64, StoreError> {
        let state = self.state.read().await;
        let mut blocked: Vec<&str> = state.manual.keys().map(String::as_str).collect();
        for ((addr, _), flag) in state.flags.iter() {
            if flag.is_blocked {
                blocked.push(addr);
            }
        }
        blocked.sort_unstable();
        blocked.dedup();
        Ok(blocked.len() as u64)
    }
}
