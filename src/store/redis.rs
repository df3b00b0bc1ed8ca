//! Redis-backed counter store.
//!
//! Rate windows are plain Redis counters: INCR on the window key, EXPIRE
//! set on first increment so abandoned windows collect themselves. INCR is
//! atomic server-side, which gives the per-key serialization the rate
//! limiter requires across processes.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::store::{CounterStore, StoreError};

pub struct RedisCounterStore {
    client: redis::Client,
}

impl RedisCounterStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let mut conn = self.client.get_async_connection().await?;

        let count: u64 = conn.incr(key, 1).await?;

        if count == 1 {
            let _: () = conn.expire(key, ttl.as_secs() as usize).await?;
        }

        Ok(count)
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.client.get_async_connection().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }
}
