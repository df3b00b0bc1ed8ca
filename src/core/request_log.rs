//! Append-only log of classified requests.
//!
//! Records are immutable once appended and are never updated or deleted
//! here; retention is external housekeeping. An append that cannot be
//! stored is a reportable error, never a silent drop. Records for the
//! same IP come back in non-decreasing timestamp order.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::RequestRecord;

/// Errors raised by the request log
#[derive(Error, Debug)]
pub enum RequestLogError {
    #[error("append could not be durably stored: {0}")]
    Append(String),
    #[error("log store unavailable: {0}")]
    Unavailable(String),
}

/// Durable, ordered store of request records
#[async_trait]
pub trait RequestLog: Send + Sync {
    /// Append one record. Failure is reportable, not swallowed.
    async fn append(&self, record: RequestRecord) -> Result<(), RequestLogError>;

    /// Records for one IP since `since`, in non-decreasing timestamp order.
    async fn query_since(
        &self,
        ip: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RequestRecord>, RequestLogError>;

    /// Per-IP request counts since `since`.
    async fn count_by_ip_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<HashMap<String, u64>, RequestLogError>;

    /// Every record since `since`, for scanner-side aggregation.
    async fn records_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<RequestRecord>, RequestLogError>;
}

/// In-process request log
#[derive(Default)]
pub struct MemoryRequestLog {
    records: RwLock<Vec<RequestRecord>>,
}

impl MemoryRequestLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestLog for MemoryRequestLog {
    async fn append(&self, record: RequestRecord) -> Result<(), RequestLogError> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn query_since(
        &self,
        ip: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RequestRecord>, RequestLogError> {
        let records = self.records.read().await;
        let mut matched: Vec<RequestRecord> = records
            .iter()
            .filter(|r| r.ip_address == ip && r.timestamp >= since)
            .cloned()
            .collect();
        matched.sort_by_key(|r| r.timestamp);
        Ok(matched)
    }

    async fn count_by_ip_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<HashMap<String, u64>, RequestLogError> {
        let records = self.records.read().await;
        let mut counts: HashMap<String, u64> = HashMap::new();
        for record in records.iter().filter(|r| r.timestamp >= since) {
            *counts.entry(record.ip_address.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn records_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<RequestRecord>, RequestLogError> {
        let records = self.records.read().await;
        let mut matched: Vec<RequestRecord> = records
            .iter()
            .filter(|r| r.timestamp >= since)
            .cloned()
            .collect();
        matched.sort_by_key(|r| r.timestamp);
        Ok(matched)
    }
}

#[cfg(test)]
pub(crate) fn record(
    ip: &str,
    timestamp: DateTime<Utc>,
    outcome: crate::models::Outcome,
) -> RequestRecord {
    RequestRecord {
        ip_address: ip.to_string(),
        timestamp,
        path: "/".to_string(),
        http_method: "GET".to_string(),
        user_agent: None,
        resolved_country: None,
        resolved_city: None,
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Outcome;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn at(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 7, 12, minute, second).unwrap()
    }

    #[tokio::test]
    async fn query_since_filters_by_ip_and_time() {
        let log = MemoryRequestLog::new();
        log.append(record("10.0.0.1", at(0, 0), Outcome::Admitted)).await.unwrap();
        log.append(record("10.0.0.2", at(0, 5), Outcome::Admitted)).await.unwrap();
        log.append(record("10.0.0.1", at(5, 0), Outcome::RateLimited)).await.unwrap();

        let since = at(1, 0);
        let matched = log.query_since("10.0.0.1", since).await.unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].outcome, Outcome::RateLimited);
    }

    #[tokio::test]
    async fn query_since_orders_by_timestamp() {
        let log = MemoryRequestLog::new();
        log.append(record("10.0.0.1", at(3, 0), Outcome::Admitted)).await.unwrap();
        log.append(record("10.0.0.1", at(1, 0), Outcome::Admitted)).await.unwrap();
        log.append(record("10.0.0.1", at(2, 0), Outcome::Admitted)).await.unwrap();

        let matched = log.query_since("10.0.0.1", at(0, 0)).await.unwrap();
        let stamps: Vec<_> = matched.iter().map(|r| r.timestamp).collect();
        let mut sorted = stamps.clone();
        sorted.sort();
        assert_eq!(stamps, sorted);
    }

    #[tokio::test]
    async fn counts_group_by_ip_within_the_window() {
        let log = MemoryRequestLog::new();
        let now = Utc::now();
        for _ in 0..3 {
            log.append(record("10.0.0.1", now, Outcome::Admitted)).await.unwrap();
        }
        log.append(record("10.0.0.2", now, Outcome::Admitted)).await.unwrap();
        // outside the window
        log.append(record("10.0.0.3", now - ChronoDuration::hours(2), Outcome::Admitted))
            .await
            .unwrap();

        let counts = log.count_by_ip_since(now - ChronoDuration::hours(1)).await.unwrap();
        assert_eq!(counts.get("10.0.0.1"), Some(&3));
        assert_eq!(counts.get("10.0.0.2"), Some(&1));
        assert_eq!(counts.get("10.0.0.3"), None);
    }
}
