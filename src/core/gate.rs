//! Per-request admission façade.
//!
//! Evaluation order: blocklist check, rate limiter, best-effort geo
//! enrichment, request-log append. Blocked IPs short-circuit before the
//! limiter so they never consume quota. The append happens for every
//! verdict so the scanner sees rejected and blocked traffic too; if it
//! fails, the already-computed verdict still stands and travels inside
//! the error.

use std::sync::Arc;

use log::warn;
use thiserror::Error;

use crate::core::geo::GeoResolver;
use crate::core::rate_limiter::{RateLimitDecision, RateLimiter};
use crate::core::request_log::{RequestLog, RequestLogError};
use crate::models::{InboundRequest, RequestRecord, Verdict};
use crate::store::FlagStore;

/// Evaluation failures surfaced to the caller
#[derive(Error, Debug)]
pub enum GateError {
    /// The record could not be stored. Losing security-relevant records
    /// silently is unacceptable, but the verdict is still honored.
    #[error("request record could not be stored: {source}")]
    Record {
        verdict: Verdict,
        #[source]
        source: RequestLogError,
    },
}

/// Façade the request-handling layer calls once per inbound request
pub struct SecurityGate {
    limiter: RateLimiter,
    geo: GeoResolver,
    log: Arc<dyn RequestLog>,
    flags: Arc<dyn FlagStore>,
}

impl SecurityGate {
    pub fn new(
        limiter: RateLimiter,
        geo: GeoResolver,
        log: Arc<dyn RequestLog>,
        flags: Arc<dyn FlagStore>,
    ) -> Self {
        Self {
            limiter,
            geo,
            log,
            flags,
        }
    }

    /// Classify one request and record it.
    pub async fn evaluate(&self, request: &InboundRequest) -> Result<Verdict, GateError> {
        let ip = request.ip_address.as_str();

        // A blocklist read failure degrades to "not blocked": the limiter
        // applies its own fail policy against the same class of store, so
        // the protective contract survives an outage.
        let blocked = match self.flags.is_blocked(ip).await {
            Ok(blocked) => blocked,
            Err(e) => {
                warn!("blocklist check failed for {}: {}", ip, e);
                false
            }
        };

        let verdict = if blocked {
            Verdict::Blocked
        } else {
            match self.limiter.check(ip, request.timestamp).await {
                RateLimitDecision::Admit => Verdict::Admit,
                RateLimitDecision::Reject => Verdict::RateLimited,
            }
        };

        // enrichment is best effort and only worth a provider round-trip
        // for admitted traffic
        let location = match verdict {
            Verdict::Admit => self.geo.resolve(ip).await,
            _ => None,
        };

        let record = RequestRecord {
            ip_address: request.ip_address.clone(),
            timestamp: request.timestamp,
            path: request.path.clone(),
            http_method: request.method.clone(),
            user_agent: request.user_agent.clone(),
            resolved_country: location.as_ref().map(|l| l.country.clone()),
            resolved_city: location.as_ref().map(|l| l.city.clone()),
            outcome: verdict.outcome(),
        };
        self.log
            .append(record)
            .await
            .map_err(|source| GateError::Record { verdict, source })?;

        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geo::{GeoError, GeoProvider, MockGeoProvider};
    use crate::core::request_log::MemoryRequestLog;
    use crate::models::{GeoConfig, GeoLocation, Outcome, RateLimitConfig};
    use crate::store::memory::{MemoryCounterStore, MemoryFlagStore};
    use crate::store::StoreError;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::HashMap;
    use std::time::Duration;

    struct SlowProvider;

    #[async_trait]
    impl GeoProvider for SlowProvider {
        async fn lookup(&self, _ip: &str) -> Result<GeoLocation, GeoError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(GeoLocation {
                country: "United States".to_string(),
                city: "Mountain View".to_string(),
            })
        }
    }

    struct DownFlags;

    #[async_trait]
    impl crate::store::FlagStore for DownFlags {
        async fn is_blocked(&self, _ip: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn flags_for(
            &self,
            _ip: &str,
        ) -> Result<Vec<crate::models::SuspiciousIp>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn all_flags(&self) -> Result<Vec<crate::models::SuspiciousIp>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn apply(&self, _updates: Vec<crate::models::FlagUpdate>) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn block(&self, _ip: &str, _reason: Option<String>) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn unblock(&self, _ip: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn blocked_count(&self) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    struct DownLog;

    #[async_trait]
    impl RequestLog for DownLog {
        async fn append(&self, _record: RequestRecord) -> Result<(), RequestLogError> {
            Err(RequestLogError::Append("disk full".into()))
        }

        async fn query_since(
            &self,
            _ip: &str,
            _since: DateTime<Utc>,
        ) -> Result<Vec<RequestRecord>, RequestLogError> {
            Err(RequestLogError::Unavailable("down".into()))
        }

        async fn count_by_ip_since(
            &self,
            _since: DateTime<Utc>,
        ) -> Result<HashMap<String, u64>, RequestLogError> {
            Err(RequestLogError::Unavailable("down".into()))
        }

        async fn records_since(
            &self,
            _since: DateTime<Utc>,
        ) -> Result<Vec<RequestRecord>, RequestLogError> {
            Err(RequestLogError::Unavailable("down".into()))
        }
    }

    fn request(ip: &str) -> InboundRequest {
        InboundRequest {
            ip_address: ip.to_string(),
            path: "/login".to_string(),
            method: "POST".to_string(),
            user_agent: Some("curl/8.0".to_string()),
            timestamp: Utc.with_ymd_and_hms(2025, 9, 7, 12, 0, 30).unwrap(),
        }
    }

    fn geo_config() -> GeoConfig {
        GeoConfig {
            timeout_ms: 50,
            ..GeoConfig::default()
        }
    }

    fn gate_with(
        quota: u32,
        providers: Vec<Box<dyn GeoProvider>>,
        log: Arc<dyn RequestLog>,
        flags: Arc<dyn crate::store::FlagStore>,
    ) -> SecurityGate {
        let limiter = RateLimiter::new(
            Arc::new(MemoryCounterStore::new()),
            RateLimitConfig {
                window_seconds: 60,
                quota,
                fail_open: false,
            },
        );
        let geo = GeoResolver::with_providers(providers, &geo_config());
        SecurityGate::new(limiter, geo, log, flags)
    }

    fn located_provider() -> Box<dyn GeoProvider> {
        let mut provider = MockGeoProvider::new();
        provider.expect_lookup().returning(|_| {
            Ok(GeoLocation {
                country: "Germany".to_string(),
                city: "Berlin".to_string(),
            })
        });
        Box::new(provider)
    }

    #[tokio::test]
    async fn admits_then_rate_limits_over_quota() {
        let log = Arc::new(MemoryRequestLog::new());
        let gate = gate_with(
            5,
            vec![located_provider()],
            log.clone(),
            Arc::new(MemoryFlagStore::new()),
        );
        let req = request("10.0.0.1");

        for _ in 0..5 {
            assert_eq!(gate.evaluate(&req).await.unwrap(), Verdict::Admit);
        }
        assert_eq!(gate.evaluate(&req).await.unwrap(), Verdict::RateLimited);

        // every evaluation was recorded with the verdict it returned
        let records = log.query_since("10.0.0.1", req.timestamp).await.unwrap();
        assert_eq!(records.len(), 6);
        assert_eq!(
            records.iter().filter(|r| r.outcome == Outcome::Admitted).count(),
            5
        );
        assert_eq!(records[5].outcome, Outcome::RateLimited);
    }

    #[tokio::test]
    async fn admitted_records_carry_geo_enrichment() {
        let log = Arc::new(MemoryRequestLog::new());
        let gate = gate_with(
            5,
            vec![located_provider()],
            log.clone(),
            Arc::new(MemoryFlagStore::new()),
        );
        let req = request("10.0.0.1");

        gate.evaluate(&req).await.unwrap();

        let records = log.query_since("10.0.0.1", req.timestamp).await.unwrap();
        assert_eq!(records[0].resolved_country.as_deref(), Some("Germany"));
        assert_eq!(records[0].resolved_city.as_deref(), Some("Berlin"));
    }

    #[tokio::test]
    async fn geo_timeout_still_admits_with_unknown_location() {
        let log = Arc::new(MemoryRequestLog::new());
        let gate = gate_with(
            5,
            vec![Box::new(SlowProvider)],
            log.clone(),
            Arc::new(MemoryFlagStore::new()),
        );
        let req = request("8.8.8.8");

        assert_eq!(gate.evaluate(&req).await.unwrap(), Verdict::Admit);

        let records = log.query_since("8.8.8.8", req.timestamp).await.unwrap();
        assert_eq!(records[0].resolved_country, None);
        assert_eq!(records[0].outcome, Outcome::Admitted);
    }

    #[tokio::test]
    async fn blocked_ip_is_rejected_without_consuming_quota() {
        let log = Arc::new(MemoryRequestLog::new());
        let flags = Arc::new(MemoryFlagStore::new());
        flags.block("203.0.113.9", None).await.unwrap();

        let gate = gate_with(1, vec![located_provider()], log.clone(), flags.clone());
        let req = request("203.0.113.9");

        assert_eq!(gate.evaluate(&req).await.unwrap(), Verdict::Blocked);
        assert_eq!(gate.evaluate(&req).await.unwrap(), Verdict::Blocked);

        // blocked evaluations never touched the rate window: after an
        // unblock the single-request quota is still available
        flags.unblock("203.0.113.9").await.unwrap();
        assert_eq!(gate.evaluate(&req).await.unwrap(), Verdict::Admit);

        let records = log.query_since("203.0.113.9", req.timestamp).await.unwrap();
        assert_eq!(records[0].outcome, Outcome::Blocked);
        assert_eq!(records[1].outcome, Outcome::Blocked);
        assert_eq!(records[2].outcome, Outcome::Admitted);
    }

    #[tokio::test]
    async fn blocklist_outage_degrades_to_not_blocked() {
        let log = Arc::new(MemoryRequestLog::new());
        let gate = gate_with(5, vec![located_provider()], log, Arc::new(DownFlags));
        let req = request("10.0.0.1");

        assert_eq!(gate.evaluate(&req).await.unwrap(), Verdict::Admit);
    }

    #[tokio::test]
    async fn append_failure_reports_but_honors_the_verdict() {
        let gate = gate_with(
            5,
            vec![located_provider()],
            Arc::new(DownLog),
            Arc::new(MemoryFlagStore::new()),
        );
        let req = request("10.0.0.1");

        match gate.evaluate(&req).await {
            Err(GateError::Record { verdict, .. }) => assert_eq!(verdict, Verdict::Admit),
            other => panic!("expected record error, got {:?}", other),
        }
    }
}
