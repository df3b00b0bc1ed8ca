//! Periodic anomaly detection over the request log.
//!
//! The scan is triggered externally on a fixed cadence and guarded
//! against overlapping itself: a trigger arriving while a scan runs is
//! skipped. All flag mutations for one run are staged first and committed
//! in a single batch, so an aggregation failure aborts the run without
//! touching the flag store.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{error, info, warn};
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::core::request_log::{RequestLog, RequestLogError};
use crate::models::{DetectionType, FlagUpdate, Outcome, ScanConfig, ScanReport};
use crate::store::{FlagStore, StoreError};

/// Errors that abort a scan run
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("request log aggregation failed: {0}")]
    Log(#[from] RequestLogError),
    #[error("flag store failed: {0}")]
    Store(#[from] StoreError),
}

/// Result of one trigger
#[derive(Debug)]
pub enum ScanOutcome {
    Completed(ScanReport),
    /// A prior scan was still running
    Skipped,
}

/// Detection job aggregating the trailing window of the request log
pub struct AnomalyScanner {
    log: Arc<dyn RequestLog>,
    flags: Arc<dyn FlagStore>,
    config: ScanConfig,
    guard: Mutex<()>,
}

impl AnomalyScanner {
    pub fn new(log: Arc<dyn RequestLog>, flags: Arc<dyn FlagStore>, config: ScanConfig) -> Self {
        Self {
            log,
            flags,
            config,
            guard: Mutex::new(()),
        }
    }

    /// Run one detection pass over `[now - window, now]`.
    ///
    /// Safe under overlap: a concurrent trigger returns `Skipped`.
    /// All-or-nothing: any failure before the final commit leaves the
    /// flag store untouched, and the run is retried on the next trigger.
    pub async fn run_scan(&self, now: DateTime<Utc>) -> Result<ScanOutcome, ScanError> {
        let _guard = match self.guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                info!("scan trigger skipped, previous run still in progress");
                return Ok(ScanOutcome::Skipped);
            }
        };

        let since = now - Duration::seconds(i64::from(self.config.window_seconds));
        info!("starting anomaly scan for {} to {}", since, now);

        let counts = self.log.count_by_ip_since(since).await?;
        let records = self.log.records_since(since).await?;

        let mut report = ScanReport {
            window_start: since,
            window_end: now,
            high_volume: 0,
            geo_anomaly: 0,
            repeated_rate_limit: 0,
            newly_blocked: 0,
        };
        let mut staged: Vec<FlagUpdate> = Vec::new();

        for (ip, &count) in &counts {
            if count > self.config.high_volume_threshold {
                let block = count >= self.config.block_threshold;
                staged.push(FlagUpdate {
                    ip_address: ip.clone(),
                    detection_type: DetectionType::HighVolume,
                    flagged_at: now,
                    block,
                    details: HashMap::from([
                        ("requests_last_hour".to_string(), json!(count)),
                        ("threshold".to_string(), json!(self.config.high_volume_threshold)),
                    ]),
                });
                report.high_volume += 1;
                warn!("high volume detected: {} made {} requests", ip, count);
            }
        }

        for (ip, changes) in country_changes(&records) {
            if changes > self.config.max_country_changes {
                staged.push(FlagUpdate {
                    ip_address: ip.clone(),
                    detection_type: DetectionType::GeoAnomaly,
                    flagged_at: now,
                    // lower-confidence signal, blocking stays conservative
                    block: false,
                    details: HashMap::from([
                        ("country_changes".to_string(), json!(changes)),
                        ("threshold".to_string(), json!(self.config.max_country_changes)),
                    ]),
                });
                report.geo_anomaly += 1;
                warn!("geo anomaly detected: {} changed country {} times", ip, changes);
            }
        }

        let mut limited: HashMap<&str, u64> = HashMap::new();
        for record in &records {
            if record.outcome == Outcome::RateLimited {
                *limited.entry(record.ip_address.as_str()).or_insert(0) += 1;
            }
        }
        for (ip, count) in limited {
            if count > self.config.rate_limited_threshold {
                staged.push(FlagUpdate {
                    ip_address: ip.to_string(),
                    detection_type: DetectionType::RepeatedRateLimit,
                    flagged_at: now,
                    block: false,
                    details: HashMap::from([
                        ("rate_limited_last_hour".to_string(), json!(count)),
                        ("threshold".to_string(), json!(self.config.rate_limited_threshold)),
                    ]),
                });
                report.repeated_rate_limit += 1;
                warn!("repeated rate limiting detected: {} rejected {} times", ip, count);
            }
        }

        // counted off the flag itself, so a standing manual block on the same
        // IP does not hide the transition
        for update in staged.iter().filter(|u| u.block) {
            let prior = self.flags.flags_for(&update.ip_address).await?;
            let already = prior
                .iter()
                .any(|flag| flag.detection_type == update.detection_type && flag.is_blocked);
            if !already {
                report.newly_blocked += 1;
                error!("blocking {}: request volume at or above block threshold", update.ip_address);
            }
        }

        self.flags.apply(staged).await?;

        info!(
            "anomaly scan completed: {} high volume, {} geo anomaly, {} repeated rate limit, {} newly blocked",
            report.high_volume, report.geo_anomaly, report.repeated_rate_limit, report.newly_blocked
        );
        Ok(ScanOutcome::Completed(report))
    }
}

/// Distinct-country transitions per IP, in record order. Unknown
/// enrichment never counts as a change.
fn country_changes(records: &[crate::models::RequestRecord]) -> HashMap<String, u32> {
    let mut last_seen: HashMap<&str, &str> = HashMap::new();
    let mut changes: HashMap<String, u32> = HashMap::new();
    for record in records {
        let Some(country) = record.resolved_country.as_deref() else {
            continue;
        };
        match last_seen.get(record.ip_address.as_str()) {
            Some(previous) if *previous != country => {
                *changes.entry(record.ip_address.clone()).or_insert(0) += 1;
            }
            _ => {}
        }
        last_seen.insert(record.ip_address.as_str(), country);
    }
    changes
}
