use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Fixed window length in seconds
    pub window_seconds: u32,
    /// Requests admitted per window per client key
    pub quota: u32,
    /// Behavior when the counter store is unreachable:
    /// true = admit (fail open), false = reject (fail closed)
    pub fail_open: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_seconds: 60,
            quota: 5,
            fail_open: false,
        }
    }
}

/// Geolocation resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoConfig {
    /// Primary provider URL template; `{ip}` is replaced with the address
    pub primary_url: String,
    /// Optional secondary provider, tried after the stale-cache fallback
    pub fallback_url: Option<String>,
    /// Cache entry time-to-live in seconds
    pub cache_ttl_seconds: u64,
    /// Maximum number of cached entries before LRU eviction
    pub cache_capacity: usize,
    /// Upper bound on a single provider call
    pub timeout_ms: u64,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            primary_url: "http://ip-api.com/json/{ip}".to_string(),
            fallback_url: None,
            cache_ttl_seconds: 3600,
            cache_capacity: 4096,
            timeout_ms: 2000,
        }
    }
}

/// Anomaly scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Trailing aggregation window in seconds
    pub window_seconds: u32,
    /// Request count above which an IP is flagged as high volume
    pub high_volume_threshold: u64,
    /// Request count above which a high-volume IP is also blocked
    pub block_threshold: u64,
    /// Country transitions above which an IP is flagged as a geo anomaly
    pub max_country_changes: u32,
    /// Rate-limited outcomes above which an IP is flagged
    pub rate_limited_threshold: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            window_seconds: 3600,
            high_volume_threshold: 100,
            block_threshold: 150,
            max_country_changes: 3,
            rate_limited_threshold: 10,
        }
    }
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
    /// Whether the counter store is Redis-backed; false uses the
    /// in-process store (single-instance deployments, tests)
    pub enabled: bool,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Redis configuration
    pub redis: RedisConfig,
    /// Rate limit configuration
    pub rate_limit: RateLimitConfig,
    /// Geolocation configuration
    pub geo: GeoConfig,
    /// Anomaly scan configuration
    pub scan: ScanConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            redis: RedisConfig {
                url: "redis://127.0.0.1:6379".to_string(),
                enabled: false,
            },
            rate_limit: RateLimitConfig::default(),
            geo: GeoConfig::default(),
            scan: ScanConfig::default(),
        }
    }
}

/// Outcome recorded for a classified request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Admitted,
    RateLimited,
    Blocked,
}

/// Tri-state verdict returned to the request-handling layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Admit,
    RateLimited,
    Blocked,
}

impl Verdict {
    pub fn outcome(self) -> Outcome {
        match self {
            Verdict::Admit => Outcome::Admitted,
            Verdict::RateLimited => Outcome::RateLimited,
            Verdict::Blocked => Outcome::Blocked,
        }
    }
}

/// Request as handed over by the fronting request-handling layer
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub ip_address: String,
    pub path: String,
    pub method: String,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Immutable record of one classified request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub ip_address: String,
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub http_method: String,
    pub user_agent: Option<String>,
    pub resolved_country: Option<String>,
    pub resolved_city: Option<String>,
    pub outcome: Outcome,
}

/// Resolved coarse location for an IP address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub country: String,
    pub city: String,
}

/// Detection rule that produced a suspicious-IP flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionType {
    HighVolume,
    GeoAnomaly,
    RepeatedRateLimit,
}

/// At most one active flag exists per (ip_address, detection_type);
/// re-flagging updates `flagged_at` and `details` in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspiciousIp {
    pub ip_address: String,
    pub detection_type: DetectionType,
    pub flagged_at: DateTime<Utc>,
    pub is_blocked: bool,
    pub details: HashMap<String, serde_json::Value>,
}

/// Staged flag mutation produced by one scan pass
#[derive(Debug, Clone)]
pub struct FlagUpdate {
    pub ip_address: String,
    pub detection_type: DetectionType,
    pub flagged_at: DateTime<Utc>,
    /// true sets `is_blocked`; false leaves the existing value alone
    pub block: bool,
    pub details: HashMap<String, serde_json::Value>,
}

/// Summary of one completed scan run
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub high_volume: u64,
    pub geo_anomaly: u64,
    pub repeated_rate_limit: u64,
    pub newly_blocked: u64,
}

/// Trailing-window operational summary served by the report endpoint
#[derive(Debug, Clone, Serialize)]
pub struct SecurityReport {
    pub since: DateTime<Utc>,
    pub total_requests: u64,
    pub unique_ips: u64,
    pub rate_limited_requests: u64,
    pub blocked_requests: u64,
    pub active_flags: u64,
    pub blocked_ips: u64,
}
