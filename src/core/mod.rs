//! Core components of the request-security monitor: rate limiting,
//! geolocation, request logging, anomaly scanning and the per-request
//! security gate.

pub mod gate;
pub mod geo;
pub mod rate_limiter;
pub mod request_log;
pub mod scanner;

pub use gate::{GateError, SecurityGate};
pub use geo::{GeoProvider, GeoResolver, HttpGeoProvider};
pub use rate_limiter::{RateLimitDecision, RateLimiter};
pub use request_log::{MemoryRequestLog, RequestLog, RequestLogError};
pub use scanner::{AnomalyScanner, ScanError, ScanOutcome};
