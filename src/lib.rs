//! ip-sentinel: request-security monitor.
//!
//! Observes every inbound request, records its origin and geolocation,
//! enforces per-client rate limits, and periodically scans accumulated
//! history to flag and block anomalous clients.

pub mod api;
pub mod config;
pub mod core;
pub mod models;
pub mod store;
pub mod utils;
