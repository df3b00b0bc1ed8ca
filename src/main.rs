//! Service entry point: loads configuration, wires the stores, the
//! security gate and the anomaly scanner, and starts the HTTP server.

use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use log::info;

use ip_sentinel::api::{routes, ApiState};
use ip_sentinel::config;
use ip_sentinel::core::request_log::{MemoryRequestLog, RequestLog};
use ip_sentinel::core::{AnomalyScanner, GeoResolver, RateLimiter, SecurityGate};
use ip_sentinel::store::memory::{MemoryCounterStore, MemoryFlagStore};
use ip_sentinel::store::redis::RedisCounterStore;
use ip_sentinel::store::{CounterStore, FlagStore};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    info!("Starting ip-sentinel...");

    let config = config::load_config().context("failed to load configuration")?;

    let counters: Arc<dyn CounterStore> = if config.redis.enabled {
        let client = redis::Client::open(config.redis.url.as_str())
            .context("failed to create Redis client")?;
        info!("rate windows backed by Redis at {}", config.redis.url);
        Arc::new(RedisCounterStore::new(client))
    } else {
        info!("rate windows backed by in-process store");
        Arc::new(MemoryCounterStore::new())
    };

    let log: Arc<dyn RequestLog> = Arc::new(MemoryRequestLog::new());
    let flags: Arc<dyn FlagStore> = Arc::new(MemoryFlagStore::new());

    let limiter = RateLimiter::new(counters, config.rate_limit.clone());
    let geo = GeoResolver::new(&config.geo);
    let gate = Arc::new(SecurityGate::new(limiter, geo, log.clone(), flags.clone()));
    let scanner = Arc::new(AnomalyScanner::new(
        log.clone(),
        flags.clone(),
        config.scan.clone(),
    ));

    let state = web::Data::new(ApiState {
        gate,
        scanner,
        log,
        flags,
    });

    info!(
        "listening on {}:{}",
        config.server.host, config.server.port
    );

    HttpServer::new(move || App::new().app_data(state.clone()).configure(routes))
        .bind((config.server.host.as_str(), config.server.port))?
        .run()
        .await
        .context("server terminated")
}
