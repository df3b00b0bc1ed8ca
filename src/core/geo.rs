//! IP geolocation with caching and an ordered fallback chain.
//!
//! Resolution order: fresh cache entry, primary provider, stale cache
//! entry, secondary provider, Unknown. Provider calls are the only
//! outbound network I/O in the system and are always bounded by a
//! timeout; no lock is held while a call is in flight. An entry past its
//! TTL is only served after a refresh attempt has failed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::models::{GeoConfig, GeoLocation};

/// Errors from one provider attempt
#[derive(Error, Debug)]
pub enum GeoError {
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("provider returned no result: {0}")]
    NoResult(String),
    #[error("provider call timed out")]
    Timeout,
}

/// One strategy in the resolution chain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GeoProvider: Send + Sync {
    async fn lookup(&self, ip: &str) -> Result<GeoLocation, GeoError>;
}

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    status: Option<String>,
    country: Option<String>,
    city: Option<String>,
    message: Option<String>,
}

/// Provider speaking the ip-api.com style JSON contract
pub struct HttpGeoProvider {
    client: reqwest::Client,
    url_template: String,
}

impl HttpGeoProvider {
    pub fn new(url_template: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url_template,
        }
    }
}

#[async_trait]
impl GeoProvider for HttpGeoProvider {
    async fn lookup(&self, ip: &str) -> Result<GeoLocation, GeoError> {
        let url = self.url_template.replace("{ip}", ip);
        let response = self.client.get(&url).send().await?;
        let body: ProviderResponse = response.json().await?;

        if matches!(body.status.as_deref(), Some("fail")) {
            return Err(GeoError::NoResult(
                body.message.unwrap_or_else(|| "lookup failed".to_string()),
            ));
        }

        match body.country {
            Some(country) => Ok(GeoLocation {
                country,
                city: body.city.unwrap_or_default(),
            }),
            None => Err(GeoError::NoResult("response carried no country".to_string())),
        }
    }
}

struct CacheSlot {
    location: GeoLocation,
    resolved_at: Instant,
    last_used: Instant,
}

/// Bounded cache of resolved locations. Entries are replaced whole and
/// carry their own freshness timestamp; when full, the least recently
/// used entry makes room.
struct GeoCache {
    slots: Mutex<HashMap<String, CacheSlot>>,
    capacity: usize,
}

impl GeoCache {
    fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Cached location for `ip` if one exists, with its staleness.
    fn get(&self, ip: &str, ttl: Duration) -> Option<(GeoLocation, bool)> {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.get_mut(ip)?;
        let now = Instant::now();
        slot.last_used = now;
        let stale = now.duration_since(slot.resolved_at) > ttl;
        Some((slot.location.clone(), stale))
    }

    fn insert(&self, ip: &str, location: GeoLocation) {
        let mut slots = self.slots.lock().unwrap();
        let now = Instant::now();
        if !slots.contains_key(ip) && slots.len() >= self.capacity {
            if let Some(evict) = slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(key, _)| key.clone())
            {
                slots.remove(&evict);
            }
        }
        slots.insert(
            ip.to_string(),
            CacheSlot {
                location,
                resolved_at: now,
                last_used: now,
            },
        );
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}

/// Caching resolver over an ordered provider chain
pub struct GeoResolver {
    providers: Vec<Box<dyn GeoProvider>>,
    cache: GeoCache,
    ttl: Duration,
    timeout: Duration,
}

impl GeoResolver {
    pub fn new(config: &GeoConfig) -> Self {
        let mut providers: Vec<Box<dyn GeoProvider>> =
            vec![Box::new(HttpGeoProvider::new(config.primary_url.clone()))];
        if let Some(url) = &config.fallback_url {
            providers.push(Box::new(HttpGeoProvider::new(url.clone())));
        }
        Self::with_providers(providers, config)
    }

    pub fn with_providers(providers: Vec<Box<dyn GeoProvider>>, config: &GeoConfig) -> Self {
        Self {
            providers,
            cache: GeoCache::new(config.cache_capacity),
            ttl: Duration::from_secs(config.cache_ttl_seconds),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    /// Resolve `ip` to a coarse location, or `None` for Unknown. Never
    /// propagates provider failures and never blocks past the configured
    /// timeout per provider attempt.
    pub async fn resolve(&self, ip: &str) -> Option<GeoLocation> {
        let cached = self.cache.get(ip, self.ttl);
        if let Some((location, false)) = &cached {
            return Some(location.clone());
        }

        for (index, provider) in self.providers.iter().enumerate() {
            let attempt = tokio::time::timeout(self.timeout, provider.lookup(ip)).await;
            match attempt {
                Ok(Ok(location)) => {
                    self.cache.insert(ip, location.clone());
                    return Some(location);
                }
                Ok(Err(e)) => debug!("geo provider {} failed for {}: {}", index, ip, e),
                Err(_) => debug!("geo provider {} timed out for {}", index, ip),
            }

            // refresh attempt failed; a stale entry beats the secondary
            if index == 0 {
                if let Some((location, true)) = &cached {
                    debug!("serving stale geo entry for {}", ip);
                    return Some(location.clone());
                }
            }
        }

        warn!("geolocation unresolved for {}", ip);
        None
    }
}
