//! Geolocation enricher
//!
//! Looks up the agent's approximate location and keeps the answer in a
//! single cache slot for [`CACHE_EXPIRATION`]. The slot is only ever replaced
//! as a whole. Concurrent refreshes may both hit the network; the last one to
//! finish wins.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, instrument, trace};

use crate::config::AgentSettings;

/// How long a fetched location is reused
pub const CACHE_EXPIRATION: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct GeoCacheEntry {
    pub payload: serde_json::Value,
    pub fetched_at: Instant,
}

impl GeoCacheEntry {
    pub fn is_fresh(&self, now: Instant, expiration: Duration) -> bool {
        now.saturating_duration_since(self.fetched_at) < expiration
    }
}

pub struct GeoLocator {
    http: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    expiration: Duration,
    cache: Mutex<Option<GeoCacheEntry>>,
}

impl GeoLocator {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token,
            expiration: CACHE_EXPIRATION,
            cache: Mutex::new(None),
        }
    }

    pub fn from_settings(settings: &AgentSettings) -> Self {
        Self::new(&settings.geo_api_url, settings.geo_api_key.clone())
    }

    /// Locator that never looks anything up
    pub fn disabled() -> Self {
        Self::new(String::new(), None)
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    /// Current location payload, `None` when disabled or the lookup failed
    #[instrument(skip(self))]
    pub async fn location(&self) -> Option<serde_json::Value> {
        let Some(token) = &self.token else {
            trace!("no geolocation key configured, skipping geolocation");
            return None;
        };

        let now = Instant::now();
        if let Some(entry) = self.cached()
            && entry.is_fresh(now, self.expiration)
        {
            debug!("using cached geolocation data");
            return Some(entry.payload);
        }

        debug!("fetching geolocation data");
        match self.fetch(token).await {
            Ok(payload) => {
                trace!("geolocation data fetched: {payload}");
                self.store(GeoCacheEntry {
                    payload: payload.clone(),
                    fetched_at: now,
                });
                Some(payload)
            }
            Err(e) => {
                error!("failed to fetch geolocation data: {e}");
                None
            }
        }
    }

    async fn fetch(&self, token: &str) -> reqwest::Result<serde_json::Value> {
        self.http
            .get(format!("{}/json", self.endpoint))
            .query(&[("token", token)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    fn cached(&self) -> Option<GeoCacheEntry> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store(&self, entry: GeoCacheEntry) {
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = Some(entry);
    }
}
