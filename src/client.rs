//! Remote config client and ingest transport
//!
//! All three endpoints share one HTTP client and the same bearer credential.
//! Calls only report failures; what to do about them is decided by
//! [`crate::failure`] at the call site.

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument, trace};

use crate::MonitorResult;
use crate::config::{AgentSettings, MonitorDescriptor, MonitorList, RemoteConfig};

const CONFIG_PATH: &str = "/v1/nemea/config";
const MONITORS_PATH: &str = "/v1/nemea/monitors";
const INGEST_PATH: &str = "/v1/nemea/ingest";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum RemoteError {
    /// The server answered with a non-success status
    #[error("HTTP {status}")]
    Status { status: StatusCode },

    /// No usable HTTP response (connect, timeout, body read)
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RemoteError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            RemoteError::Status { status } => Some(*status),
            _ => None,
        }
    }
}

/// Client for the config, monitors and ingest endpoints
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn from_settings(settings: &AgentSettings) -> Result<Self, RemoteError> {
        Self::new(&settings.config_url, &settings.api_key)
    }

    /// Current operating parameters
    #[instrument(skip(self))]
    pub async fn fetch_config(&self) -> Result<RemoteConfig, RemoteError> {
        debug!("fetching config");
        let config: RemoteConfig = self.get_json(CONFIG_PATH).await?;
        trace!("fetched config: {config:?}");
        Ok(config)
    }

    /// Current monitor list, in the order the server sends it
    #[instrument(skip(self))]
    pub async fn fetch_monitors(&self) -> Result<Vec<MonitorDescriptor>, RemoteError> {
        debug!("fetching monitors");
        let list: MonitorList = self.get_json(MONITORS_PATH).await?;
        trace!("fetched {} monitors: {:?}", list.monitors.len(), list.monitors);
        Ok(list.monitors)
    }

    /// Submit one enriched result
    #[instrument(skip_all, fields(monitor = %result.monitor_id))]
    pub async fn send_result(&self, result: &MonitorResult) -> Result<(), RemoteError> {
        trace!("sending result: {result:?}");
        let response = self
            .http
            .post(self.url(INGEST_PATH))
            .bearer_auth(&self.api_key)
            .json(result)
            .send()
            .await?;

        check_status(response.status())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RemoteError> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        check_status(response.status())?;

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

fn check_status(status: StatusCode) -> Result<(), RemoteError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(RemoteError::Status { status })
    }
}
