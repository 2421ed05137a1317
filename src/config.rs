use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::util::{get_api_key, get_config_url, get_geo_api_key, get_geo_api_url};

/// Interval used when the remote side omits one (or sends zero)
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(60_000);

/// Local operating settings, read from the environment at startup
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Bearer credential for the config and ingest endpoints
    pub api_key: String,

    /// Base URL of the config/ingest API (no trailing slash)
    pub config_url: String,

    /// Geolocation credential; geolocation is skipped entirely without it
    pub geo_api_key: Option<String>,

    /// Base URL of the geolocation service
    pub geo_api_url: String,
}

impl AgentSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key =
            get_api_key().ok_or_else(|| anyhow::anyhow!("API_KEY must be set to start the agent"))?;
        let config_url = get_config_url()
            .ok_or_else(|| anyhow::anyhow!("CONFIG_URL must be set to start the agent"))?;

        let settings = Self {
            api_key,
            config_url,
            geo_api_key: get_geo_api_key(),
            geo_api_url: get_geo_api_url(),
        };
        trace!(
            "loaded settings for {} (geolocation: {})",
            settings.config_url,
            settings.geo_api_key.is_some()
        );
        Ok(settings)
    }
}

/// Operating parameters served by the config endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    /// How often config and monitor drift are checked, in milliseconds
    #[serde(default, alias = "refreshInterval")]
    pub monitor_refresh_interval: Option<u64>,
}

impl RemoteConfig {
    pub fn refresh_interval(&self) -> Duration {
        millis_or_default(self.monitor_refresh_interval)
    }
}

/// Response envelope of the monitors endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorList {
    pub monitors: Vec<MonitorDescriptor>,
}

/// Identity of a monitor; the API hands out either numbers or strings
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MonitorId {
    Number(u64),
    Text(String),
}

impl fmt::Display for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorId::Number(id) => write!(f, "{id}"),
            MonitorId::Text(id) => f.write_str(id),
        }
    }
}

impl From<u64> for MonitorId {
    fn from(id: u64) -> Self {
        MonitorId::Number(id)
    }
}

impl From<&str> for MonitorId {
    fn from(id: &str) -> Self {
        MonitorId::Text(id.to_string())
    }
}

/// One configured periodic check
///
/// Descriptors are never patched in place. A fetch produces a whole new set,
/// which is compared against the running one by plain equality.
///
/// Equality covers the modelled fields only: `id`, the type with its
/// parameters, and `interval`. Fields this agent does not model (for example
/// the `url` of an HTTP monitor, which parses as [`MonitorKind::Unsupported`])
/// are dropped on parse, so editing them remotely does not count as drift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorDescriptor {
    pub id: MonitorId,

    #[serde(flatten)]
    pub kind: MonitorKind,

    /// Execution interval in milliseconds
    #[serde(default)]
    pub interval: Option<u64>,
}

impl MonitorDescriptor {
    pub fn interval(&self) -> Duration {
        millis_or_default(self.interval)
    }

    pub fn monitor_type(&self) -> &'static str {
        self.kind.type_name()
    }
}

/// Type-specific monitor parameters, tagged by the `type` field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MonitorKind {
    #[serde(rename = "DNS")]
    Dns {
        /// Kept verbatim; unknown record types are rejected when the probe runs
        #[serde(rename = "recordType")]
        record_type: String,
        domain: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server: Option<String>,
    },

    #[serde(rename = "PING")]
    Ping { host: String },

    /// Any monitor type this agent does not know how to run
    #[serde(other)]
    Unsupported,
}

impl MonitorKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            MonitorKind::Dns { .. } => "DNS",
            MonitorKind::Ping { .. } => "PING",
            MonitorKind::Unsupported => "UNSUPPORTED",
        }
    }
}

fn millis_or_default(millis: Option<u64>) -> Duration {
    match millis {
        Some(ms) if ms > 0 => Duration::from_millis(ms),
        _ => DEFAULT_INTERVAL,
    }
}
