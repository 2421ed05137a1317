pub mod actors;
pub mod client;
pub mod config;
pub mod failure;
pub mod geo;
pub mod probes;
pub mod reporter;
pub mod util;

use serde::Serialize;

use crate::config::MonitorId;
use crate::probes::{dns::DnsReport, LatencySummary};

/// One probe execution, ready to be shipped to the ingest endpoint
///
/// Created fresh for every tick and handed to the reporter exactly once.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorResult {
    pub monitor_id: MonitorId,
    pub monitor_type: String,
    pub result: ProbeOutcome,

    /// Location of the agent, attached by the reporter when available
    #[serde(rename = "systemID", skip_serializing_if = "Option::is_none")]
    pub location: Option<serde_json::Value>,
}

/// Type-specific payload of a [`MonitorResult`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProbeOutcome {
    Dns(DnsReport),
    Latency(LatencySummary),
}
