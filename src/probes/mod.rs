//! Probe executors
//!
//! A probe turns a [`MonitorDescriptor`] into a normalized [`ProbeOutcome`].
//! The network-facing parts sit behind two small traits so the scheduling
//! code can run against fakes:
//!
//! - [`DnsResolver`]: one record-type-dispatched lookup, resolver server passed per call
//! - [`Pinger`]: one reachability attempt, alive + round-trip time
//!
//! `Ok(None)` from [`ProbeExecutor::execute`] means "nothing to report"
//! (e.g. every ping attempt failed). Errors are for input the agent cannot run.

pub mod dns;
pub mod ping;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use crate::ProbeOutcome;
use crate::config::{MonitorDescriptor, MonitorKind};

pub use dns::{DnsRecordType, DnsResolver, HickoryResolver};
pub use ping::{Pinger, SystemPinger};

/// Number of reachability attempts per ping tick
pub const PING_BATCH_SIZE: usize = 5;

#[derive(Error, Debug)]
pub enum ProbeError {
    /// The descriptor asks for something this agent cannot do
    #[error("invalid monitor configuration: {0}")]
    InvalidConfig(String),

    #[error("unsupported monitor type")]
    UnsupportedMonitorType,

    #[error("DNS lookup failed: {0}")]
    Lookup(String),

    #[error("failed to run probe: {0}")]
    Io(#[from] std::io::Error),
}

impl ProbeError {
    /// Input errors fail every tick the same way; everything else may recover
    pub fn is_unsupported_input(&self) -> bool {
        matches!(
            self,
            ProbeError::InvalidConfig(_) | ProbeError::UnsupportedMonitorType
        )
    }
}

/// Latency statistics over one batch of reachability attempts
///
/// All times are milliseconds. Loss is measured against the full batch size,
/// not against the attempts that produced an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySummary {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub packet_loss: f64,
    pub times: Vec<f64>,
}

impl LatencySummary {
    /// Summarize the successful round-trip times of a batch
    ///
    /// Returns `None` when nothing succeeded, so callers never see NaN statistics.
    pub fn from_batch(times: &[f64], batch_size: usize) -> Option<Self> {
        if times.is_empty() || batch_size == 0 {
            return None;
        }

        let min = times.iter().copied().fold(f64::INFINITY, f64::min);
        let max = times.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg = times.iter().sum::<f64>() / times.len() as f64;
        let lost = batch_size.saturating_sub(times.len());
        let packet_loss = lost as f64 / batch_size as f64 * 100.0;

        Some(Self {
            min,
            max,
            avg,
            packet_loss,
            times: times.to_vec(),
        })
    }
}

/// Runs the check described by a monitor descriptor
pub struct ProbeExecutor {
    dns: Arc<dyn DnsResolver>,
    pinger: Arc<dyn Pinger>,
    batch_size: usize,
}

impl ProbeExecutor {
    pub fn new(dns: Arc<dyn DnsResolver>, pinger: Arc<dyn Pinger>) -> Self {
        Self {
            dns,
            pinger,
            batch_size: PING_BATCH_SIZE,
        }
    }

    /// Executor backed by the system resolver configuration and the system `ping`
    pub fn system() -> Self {
        Self::new(
            Arc::new(HickoryResolver::from_system()),
            Arc::new(SystemPinger::default()),
        )
    }

    #[instrument(skip_all, fields(monitor = %descriptor.id, kind = descriptor.monitor_type()))]
    pub async fn execute(
        &self,
        descriptor: &MonitorDescriptor,
    ) -> Result<Option<ProbeOutcome>, ProbeError> {
        match &descriptor.kind {
            MonitorKind::Dns {
                record_type,
                domain,
                server,
            } => {
                match dns::probe(self.dns.as_ref(), record_type, domain, server.as_deref()).await {
                    Ok(report) => Ok(Some(ProbeOutcome::Dns(report))),
                    Err(ProbeError::Lookup(e)) => {
                        error!("error resolving DNS for {domain}: {e}");
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            }
            MonitorKind::Ping { host } => Ok(self.ping(host).await?.map(ProbeOutcome::Latency)),
            MonitorKind::Unsupported => Err(ProbeError::UnsupportedMonitorType),
        }
    }

    /// Fire a fixed batch of sequential attempts and summarize the answers
    async fn ping(&self, host: &str) -> Result<Option<LatencySummary>, ProbeError> {
        ping::validate_host(host)?;
        debug!("pinging host {host}");

        let mut times = Vec::with_capacity(self.batch_size);
        for _ in 0..self.batch_size {
            match self.pinger.probe(host).await {
                Ok(Some(time)) => {
                    debug!("ping response time for {host}: {time} ms");
                    times.push(time);
                }
                Ok(None) => warn!("host {host} is not alive"),
                Err(e) => error!("error pinging {host}: {e}"),
            }
        }

        let summary = LatencySummary::from_batch(&times, self.batch_size);
        match &summary {
            Some(summary) => debug!("ping summary for {host}: {summary:?}"),
            None => warn!("no successful ping responses from {host}"),
        }
        Ok(summary)
    }
}
