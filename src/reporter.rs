//! Result reporter
//!
//! Enriches a result with the agent location and submits it to the ingest
//! endpoint. A transiently failed submission gets its single retry on a
//! tracked background task, so the monitor that produced the result can move
//! on to its next tick right away.

use tokio_util::task::TaskTracker;
use tracing::{error, info, instrument, warn};

use crate::MonitorResult;
use crate::client::ApiClient;
use crate::failure::{RetryPolicy, log_failure};
use crate::geo::GeoLocator;

const ACTION: &str = "sending results";

pub struct Reporter {
    client: ApiClient,
    geo: GeoLocator,
    retry: RetryPolicy,
    pending: TaskTracker,
}

impl Reporter {
    pub fn new(client: ApiClient, geo: GeoLocator, retry: RetryPolicy) -> Self {
        Self {
            client,
            geo,
            retry,
            pending: TaskTracker::new(),
        }
    }

    /// Submit one result; failures are logged and never surface to the caller
    ///
    /// A transient failure is retried once after the retry delay on a
    /// background task. For monitors with an interval shorter than that delay
    /// the retried result can reach the ingest endpoint after results of later
    /// ticks, so ingest order within one monitor is only guaranteed while
    /// submissions succeed.
    #[instrument(skip_all, fields(monitor = %result.monitor_id))]
    pub async fn report(&self, mut result: MonitorResult) {
        if let Some(location) = self.geo.location().await {
            result.location = Some(location);
        }

        let err = match self.client.send_result(&result).await {
            Ok(()) => {
                info!(
                    "results for {} ({}) sent successfully",
                    result.monitor_id, result.monitor_type
                );
                return;
            }
            Err(err) => err,
        };

        if !log_failure(ACTION, &err).is_transient() {
            return;
        }

        if self.pending.is_closed() {
            warn!("reporter is shutting down, dropping result for {}", result.monitor_id);
            return;
        }

        warn!("retrying {ACTION} in {:?}", self.retry.delay);
        let client = self.client.clone();
        let delay = self.retry.delay;
        self.pending.spawn(async move {
            tokio::time::sleep(delay).await;
            match client.send_result(&result).await {
                Ok(()) => info!(
                    "results for {} ({}) sent successfully on retry",
                    result.monitor_id, result.monitor_type
                ),
                Err(err) => {
                    log_failure(ACTION, &err);
                    error!("retry of {ACTION} for {} failed, giving up", result.monitor_id);
                }
            }
        });
    }

    /// Number of retries still waiting or in flight
    pub fn pending_retries(&self) -> usize {
        self.pending.len()
    }

    /// Stop accepting new retries and wait for the scheduled ones to settle
    pub async fn drain(&self) {
        self.pending.close();
        self.pending.wait().await;
    }
}
