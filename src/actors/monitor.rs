//! MonitorActor - Runs one monitor on its own interval
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → Probe → Build MonitorResult → Reporter → ingest endpoint
//!     ↑
//!     └─── Commands (RunNow, Shutdown)
//! ```
//!
//! A tick is awaited inside the actor loop, so ticks of the same monitor
//! never overlap and a Shutdown is only seen once the current tick is done.
//! Ticks that come due meanwhile are delayed, not bunched up.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, instrument, warn};

use crate::MonitorResult;
use crate::config::{MonitorDescriptor, MonitorId};
use crate::probes::ProbeExecutor;
use crate::reporter::Reporter;

use super::messages::{MonitorCommand, TickOutcome};

/// Actor that executes a single monitor descriptor periodically
pub struct MonitorActor {
    descriptor: MonitorDescriptor,
    executor: Arc<ProbeExecutor>,
    reporter: Arc<Reporter>,
    command_rx: mpsc::Receiver<MonitorCommand>,
    period: Duration,
}

impl MonitorActor {
    pub fn new(
        descriptor: MonitorDescriptor,
        executor: Arc<ProbeExecutor>,
        reporter: Arc<Reporter>,
        command_rx: mpsc::Receiver<MonitorCommand>,
    ) -> Self {
        let period = descriptor.interval();
        Self {
            descriptor,
            executor,
            reporter,
            command_rx,
            period,
        }
    }

    /// Run the actor's main loop until Shutdown or until the handle is dropped
    #[instrument(skip(self), fields(monitor = %self.descriptor.id, kind = self.descriptor.monitor_type()))]
    pub async fn run(mut self) {
        debug!("starting monitor task with interval {:?}", self.period);

        // first run one full interval after start
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // a queued Shutdown wins over a tick that came due meanwhile
                biased;

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(MonitorCommand::RunNow { respond_to }) => {
                            debug!("received RunNow command");
                            let outcome = self.tick().await;
                            let _ = respond_to.send(outcome);
                        }

                        Some(MonitorCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }

                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }

                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        debug!("monitor task stopped");
    }

    /// Probe once and hand any result to the reporter
    async fn tick(&self) -> TickOutcome {
        let outcome = match self.executor.execute(&self.descriptor).await {
            Ok(Some(outcome)) => outcome,
            Ok(None) => return TickOutcome::NoResult,
            Err(e) if e.is_unsupported_input() => {
                error!("monitor {} cannot run: {e}", self.descriptor.id);
                return TickOutcome::Rejected;
            }
            Err(e) => {
                warn!("monitor {} probe failed: {e}", self.descriptor.id);
                return TickOutcome::NoResult;
            }
        };

        let result = MonitorResult {
            monitor_id: self.descriptor.id.clone(),
            monitor_type: self.descriptor.monitor_type().to_string(),
            result: outcome,
            location: None,
        };
        self.reporter.report(result).await;

        TickOutcome::Reported
    }
}

/// Handle owning one running monitor task
///
/// Only the lifecycle manager holds these. Stopping consumes the handle and
/// returns once the task has fully exited.
pub struct MonitorHandle {
    sender: mpsc::Sender<MonitorCommand>,
    task: JoinHandle<()>,
    monitor_id: MonitorId,
}

impl MonitorHandle {
    /// Spawn a new monitor task
    pub fn spawn(
        descriptor: MonitorDescriptor,
        executor: Arc<ProbeExecutor>,
        reporter: Arc<Reporter>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let monitor_id = descriptor.id.clone();

        let actor = MonitorActor::new(descriptor, executor, reporter, cmd_rx);
        let task = tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            task,
            monitor_id,
        }
    }

    /// Run one tick right away and wait for its outcome
    pub async fn run_now(&self) -> Result<TickOutcome> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::RunNow { respond_to: tx })
            .await
            .context("failed to send RunNow command")?;

        rx.await.context("failed to receive tick outcome")
    }

    /// Stop the task, waiting for an in-flight tick to finish first
    pub async fn stop(self) {
        let _ = self.sender.send(MonitorCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            error!("monitor task {} ended abnormally: {e}", self.monitor_id);
        }
    }

    pub fn monitor_id(&self) -> &MonitorId {
        &self.monitor_id
    }
}
