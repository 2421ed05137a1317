//! DriftActor - Compares the remote source of truth against what is running
//!
//! Two instances run side by side, one per [`DriftKind`]:
//!
//! - **Config**: re-fetches the config and reports a changed refresh interval
//! - **Monitors**: re-fetches the monitor list and reports any difference from
//!   the running set (plain equality over the whole ordered list)
//!
//! Drift tasks never change agent state themselves. They send a
//! [`DriftReport`] to the lifecycle manager, which owns both the interval and
//! the task set. Both checks sleep for the refresh interval that is current
//! when the next wait starts, so a new interval applies from the next tick on.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::client::ApiClient;
use crate::config::MonitorDescriptor;
use crate::failure::RetryPolicy;

use super::messages::{DriftCommand, DriftReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftKind {
    Config,
    Monitors,
}

impl fmt::Display for DriftKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DriftKind::Config => "config",
            DriftKind::Monitors => "monitors",
        })
    }
}

/// Everything a drift task observes, plus where it reports to
#[derive(Clone)]
pub struct DriftContext {
    pub client: ApiClient,
    pub retry: RetryPolicy,

    /// Active refresh interval, published by the lifecycle manager
    pub refresh_rx: watch::Receiver<Duration>,

    /// Descriptor set of the running monitor tasks, published by the lifecycle manager
    pub active_monitors: watch::Receiver<Arc<Vec<MonitorDescriptor>>>,

    pub report_tx: mpsc::Sender<DriftReport>,
}

pub struct DriftActor {
    kind: DriftKind,
    ctx: DriftContext,
    command_rx: mpsc::Receiver<DriftCommand>,
}

impl DriftActor {
    pub fn new(kind: DriftKind, ctx: DriftContext, command_rx: mpsc::Receiver<DriftCommand>) -> Self {
        Self {
            kind,
            ctx,
            command_rx,
        }
    }

    #[instrument(skip(self), fields(drift = %self.kind))]
    pub async fn run(mut self) {
        debug!("starting drift task");

        loop {
            let period = *self.ctx.refresh_rx.borrow();

            tokio::select! {
                biased;

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(DriftCommand::CheckNow { respond_to }) => {
                            debug!("received CheckNow command");
                            self.check().await;
                            let _ = respond_to.send(());
                        }

                        Some(DriftCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }

                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }

                _ = tokio::time::sleep(period) => {
                    self.check().await;
                }
            }
        }

        debug!("drift task stopped");
    }

    async fn check(&self) {
        match self.kind {
            DriftKind::Config => self.check_config().await,
            DriftKind::Monitors => self.check_monitors().await,
        }
    }

    async fn check_config(&self) {
        debug!("checking for config changes");
        let client = &self.ctx.client;
        let Ok(config) = self
            .ctx
            .retry
            .run("checking config changes", || client.fetch_config())
            .await
        else {
            return;
        };

        let remote = config.refresh_interval();
        let active = *self.ctx.refresh_rx.borrow();
        if remote != active {
            info!("remote refresh interval changed from {active:?} to {remote:?}");
            self.submit(DriftReport::RefreshInterval(remote));
        }
    }

    async fn check_monitors(&self) {
        debug!("checking for new monitors");
        let client = &self.ctx.client;
        let Ok(fetched) = self
            .ctx
            .retry
            .run("checking monitor changes", || client.fetch_monitors())
            .await
        else {
            return;
        };

        let unchanged = self.ctx.active_monitors.borrow().as_slice() == fetched.as_slice();
        if unchanged {
            debug!("monitor list unchanged");
            return;
        }

        info!("monitor list changed, {} monitors fetched", fetched.len());
        self.submit(DriftReport::Monitors(fetched));
    }

    /// Never blocks; an undelivered report is found again on the next tick
    fn submit(&self, report: DriftReport) {
        match self.ctx.report_tx.try_send(report) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("lifecycle manager busy, dropping drift report"),
            Err(TrySendError::Closed(_)) => debug!("lifecycle manager gone, dropping drift report"),
        }
    }
}

/// Handle owning one running drift task
pub struct DriftHandle {
    sender: mpsc::Sender<DriftCommand>,
    task: JoinHandle<()>,
    kind: DriftKind,
}

impl DriftHandle {
    pub fn spawn(kind: DriftKind, ctx: DriftContext) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let actor = DriftActor::new(kind, ctx, cmd_rx);
        let task = tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            task,
            kind,
        }
    }

    /// Run one check right away; returns after any report has been submitted
    pub async fn check_now(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DriftCommand::CheckNow { respond_to: tx })
            .await
            .context("failed to send CheckNow command")?;

        rx.await.context("failed to receive check confirmation")
    }

    /// Stop the task, waiting for an in-flight check to finish first
    pub async fn stop(self) {
        let _ = self.sender.send(DriftCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            error!("{} drift task ended abnormally: {e}", self.kind);
        }
    }
}
