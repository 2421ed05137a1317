//! AgentActor - Lifecycle manager of the monitoring agent
//!
//! ```text
//! Uninitialized → ConfigLoading → Monitoring ⇄ Restarting
//!                       │              │            │
//!                       └──────────────┴────────────┴──→ Stopped
//! ```
//!
//! The actor is the only owner of the running task handles and of the active
//! refresh interval. Drift tasks and the outside world talk to it through
//! messages; it publishes what they may read (state, refresh interval,
//! running descriptor set) through watch channels.
//!
//! A reconciliation stops every monitor task and waits for all of them before
//! the next generation is spawned, so two generations never run side by side.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, instrument, warn};

use crate::client::ApiClient;
use crate::config::{AgentSettings, DEFAULT_INTERVAL, MonitorDescriptor, RemoteConfig};
use crate::failure::RetryPolicy;
use crate::geo::GeoLocator;
use crate::probes::ProbeExecutor;
use crate::reporter::Reporter;

use super::drift::{DriftContext, DriftHandle, DriftKind};
use super::messages::{AgentCommand, AgentState, AgentStatus, DriftReport};
use super::monitor::MonitorHandle;

/// Collaborators of a running agent
pub struct Agent {
    pub client: ApiClient,
    pub executor: Arc<ProbeExecutor>,
    pub reporter: Arc<Reporter>,
    pub retry: RetryPolicy,

    /// Pause between initial config load attempts that failed for good
    pub config_retry_interval: Duration,
}

impl Agent {
    /// Agent wired to the real endpoints, the system resolver and `ping`
    pub fn from_settings(settings: &AgentSettings) -> Result<Self> {
        let client = ApiClient::from_settings(settings).context("failed to build HTTP client")?;
        let retry = RetryPolicy::default();
        let geo = GeoLocator::from_settings(settings);
        if !geo.is_enabled() {
            warn!("GEO_API_KEY is not set, results are sent without location");
        }

        Ok(Self {
            reporter: Arc::new(Reporter::new(client.clone(), geo, retry)),
            executor: Arc::new(ProbeExecutor::system()),
            client,
            retry,
            config_retry_interval: DEFAULT_INTERVAL,
        })
    }
}

pub struct AgentActor {
    agent: Agent,
    command_rx: mpsc::Receiver<AgentCommand>,

    report_tx: mpsc::Sender<DriftReport>,
    report_rx: mpsc::Receiver<DriftReport>,

    state_tx: watch::Sender<AgentState>,
    refresh_tx: watch::Sender<Duration>,
    monitors_tx: watch::Sender<Arc<Vec<MonitorDescriptor>>>,

    monitor_tasks: Vec<MonitorHandle>,
    drift_tasks: Vec<DriftHandle>,

    /// Callers waiting for the Stopped confirmation
    shutdown_waiters: Vec<oneshot::Sender<()>>,
}

impl AgentActor {
    pub fn new(
        agent: Agent,
        command_rx: mpsc::Receiver<AgentCommand>,
        state_tx: watch::Sender<AgentState>,
    ) -> Self {
        let (report_tx, report_rx) = mpsc::channel(16);
        let (refresh_tx, _) = watch::channel(DEFAULT_INTERVAL);
        let (monitors_tx, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            agent,
            command_rx,
            report_tx,
            report_rx,
            state_tx,
            refresh_tx,
            monitors_tx,
            monitor_tasks: Vec::new(),
            drift_tasks: Vec::new(),
            shutdown_waiters: Vec::new(),
        }
    }

    #[instrument(skip_all, name = "agent")]
    pub async fn run(mut self) {
        info!("agent started");
        self.set_state(AgentState::ConfigLoading);

        let Some(config) = self.load_config().await else {
            self.finish().await;
            return;
        };

        let refresh = config.refresh_interval();
        info!("initial refresh interval set to {refresh:?}");
        self.refresh_tx.send_replace(refresh);

        let monitors = self.fetch_monitors().await.unwrap_or_else(|| {
            warn!("starting without monitors until the monitor list can be fetched");
            Vec::new()
        });
        self.start_monitors(monitors);
        self.start_drift_tasks();
        self.set_state(AgentState::Monitoring);

        loop {
            tokio::select! {
                biased;

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(AgentCommand::Restart { respond_to }) => {
                            debug!("received Restart command");
                            self.restart_requested().await;
                            let _ = respond_to.send(());
                        }

                        Some(AgentCommand::Status { respond_to }) => {
                            let _ = respond_to.send(self.status());
                        }

                        Some(AgentCommand::Shutdown { respond_to }) => {
                            debug!("received shutdown command");
                            self.shutdown_waiters.push(respond_to);
                            break;
                        }

                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }

                Some(report) = self.report_rx.recv() => {
                    self.apply(report).await;
                }
            }
        }

        self.finish().await;
    }

    /// Fetch the config until it succeeds; `None` if asked to stop first
    async fn load_config(&mut self) -> Option<RemoteConfig> {
        let client = self.agent.client.clone();
        let retry = self.agent.retry;
        let pause = self.agent.config_retry_interval;

        let load = async move {
            loop {
                match retry.run("fetching config", || client.fetch_config()).await {
                    Ok(config) => return config,
                    Err(_) => {
                        warn!("config unavailable, trying again in {pause:?}");
                        tokio::time::sleep(pause).await;
                    }
                }
            }
        };
        tokio::pin!(load);

        loop {
            tokio::select! {
                config = &mut load => return Some(config),

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(AgentCommand::Shutdown { respond_to }) => {
                            debug!("received shutdown command while loading config");
                            self.shutdown_waiters.push(respond_to);
                            return None;
                        }

                        Some(AgentCommand::Restart { respond_to }) => {
                            debug!("nothing to restart before monitoring started");
                            let _ = respond_to.send(());
                        }

                        Some(AgentCommand::Status { respond_to }) => {
                            let _ = respond_to.send(self.status());
                        }

                        None => return None,
                    }
                }
            }
        }
    }

    async fn fetch_monitors(&self) -> Option<Vec<MonitorDescriptor>> {
        let client = &self.agent.client;
        self.agent
            .retry
            .run("fetching monitors", || client.fetch_monitors())
            .await
            .ok()
    }

    async fn apply(&mut self, report: DriftReport) {
        match report {
            DriftReport::RefreshInterval(interval) => {
                if *self.refresh_tx.borrow() == interval {
                    return;
                }
                info!("monitor refresh interval updated to {interval:?}");
                self.refresh_tx.send_replace(interval);
            }

            DriftReport::Monitors(monitors) => {
                if self.monitors_tx.borrow().as_slice() == monitors.as_slice() {
                    debug!("reported monitor list matches the running set");
                    return;
                }
                info!("monitors updated, reconciling");
                self.restart(monitors).await;
            }
        }
    }

    /// Explicit restart: fresh list if the fetch works, otherwise the current one
    async fn restart_requested(&mut self) {
        let monitors = match self.fetch_monitors().await {
            Some(monitors) => monitors,
            None => Vec::clone(&self.monitors_tx.borrow()),
        };
        self.restart(monitors).await;
    }

    async fn restart(&mut self, monitors: Vec<MonitorDescriptor>) {
        info!("restarting monitoring with {} monitors", monitors.len());
        self.set_state(AgentState::Restarting);

        self.stop_monitors().await;
        self.start_monitors(monitors);

        self.set_state(AgentState::Monitoring);
    }

    fn start_monitors(&mut self, monitors: Vec<MonitorDescriptor>) {
        info!("starting {} monitor tasks", monitors.len());
        self.monitor_tasks = monitors
            .iter()
            .cloned()
            .map(|descriptor| {
                MonitorHandle::spawn(
                    descriptor,
                    Arc::clone(&self.agent.executor),
                    Arc::clone(&self.agent.reporter),
                )
            })
            .collect();
        self.monitors_tx.send_replace(Arc::new(monitors));
    }

    /// Returns once every monitor task has finished its in-flight tick and exited
    async fn stop_monitors(&mut self) {
        let tasks = std::mem::take(&mut self.monitor_tasks);
        debug!("stopping {} monitor tasks", tasks.len());
        join_all(tasks.into_iter().map(MonitorHandle::stop)).await;
    }

    fn start_drift_tasks(&mut self) {
        let ctx = DriftContext {
            client: self.agent.client.clone(),
            retry: self.agent.retry,
            refresh_rx: self.refresh_tx.subscribe(),
            active_monitors: self.monitors_tx.subscribe(),
            report_tx: self.report_tx.clone(),
        };

        self.drift_tasks = vec![
            DriftHandle::spawn(DriftKind::Config, ctx.clone()),
            DriftHandle::spawn(DriftKind::Monitors, ctx),
        ];
    }

    async fn finish(&mut self) {
        info!("stopping monitoring");

        let drift_tasks = std::mem::take(&mut self.drift_tasks);
        let drift_stopped = join_all(drift_tasks.into_iter().map(DriftHandle::stop));
        tokio::join!(self.stop_monitors(), drift_stopped);

        self.agent.reporter.drain().await;
        self.set_state(AgentState::Stopped);
        info!("agent stopped");

        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    fn status(&self) -> AgentStatus {
        AgentStatus {
            state: *self.state_tx.borrow(),
            refresh_interval: *self.refresh_tx.borrow(),
            monitors: self
                .monitor_tasks
                .iter()
                .map(|task| task.monitor_id().clone())
                .collect(),
            drift_tasks: self.drift_tasks.len(),
        }
    }

    fn set_state(&self, state: AgentState) {
        debug!("agent state: {state}");
        self.state_tx.send_replace(state);
    }
}

/// Handle for controlling the agent
///
/// Cheap to clone. When every handle is gone the agent stops on its own.
#[derive(Clone)]
pub struct AgentHandle {
    sender: mpsc::Sender<AgentCommand>,
    state_rx: watch::Receiver<AgentState>,
}

impl AgentHandle {
    /// Spawn the lifecycle manager; it starts loading the config right away
    pub fn spawn(agent: Agent) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (state_tx, state_rx) = watch::channel(AgentState::Uninitialized);

        let actor = AgentActor::new(agent, cmd_rx, state_tx);
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            state_rx,
        }
    }

    /// Re-fetch the monitor list and restart every monitor task
    pub async fn restart(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AgentCommand::Restart { respond_to: tx })
            .await
            .context("failed to send Restart command")?;

        rx.await.context("failed to receive restart confirmation")
    }

    pub async fn status(&self) -> Result<AgentStatus> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AgentCommand::Status { respond_to: tx })
            .await
            .context("failed to send Status command")?;

        rx.await.context("failed to receive status")
    }

    /// Stop every task and return once all of them have finished
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(AgentCommand::Shutdown { respond_to: tx })
            .await
            .is_err()
        {
            debug!("agent already stopped");
            return Ok(());
        }

        rx.await.context("failed to receive shutdown confirmation")
    }

    pub fn state(&self) -> AgentState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<AgentState> {
        self.state_rx.clone()
    }
}
