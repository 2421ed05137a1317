//! Message types for actor communication
//!
//! 1. **Commands**: sent to one specific actor over its mpsc channel
//! 2. **Reports**: drift tasks tell the lifecycle manager about new remote
//!    values instead of touching shared state themselves
//! 3. **Request/Response**: oneshot channels for queries and confirmations

use std::fmt;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::config::{MonitorDescriptor, MonitorId};

/// What a single monitor tick ended with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A result was produced and handed to the reporter
    Reported,

    /// The probe ran but had nothing to report
    NoResult,

    /// The descriptor cannot be executed (e.g. unknown record type)
    Rejected,
}

/// Commands that can be sent to a monitor task
#[derive(Debug)]
pub enum MonitorCommand {
    /// Run one tick immediately, outside the interval timer
    RunNow {
        respond_to: oneshot::Sender<TickOutcome>,
    },

    /// Finish any in-flight tick, then exit
    Shutdown,
}

/// Commands that can be sent to a drift task
#[derive(Debug)]
pub enum DriftCommand {
    /// Run one check immediately; responds once the check (and its report) is done
    CheckNow { respond_to: oneshot::Sender<()> },

    /// Finish any in-flight check, then exit
    Shutdown,
}

/// New remote values found by a drift task
#[derive(Debug, Clone, PartialEq)]
pub enum DriftReport {
    /// The remote refresh interval differs from the active one
    RefreshInterval(Duration),

    /// The remote monitor list differs from the running set
    Monitors(Vec<MonitorDescriptor>),
}

/// Commands that can be sent to the lifecycle manager
#[derive(Debug)]
pub enum AgentCommand {
    /// Re-fetch the monitor list and restart every monitor task
    Restart { respond_to: oneshot::Sender<()> },

    /// Snapshot of the manager's state
    Status {
        respond_to: oneshot::Sender<AgentStatus>,
    },

    /// Stop every task and confirm once all of them have finished
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Lifecycle of one agent process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Uninitialized,
    ConfigLoading,
    Monitoring,
    Restarting,
    Stopped,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AgentState::Uninitialized => "uninitialized",
            AgentState::ConfigLoading => "config-loading",
            AgentState::Monitoring => "monitoring",
            AgentState::Restarting => "restarting",
            AgentState::Stopped => "stopped",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentStatus {
    pub state: AgentState,

    /// Interval the drift checks currently run on
    pub refresh_interval: Duration,

    /// Ids of the running monitor tasks, in descriptor order
    pub monitors: Vec<MonitorId>,

    /// Number of running drift tasks
    pub drift_tasks: usize,
}
