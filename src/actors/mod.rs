//! Actor-based task scheduling
//!
//! Every periodic task runs as an independent tokio task, controlled through
//! a handle that wraps its command channel.
//!
//! ## Architecture Overview
//!
//! ```text
//!                     ┌──────────────────┐
//!        Restart ───▶ │    AgentActor    │ ◀─── Shutdown (signal)
//!        Status       │ (lifecycle mgr)  │
//!                     └────────┬─────────┘
//!            spawns / stops    │    ▲ DriftReport (mpsc)
//!          ┌───────────────────┼────┴──────────────┐
//!          │                   │                   │
//!  ┌───────▼───────┐   ┌───────▼───────┐   ┌───────▼────────┐
//!  │ MonitorActor  │   │ DriftActor    │   │ DriftActor     │
//!  │ (one per      │   │ (config)      │   │ (monitors)     │
//!  │  monitor)     │   └───────────────┘   └────────────────┘
//!  └───────┬───────┘        ▲ watch: refresh interval, running set
//!          │ MonitorResult
//!  ┌───────▼───────┐
//!  │   Reporter    │ ──▶ ingest endpoint
//!  └───────────────┘
//! ```
//!
//! ## Actor Types
//!
//! - **AgentActor**: owns all task handles and the refresh interval, runs the lifecycle state machine
//! - **MonitorActor**: probes one monitor on its own interval and reports results
//! - **DriftActor**: re-fetches config or monitors and reports differences
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Reports**: Drift actors send new remote values to the AgentActor
//! 3. **Published state**: watch channels for values other actors only read
//! 4. **Request/Response**: oneshot channels for queries and confirmations

pub mod agent;
pub mod drift;
pub mod messages;
pub mod monitor;
