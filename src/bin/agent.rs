use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::Parser;
use nemea_agent::{
    actors::agent::{Agent, AgentHandle},
    config::AgentSettings,
    util::{get_error_log, get_log_level},
};
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{Layer, filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Env file to load settings from (defaults to ./.env when present)
    #[arg(short, long)]
    env_file: Option<PathBuf>,

    /// File that receives error-level log lines
    #[arg(long)]
    error_log: Option<PathBuf>,
}

/// Events of the library and of this binary both carry the `nemea_agent` target
fn log_filter(level: LevelFilter) -> filter::Targets {
    filter::Targets::new().with_target("nemea_agent", level)
}

fn init(error_log: Option<PathBuf>) -> anyhow::Result<()> {
    let filter = log_filter(get_log_level());

    let error_layer = match error_log {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_filter(LevelFilter::ERROR),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false)
                .with_filter(filter),
        )
        .with(error_layer)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    match &args.env_file {
        Some(path) => {
            dotenv::from_path(path)?;
        }
        None => {
            dotenv::dotenv().ok();
        }
    }

    init(args.error_log.clone().or_else(get_error_log))?;
    trace!("started with args: {args:?}");

    let settings = AgentSettings::from_env()?;
    let agent = AgentHandle::spawn(Agent::from_settings(&settings)?);

    let signal = wait_for_termination().await?;
    info!("{signal} received, stopping agent gracefully");

    agent.shutdown().await?;
    info!("agent stopped, exiting");

    Ok(())
}

/// SIGINT and SIGTERM both lead to the same graceful stop
#[cfg(unix)]
async fn wait_for_termination() -> anyhow::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            Ok("SIGINT")
        }
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() -> anyhow::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
