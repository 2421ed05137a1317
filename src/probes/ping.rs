//! Reachability probe
//!
//! A single attempt is delegated to the system `ping` binary, which already
//! holds the privileges needed for ICMP.

use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::trace;

use super::ProbeError;

static ROUND_TRIP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time[=<]\s*([0-9]+(?:\.[0-9]+)?)\s*ms").expect("round trip pattern is valid")
});

/// One reachability attempt against a host
#[async_trait]
pub trait Pinger: Send + Sync {
    /// `Some(round trip ms)` when the host answered, `None` when it did not
    async fn probe(&self, host: &str) -> Result<Option<f64>, ProbeError>;
}

/// [`Pinger`] that shells out to `ping` with a single echo request
#[derive(Debug, Clone)]
pub struct SystemPinger {
    pub timeout: Duration,
}

impl Default for SystemPinger {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
        }
    }
}

impl SystemPinger {
    fn command(&self, host: &str) -> Command {
        let mut command = Command::new("ping");
        command.arg("-n").arg("-c").arg("1");

        #[cfg(target_os = "macos")]
        command
            .arg("-W")
            .arg(self.timeout.as_millis().max(1).to_string());
        #[cfg(not(target_os = "macos"))]
        command
            .arg("-W")
            .arg(self.timeout.as_secs().max(1).to_string());

        command
            .arg(host)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Pinger for SystemPinger {
    async fn probe(&self, host: &str) -> Result<Option<f64>, ProbeError> {
        validate_host(host)?;

        let output = self.command(host).output().await?;
        if !output.status.success() {
            trace!("ping {host} exited with {}", output.status);
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_round_trip(&stdout))
    }
}

/// Reject hosts that `ping` would read as options or split into arguments
pub fn validate_host(host: &str) -> Result<(), ProbeError> {
    if host.is_empty() || host.starts_with('-') || host.chars().any(char::is_whitespace) {
        return Err(ProbeError::InvalidConfig(format!("invalid ping host: {host:?}")));
    }
    Ok(())
}

/// Extract the round trip time from `ping` output
pub fn parse_round_trip(output: &str) -> Option<f64> {
    ROUND_TRIP
        .captures(output)
        .and_then(|captures| captures.get(1))
        .and_then(|time| time.as_str().parse().ok())
}
