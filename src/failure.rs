//! Failure classification for remote calls
//!
//! | Failure | Class | Action |
//! |---|---|---|
//! | HTTP 500 / 502 | [`FailureClass::Transient`] | warn, one retry after [`RetryPolicy::delay`] |
//! | HTTP 404 | [`FailureClass::NotFound`] | error, no retry |
//! | HTTP 403 | [`FailureClass::Forbidden`] | error, no retry |
//! | other status | [`FailureClass::Unhandled`] | error, no retry |
//! | no response | [`FailureClass::Network`] | error, no retry |
//!
//! A failed retry is logged and never retried again. The next natural tick
//! of whatever issued the call is the only further attempt.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use tracing::{error, warn};

use crate::client::RemoteError;

/// Delay before the single retry of a transient failure
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    NotFound,
    Forbidden,
    Unhandled,
    Network,
}

impl FailureClass {
    pub fn of(err: &RemoteError) -> Self {
        match err.status() {
            Some(StatusCode::INTERNAL_SERVER_ERROR | StatusCode::BAD_GATEWAY) => {
                FailureClass::Transient
            }
            Some(StatusCode::NOT_FOUND) => FailureClass::NotFound,
            Some(StatusCode::FORBIDDEN) => FailureClass::Forbidden,
            Some(_) => FailureClass::Unhandled,
            None => FailureClass::Network,
        }
    }

    pub fn is_transient(self) -> bool {
        self == FailureClass::Transient
    }
}

/// Log a failed remote call at the level its class calls for
pub fn log_failure(action: &str, err: &RemoteError) -> FailureClass {
    let class = FailureClass::of(err);
    match class {
        FailureClass::Transient => warn!("failed {action}: {err} (transient)"),
        FailureClass::NotFound => error!("failed {action}: {err}: resource not found, check the URL"),
        FailureClass::Forbidden => error!("failed {action}: {err}: access forbidden, check the API key"),
        FailureClass::Unhandled => error!("failed {action}: {err}: unhandled HTTP error"),
        FailureClass::Network => error!("failed {action}: {err}"),
    }
    class
}

/// Retry behavior shared by every remote call site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }

    /// Run `op`, retrying exactly once after [`Self::delay`] if it fails transiently
    pub async fn run<T, F, Fut>(&self, action: &str, mut op: F) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !log_failure(action, &err).is_transient() {
            return Err(err);
        }

        warn!("retrying {action} in {:?}", self.delay);
        tokio::time::sleep(self.delay).await;

        op().await.inspect_err(|err| {
            log_failure(action, err);
            error!("retry of {action} failed, giving up until the next scheduled run");
        })
    }
}
