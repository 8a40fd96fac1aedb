//! Bounded Retry with Exponential Backoff
//!
//! Every external call (embedding service, reasoning model) runs under
//! this policy: a fixed attempt budget, doubling delay up to a cap,
//! retrying only transient failure classes. Permanent failures (bad
//! arguments, validation rejections) fail fast.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Failure classification for external calls.
#[derive(Debug, thiserror::Error)]
pub enum ExternalError {
    /// Timeouts, connection resets, rate limits, 5xx. Worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Malformed requests, auth failures, unparseable responses. A
    /// retry would repeat the same outcome.
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl ExternalError {
    /// Classify a reqwest error, or an HTTP status when the request
    /// itself succeeded.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::Transient(err.to_string())
        } else {
            Self::Permanent(err.to_string())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status.as_u16() == 429 || status.is_server_error() {
            Self::Transient(format!("HTTP {}: {}", status, body))
        } else {
            Self::Permanent(format!("HTTP {}: {}", status, body))
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Attempt budget and backoff schedule.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails permanently, or the attempt
    /// budget is exhausted.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ExternalError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExternalError>>,
    {
        let mut delay = self.base_delay;
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    warn!(
                        what,
                        attempt,
                        max = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.max_delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
