//! Bounded retry for outbound calls (search, page fetch, language model).
//!
//! Failures are classified into transient (rate limits, server errors, network)
//! and permanent (client errors, unparseable bodies). Only transient failures
//! are retried, with exponential backoff capped at `max_delay`.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Classification of an upstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 429 - transient, retried with a longer base delay
    RateLimited,
    /// 5xx - transient
    ServerError,
    /// 4xx other than 429 - permanent
    ClientError,
    /// Connection refused, timeout, reset - transient
    NetworkError,
    /// Body could not be decoded - permanent
    ParseError,
}

impl FailureKind {
    /// Map an HTTP status code to a failure kind.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => FailureKind::RateLimited,
            400..=499 => FailureKind::ClientError,
            _ => FailureKind::ServerError,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FailureKind::RateLimited | FailureKind::ServerError | FailureKind::NetworkError
        )
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::RateLimited => write!(f, "rate limited"),
            FailureKind::ServerError => write!(f, "server error"),
            FailureKind::ClientError => write!(f, "client error"),
            FailureKind::NetworkError => write!(f, "network error"),
            FailureKind::ParseError => write!(f, "parse error"),
        }
    }
}

/// Error from a call to an external service.
#[derive(Debug, Error)]
#[error("{service} {kind}{}: {message}", status_suffix(.status))]
pub struct UpstreamError {
    /// Short service label used in logs ("serpapi", "jina", "openrouter")
    pub service: &'static str,
    pub kind: FailureKind,
    pub status: Option<u16>,
    pub message: String,
    /// Server-provided delay from a `Retry-After` header
    pub retry_after: Option<Duration>,
}

impl UpstreamError {
    pub fn new(service: &'static str, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            service,
            kind,
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Build an error from a non-success HTTP status and its body.
    pub fn from_status(
        service: &'static str,
        status: u16,
        body: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        Self {
            service,
            kind: FailureKind::from_status(status),
            status: Some(status),
            message: body.into(),
            retry_after,
        }
    }

    /// Build an error from a transport-level reqwest failure.
    pub fn from_reqwest(service: &'static str, err: reqwest::Error) -> Self {
        let kind = if err.is_decode() {
            FailureKind::ParseError
        } else if let Some(status) = err.status() {
            FailureKind::from_status(status.as_u16())
        } else {
            FailureKind::NetworkError
        };
        let prefix = if err.is_timeout() {
            "Request timeout"
        } else if err.is_connect() {
            "Connection failed"
        } else {
            "Request failed"
        };
        Self {
            service,
            kind,
            status: err.status().map(|s| s.as_u16()),
            message: format!("{}: {}", prefix, err),
            retry_after: None,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

/// Parse a `Retry-After` header given in whole seconds.
pub fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Retry policy applied per outbound call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero means single-shot.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Upper bound on any single delay, including `Retry-After` hints
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based) of a failed call.
    pub fn delay_for(&self, error: &UpstreamError, attempt: u32) -> Duration {
        if let Some(hint) = error.retry_after {
            return hint.min(self.max_delay);
        }
        let base = match error.kind {
            FailureKind::RateLimited => self.base_delay.saturating_mul(4),
            _ => self.base_delay,
        };
        base.saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, UpstreamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!("{} succeeded after {} retries", label, attempt);
                    }
                    return Ok(value);
                }
                Err(error) if error.is_transient() && attempt < self.max_retries => {
                    let delay = self.delay_for(&error, attempt);
                    tracing::warn!(
                        "{} attempt {} failed, retrying in {:?}: {}",
                        label,
                        attempt + 1,
                        delay,
                        error
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
