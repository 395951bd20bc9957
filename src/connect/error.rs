use std::time::Duration;

use thiserror::Error;

/// Failure talking to the connect service. Never retried.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("connect GET {endpoint} returned {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },
    #[error("connect GET {endpoint} timed out after {timeout:?}")]
    Timeout {
        endpoint: &'static str,
        timeout: Duration,
    },
    #[error("connect GET {endpoint} request failed: {source}")]
    Connect {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("connect GET {endpoint} returned an unexpected body: {reason}")]
    Decode {
        endpoint: &'static str,
        reason: String,
    },
    #[error("failed to build http client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

impl UpstreamError {
    /// Upstream HTTP status, when the call got that far.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Upstream response body, when one was received with a failing status.
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Status { body, .. } => Some(body.as_str()),
            _ => None,
        }
    }

    pub(crate) fn from_reqwest(endpoint: &'static str, timeout: Duration, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { endpoint, timeout }
        } else {
            Self::Connect {
                endpoint,
                source: err,
            }
        }
    }
}
