use std::fmt;

use axum::http::StatusCode;
use thiserror::Error;

/// Which half of the generate-then-parse pipeline a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Generate,
    Parse,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Parse => "parse",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum DatafactError {
    #[error("config error: {0}")]
    Config(String),

    #[error("server misconfigured: {0}")]
    Misconfigured(String),

    #[error("{0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited by {provider}")]
    RateLimited { provider: String },

    #[error("upstream error from {provider}: {message}")]
    Upstream {
        provider: String,
        message: String,
        status: Option<u16>,
    },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("empty response from {provider}")]
    EmptyResponse { provider: String },

    #[error("malformed response from {provider}: {message}")]
    MalformedResponse { provider: String, message: String },

    #[error("{provider} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        provider: String,
        attempts: u32,
        #[source]
        source: Box<DatafactError>,
    },

    #[error("{stage} stage failed: {source}")]
    Stage {
        index: usize,
        stage: Stage,
        #[source]
        source: Box<DatafactError>,
    },

    #[error("scrape failed: {0}")]
    Scrape(String),

    #[error("{0}")]
    Other(String),
}

impl DatafactError {
    /// Returns true for transient errors that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Upstream { status, .. } => {
                // 5xx = server error (retryable), 4xx = client error (not retryable)
                status.is_some_and(|s| s >= 500)
            }
            Self::Request(_) => true,
            Self::EmptyResponse { .. } => true,
            Self::MalformedResponse { .. } => true,
            _ => false,
        }
    }

    /// Stage tag for pipeline failures.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// HTTP status for request-level failures. Task-level failures never
    /// reach this: they are folded into the batch response body.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Config(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. }
            | Self::Upstream { .. }
            | Self::Request(_)
            | Self::EmptyResponse { .. }
            | Self::MalformedResponse { .. }
            | Self::RetriesExhausted { .. } => StatusCode::BAD_GATEWAY,
            Self::Misconfigured(_) | Self::Stage { .. } | Self::Scrape(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe for returning to callers. Does not leak API keys that
    /// reqwest may embed in request URLs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Request(e) => {
                if e.is_timeout() {
                    "request to upstream timed out".to_string()
                } else if e.is_connect() {
                    "could not connect to upstream".to_string()
                } else {
                    "request to upstream failed".to_string()
                }
            }
            Self::RetriesExhausted {
                provider,
                attempts,
                source,
            } => format!(
                "{provider} failed after {attempts} attempts: {}",
                source.user_message()
            ),
            Self::Stage { stage, source, .. } => {
                format!("{stage} stage failed: {}", source.user_message())
            }
            other => other.to_string(),
        }
    }
}
