//! Error types shared by the upstream sources and the feed engine.

use std::time::Duration;

/// Failure of a single upstream query.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid request URL: {0}")]
    Url(String),

    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("upstream reported failure: {0}")]
    Upstream(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("fetch task did not complete: {0}")]
    Task(String),
}

/// A [`FetchError`] attributed to the source key that produced it.
///
/// These are collected per cycle and handed to the cycle observer; they
/// never reach readers of the published feed.
#[derive(Debug, thiserror::Error)]
#[error("source {source_key}: {error}")]
pub struct SourceError {
    pub source_key: String,
    #[source]
    pub error: FetchError,
}

impl SourceError {
    pub fn new(source_key: impl Into<String>, error: FetchError) -> Self {
        Self {
            source_key: source_key.into(),
            error,
        }
    }
}
