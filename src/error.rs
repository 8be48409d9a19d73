// ABOUTME: Error types for calls into the media provider
// ABOUTME: Every failure of upload, lookup or render surfaces as a MediaError

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MediaError>;

#[derive(Debug, Error)]
pub enum MediaError {
    /// Credentials are missing or malformed
    #[error("invalid credentials: {0}")]
    Credentials(&'static str),

    /// The local file to upload could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Transport-level failure talking to the provider
    #[error("request to media provider failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a non-success status
    #[error("media provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("unexpected provider response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid asset: {0}")]
    InvalidAsset(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}
