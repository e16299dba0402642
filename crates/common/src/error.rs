//! Error types shared by the dev server and the E2E harness

use thiserror::Error;

/// Result type alias using the shared Error
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Backend could not be reached or answered with a non-success status
    #[error("Upstream unreachable at {url}: {reason}")]
    UpstreamUnreachable { url: String, reason: String },

    /// Backend demands a login flow the dev harness cannot drive
    #[error("Unsupported auth mode: {0}")]
    UnsupportedAuthMode(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("'{name}' is not allowed in group {group}")]
    NotAllowed { group: String, name: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
