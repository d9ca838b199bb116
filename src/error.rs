use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    // Push channel could not be opened or dropped mid-read
    #[error("transport error: {0}")]
    Transport(String),

    #[error("refresh failed: {0}")]
    RefreshFailed(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// Outcome of resolving a display suffix that did not map to exactly one poll
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no poll id ends with '{0}'")]
    NotFound(String),

    #[error("suffix '{suffix}' matches {} polls", candidates.len())]
    Ambiguous {
        suffix: String,
        candidates: Vec<String>,
    },
}
