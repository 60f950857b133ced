//! ServiceNow client error types

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::models::ErrorKind;

#[derive(Error, Debug)]
pub enum SnowError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("ServiceNow API error (status {status}) for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    #[error("No data from {url} for {}s", .idle.as_secs())]
    IdleTimeout { url: String, idle: Duration },

    #[error("Failed to parse ServiceNow response from {url}: {source}")]
    Malformed {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Filesystem error at {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Download cancelled")]
    Cancelled,
}

impl SnowError {
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SnowError::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Classification used in failure reports
    pub fn kind(&self) -> ErrorKind {
        match self {
            SnowError::Transport(_) | SnowError::Status { .. } | SnowError::IdleTimeout { .. } => {
                ErrorKind::Remote
            }
            SnowError::Malformed { .. } => ErrorKind::MalformedResponse,
            SnowError::Filesystem { .. } => ErrorKind::Filesystem,
            SnowError::Cancelled => ErrorKind::Cancelled,
        }
    }
}
