//! Harness errors

use thiserror::Error;

pub type E2eResult<T> = std::result::Result<T, E2eError>;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Server startup failed: {0}")]
    ServerStartup(String),

    #[error("Server health check failed after {0} attempts")]
    ServerHealthCheck(u32),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{operation} returned {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: serde_json::Value,
    },

    #[error("WgPlane error: {0}")]
    Plane(#[from] wgplane_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl E2eError {
    /// Wire error code of a failed call, if any
    pub fn code(&self) -> Option<&str> {
        match self {
            E2eError::Status { body, .. } => body.get("code").and_then(|c| c.as_str()),
            _ => None,
        }
    }
}
