//! Error types for WgPlane

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using WgPlane Error
pub type Result<T> = std::result::Result<T, Error>;

/// WgPlane error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Resource already exists: {kind} with id {id}")]
    AlreadyExists { kind: String, id: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// A host command exited unsuccessfully or could not be spawned.
    #[error("command failed: {command}: {message}")]
    Command { command: String, message: String },

    /// A delegated call to the privileged daemon failed in transport.
    #[error("RPC {operation} failed: {message}")]
    Rpc { operation: String, message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn already_exists(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Error::AlreadyExists {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Stable machine-readable code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::AlreadyExists { .. } => "already_exists",
            Error::Forbidden(_) => "forbidden",
            Error::Unauthenticated(_) => "unauthenticated",
            Error::Unsupported(_) => "unsupported",
            Error::Validation(_) => "validation",
            Error::Command { .. } => "command_failed",
            Error::Cancelled => "cancelled",
            Error::Timeout { .. } => "timeout",
            _ => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::AlreadyExists { .. } => StatusCode::CONFLICT,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Error::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Cancelled => StatusCode::REQUEST_TIMEOUT,
            Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::Command { .. } | Error::Rpc { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        let (kind, id) = match self {
            Error::NotFound { kind, id } | Error::AlreadyExists { kind, id } => {
                (Some(kind.clone()), Some(id.clone()))
            }
            _ => (None, None),
        };
        let message = match self {
            Error::Forbidden(msg)
            | Error::Unauthenticated(msg)
            | Error::Unsupported(msg)
            | Error::Validation(msg) => msg.clone(),
            _ => self.to_string(),
        };
        ErrorBody {
            code: self.code().to_string(),
            message,
            kind,
            id,
        }
    }

    /// Rebuild an error received from a remote WgPlane server, keeping its class.
    pub fn from_body(operation: &str, body: ErrorBody) -> Self {
        let kind = body.kind.unwrap_or_default();
        let id = body.id.unwrap_or_default();
        match body.code.as_str() {
            "not_found" => Error::NotFound { kind, id },
            "already_exists" => Error::AlreadyExists { kind, id },
            "forbidden" => Error::Forbidden(body.message),
            "unauthenticated" => Error::Unauthenticated(body.message),
            "unsupported" => Error::Unsupported(body.message),
            "validation" => Error::Validation(body.message),
            "cancelled" => Error::Cancelled,
            _ => Error::Rpc {
                operation: operation.to_string(),
                message: body.message,
            },
        }
    }
}

/// JSON error payload shared by every WgPlane HTTP surface
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "{}", self);
        }
        (status, Json(self.to_body())).into_response()
    }
}
