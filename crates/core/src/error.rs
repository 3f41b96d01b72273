//! Error taxonomy shared by every core component.
//!
//! Internal code returns [`AppError`]; anything crossing the service boundary is
//! rendered into an [`ErrorResponse`] that pairs a stable [`ErrorKind`] with a
//! human-readable message and an optional remediation suggestion.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the registry, planner, recipe validator and orchestrator.
#[derive(Debug, Clone, Error)]
pub enum AppError {
    /// Bad input shape, cyclic recipe, unreachable target.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        suggestion: Option<String>,
    },

    /// A size, time or memory budget was exceeded.
    #[error("Resource limit exceeded: {0}")]
    ResourceLimit(String),

    /// An external capability failed or produced unusable output.
    #[error("Tool error ({tool}): {message}")]
    Tool {
        tool: String,
        message: String,
        stderr: Option<String>,
    },

    /// Filesystem failure reading an input or writing an artifact.
    #[error("I/O error at {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// User-initiated stop.
    #[error("Operation canceled")]
    Canceled,

    /// Persistence of job/artifact records failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Creates a validation error without a suggestion.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            suggestion: None,
        }
    }

    /// Creates a validation error with a remediation hint.
    pub fn validation_with(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }

    /// Creates a tool error.
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
            stderr: None,
        }
    }

    /// Creates a tool error carrying captured stderr.
    pub fn tool_with_stderr(
        tool: impl Into<String>,
        message: impl Into<String>,
        stderr: Option<String>,
    ) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
            stderr,
        }
    }

    /// Creates an I/O error bound to a path.
    pub fn io(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Returns the boundary kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::ValidationError,
            Self::ResourceLimit(_) => ErrorKind::ResourceLimit,
            Self::Tool { .. } => ErrorKind::ToolError,
            Self::Io { .. } => ErrorKind::IoError,
            Self::Canceled => ErrorKind::Canceled,
            Self::Database(_) => ErrorKind::DatabaseError,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a step failing with this error may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Tool { .. } | Self::Io { .. })
    }

    /// Converts into the boundary representation.
    pub fn to_response(&self) -> ErrorResponse {
        let message = match self {
            Self::Validation { message, .. } => message.clone(),
            other => other.to_string(),
        };

        let suggestion = match self {
            Self::Validation { suggestion, .. } => suggestion
                .clone()
                .or_else(|| Some("Check the request parameters".to_string())),
            Self::ResourceLimit(_) => {
                Some("Split the input or lower the quality settings".to_string())
            }
            Self::Tool { tool, .. } => Some(format!(
                "Check that '{}' is installed and runs correctly",
                tool
            )),
            Self::Io { .. } => Some("Check the file path and permissions".to_string()),
            Self::Canceled => {
                Some("Submit the job again; canceled jobs cannot be retried".to_string())
            }
            Self::Database(_) | Self::Internal(_) => None,
        };

        ErrorResponse {
            kind: self.kind(),
            message,
            suggestion,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::new(),
            message: err.to_string(),
        }
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization failed: {}", err))
    }
}

/// Stable error kinds exposed across the service boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ValidationError,
    ResourceLimit,
    ToolError,
    IoError,
    Canceled,
    DatabaseError,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::ResourceLimit => "RESOURCE_LIMIT",
            Self::ToolError => "TOOL_ERROR",
            Self::IoError => "IO_ERROR",
            Self::Canceled => "CANCELED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::Internal => "INTERNAL",
        }
    }
}

/// Error payload sent to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl From<AppError> for ErrorResponse {
    fn from(err: AppError) -> Self {
        err.to_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
