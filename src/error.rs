//! Error types for the financial document analyzer

use crate::models::Report;
use crate::tools::{ToolError, ToolErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for analyzer operations
pub type Result<T> = std::result::Result<T, AnalysisError>;

#[derive(Error, Debug)]
pub enum AnalysisError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Analysis cancelled")]
    Cancelled { report: Box<Report> },

    // =============================
    // Jobs & Storage
    // =============================

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Analysis record not found: {0}")]
    RecordNotFound(Uuid),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),
}

/// Machine-readable failure kind carried by every user-visible error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    VerificationFailed,
    Unavailable,
    Timeout,
    InvalidInput,
    Cancelled,
    NotFound,
    Conflict,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::VerificationFailed => "verification_failed",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ToolErrorKind> for ErrorKind {
    fn from(kind: ToolErrorKind) -> Self {
        match kind {
            ToolErrorKind::Unavailable => ErrorKind::Unavailable,
            ToolErrorKind::Timeout => ErrorKind::Timeout,
            ToolErrorKind::InvalidInput => ErrorKind::InvalidInput,
        }
    }
}

/// `{kind, message}` pair rendered to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorBody {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl AnalysisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::Validation(_) => ErrorKind::ValidationError,
            AnalysisError::Tool(e) => e.kind.into(),
            AnalysisError::Cancelled { .. } => ErrorKind::Cancelled,
            AnalysisError::JobNotFound(_) | AnalysisError::RecordNotFound(_) => {
                ErrorKind::NotFound
            }
            AnalysisError::Conflict(_) => ErrorKind::Conflict,
            _ => ErrorKind::InternalError,
        }
    }

    /// Internal failures are reported generically; details stay in the logs.
    pub fn to_body(&self) -> ErrorBody {
        let kind = self.kind();
        let message = match kind {
            ErrorKind::InternalError => "An unexpected error occurred".to_string(),
            _ => self.to_string(),
        };
        ErrorBody { kind, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            AnalysisError::Validation("bad".into()).kind(),
            ErrorKind::ValidationError
        );
        assert_eq!(
            AnalysisError::Tool(ToolError::timeout("slow")).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            AnalysisError::JobNotFound(Uuid::nil()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            AnalysisError::Storage("disk".into()).kind(),
            ErrorKind::InternalError
        );
    }

    #[test]
    fn test_internal_body_hides_details() {
        let body = AnalysisError::Database("password=hunter2".into()).to_body();
        assert_eq!(body.kind, ErrorKind::InternalError);
        assert!(!body.message.contains("hunter2"));

        let body = AnalysisError::Validation("File must be a PDF".into()).to_body();
        assert!(body.message.contains("File must be a PDF"));
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::VerificationFailed).unwrap();
        assert_eq!(json, "\"verification_failed\"");
    }
}
