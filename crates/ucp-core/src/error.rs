//! Error types for directory operations.
//!
//! This module provides the single error type shared by every crate in the workspace,
//! a mapping from LDAP result codes onto it, and a structured error body for collaborators
//! that answer over JSON.

use serde::Serialize;
use thiserror::Error;

/// LDAP result code for a missing entry.
pub const LDAP_NO_SUCH_OBJECT: u32 = 32;
/// LDAP result code for a failed simple bind.
pub const LDAP_INVALID_CREDENTIALS: u32 = 49;
/// LDAP result code for an add against an existing dn.
pub const LDAP_ALREADY_EXISTS: u32 = 68;

/// Main error type for directory operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Zero results, or more than one when exactly one was expected
    #[error("Not found: {0}")]
    NotFound(String),

    /// Entry already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Bind rejected the supplied credentials
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Directory could not be reached
    #[error("Directory unreachable: {0}")]
    Unreachable(String),

    /// Operation timed out
    #[error("Timeout waiting for directory: {0}")]
    Timeout(String),

    /// Entry is missing an attribute the core requires
    #[error("Malformed entry: {0}")]
    Malformed(String),

    /// Directory answered with an unexpected result code
    #[error("Directory error ({code}): {message}")]
    Directory {
        /// LDAP result code
        code: u32,
        /// Diagnostic text returned by the server
        message: String,
    },

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Specialized result type for directory operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Structured error response for serialization.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
    /// Optional request ID for tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Error detail structure.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorDetail {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl Error {
    /// Maps a non-success LDAP result code onto the matching error kind.
    #[must_use]
    pub fn from_result_code(code: u32, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            LDAP_NO_SUCH_OBJECT => Self::NotFound(message),
            LDAP_INVALID_CREDENTIALS => Self::InvalidCredentials(message),
            LDAP_ALREADY_EXISTS => Self::AlreadyExists(message),
            _ => Self::Directory { code, message },
        }
    }

    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::AlreadyExists(_) => "ALREADY_EXISTS",
            Self::InvalidCredentials(_) => "INVALID_CREDENTIALS",
            Self::Unreachable(_) => "UNREACHABLE",
            Self::Timeout(_) => "TIMEOUT",
            Self::Malformed(_) => "MALFORMED",
            Self::Directory { .. } => "DIRECTORY_ERROR",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Converts the error into an `ErrorResponse`.
    #[must_use]
    pub fn into_error_response(self) -> ErrorResponse {
        self.into_error_response_with_id(None)
    }

    /// Converts the error into an `ErrorResponse` with a request ID.
    #[must_use]
    pub fn into_error_response_with_id(self, request_id: Option<String>) -> ErrorResponse {
        ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
            },
            request_id,
        }
    }

    /// Returns true if this error points at the infrastructure rather than the caller.
    #[must_use]
    pub const fn should_log(&self) -> bool {
        matches!(
            self,
            Self::InternalError(_)
                | Self::ConfigError(_)
                | Self::Unreachable(_)
                | Self::Malformed(_)
                | Self::Directory { .. }
        )
    }
}

// Conversions from external error types
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::ConfigError(err.to_string())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::ValidationError(err.to_string())
    }
}
