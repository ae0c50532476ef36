//! Error types for restline operations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::permission::Permission;

/// Error body returned by the platform alongside a non-success status.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApiError {
    /// Platform-specific error code (0 when the body carried none)
    #[serde(default)]
    pub code: u32,
    /// Human readable message
    #[serde(default)]
    pub message: String,
}

impl ApiError {
    /// Parse an error body, falling back to the raw text when it is not JSON.
    pub fn from_body(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_else(|_| Self {
            code: 0,
            message: String::from_utf8_lossy(body).into_owned(),
        })
    }

    /// Map the numeric code onto a known error kind.
    pub fn kind(&self) -> ErrorCode {
        ErrorCode::from_code(self.code)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.code == 0 {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{} (code {})", self.message, self.code)
        }
    }
}

/// Platform error codes the client reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    UnknownChannel,
    UnknownGuild,
    UnknownMessage,
    UnknownWebhook,
    MissingAccess,
    MissingPermissions,
    InvalidWebhookToken,
    InvalidFormBody,
    Other(u32),
}

impl ErrorCode {
    pub fn from_code(code: u32) -> Self {
        match code {
            10003 => ErrorCode::UnknownChannel,
            10004 => ErrorCode::UnknownGuild,
            10008 => ErrorCode::UnknownMessage,
            10015 => ErrorCode::UnknownWebhook,
            50001 => ErrorCode::MissingAccess,
            50013 => ErrorCode::MissingPermissions,
            50027 => ErrorCode::InvalidWebhookToken,
            50035 => ErrorCode::InvalidFormBody,
            other => ErrorCode::Other(other),
        }
    }
}

/// Main error type for restline operations.
#[derive(Error, Debug)]
pub enum RestError {
    /// Caller or configuration bug (bad route compilation, invalid settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Capability missing locally, or the server rejected the caller's authorization
    #[error("Missing permission{}: {message}", permission_suffix(.permission))]
    Permission {
        permission: Option<Permission>,
        message: String,
    },

    /// The addressed resource does not exist
    #[error("Not found: {0}")]
    NotFound(ApiError),

    /// Any other permanent client error
    #[error("Request rejected with status {status}: {error}")]
    Validation { status: u16, error: ApiError },

    /// Rate-limit cooldowns kept recurring past the configured cap
    #[error("Gave up on bucket {bucket} after {attempts} rate-limit cooldowns")]
    ThrottledTimeout { bucket: String, attempts: u32 },

    /// 5xx responses or transport failures after retries were exhausted
    #[error("Server error after {attempts} attempts: {message}")]
    Server {
        status: Option<u16>,
        attempts: u32,
        message: String,
    },

    /// The task was removed before it completed
    #[error("Request cancelled")]
    Cancelled,

    /// A successful body could not be turned into the expected entity
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RestError {
    /// Name the permission on a server-side rejection that did not carry one.
    pub fn with_permission(self, required: Permission) -> Self {
        match self {
            RestError::Permission {
                permission: None,
                message,
            } => RestError::Permission {
                permission: Some(required),
                message,
            },
            other => other,
        }
    }

    /// Whether the error came from rate-limit cooldowns rather than the server.
    pub fn is_throttled_timeout(&self) -> bool {
        matches!(self, RestError::ThrottledTimeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RestError::Cancelled)
    }
}

fn permission_suffix(permission: &Option<Permission>) -> String {
    permission.map(|p| format!(" {}", p)).unwrap_or_default()
}

/// Result type alias for restline operations.
pub type Result<T> = std::result::Result<T, RestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_from_json_body() {
        let error = ApiError::from_body(br#"{"code": 50013, "message": "Missing Permissions"}"#);
        assert_eq!(error.code, 50013);
        assert_eq!(error.kind(), ErrorCode::MissingPermissions);
        assert_eq!(error.to_string(), "Missing Permissions (code 50013)");
    }

    #[test]
    fn test_api_error_from_plain_body() {
        let error = ApiError::from_body(b"upstream exploded");
        assert_eq!(error.code, 0);
        assert_eq!(error.kind(), ErrorCode::Other(0));
        assert_eq!(error.to_string(), "upstream exploded");
    }

    #[test]
    fn test_with_permission_fills_missing_permission() {
        let error = RestError::Permission {
            permission: None,
            message: "Missing Permissions".to_string(),
        }
        .with_permission(Permission::ManageWebhooks);

        match error {
            RestError::Permission { permission, .. } => {
                assert_eq!(permission, Some(Permission::ManageWebhooks))
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_with_permission_leaves_other_errors() {
        let error = RestError::Cancelled.with_permission(Permission::ManageWebhooks);
        assert!(error.is_cancelled());
    }
}
