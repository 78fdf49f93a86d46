//! Error types shared by the GC engine and its storage collaborators.

use thiserror::Error;

/// Error codes reported by stores, resolvers and the GC engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Lookup failures
    NamespaceNotFound,
    RefNotFound,
    BlobNotFound,

    // Transient backend failures
    ServiceUnavailable,
    OperationTimedOut,

    // Engine errors
    Cancelled,
    InvalidConfiguration,
    InternalError,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NamespaceNotFound => "NamespaceNotFound",
            ErrorCode::RefNotFound => "RefNotFound",
            ErrorCode::BlobNotFound => "BlobNotFound",
            ErrorCode::ServiceUnavailable => "ServiceUnavailable",
            ErrorCode::OperationTimedOut => "OperationTimedOut",
            ErrorCode::Cancelled => "Cancelled",
            ErrorCode::InvalidConfiguration => "InvalidConfiguration",
            ErrorCode::InternalError => "InternalError",
        }
    }

    /// Returns the default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::NamespaceNotFound => "The specified namespace is not configured.",
            ErrorCode::RefNotFound => "The specified ref does not exist.",
            ErrorCode::BlobNotFound => "The specified blob does not exist.",
            ErrorCode::ServiceUnavailable => "The backing store is temporarily unavailable.",
            ErrorCode::OperationTimedOut => "The operation timed out.",
            ErrorCode::Cancelled => "The operation was cancelled.",
            ErrorCode::InvalidConfiguration => "The configuration is invalid.",
            ErrorCode::InternalError => "An internal error occurred.",
        }
    }

    /// Returns true for codes that mean the target record is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ErrorCode::NamespaceNotFound | ErrorCode::RefNotFound | ErrorCode::BlobNotFound
        )
    }

    /// Returns true for codes that are expected to clear on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorCode::ServiceUnavailable | ErrorCode::OperationTimedOut
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage error with code and message.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct StorageError {
    pub code: ErrorCode,
    pub message: String,
}

impl StorageError {
    /// Creates a new storage error with the given code and default message.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            message: code.default_message().to_string(),
            code,
        }
    }

    /// Creates a new storage error with a custom message.
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code.is_not_found()
    }

    pub fn is_transient(&self) -> bool {
        self.code.is_transient()
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::with_message(ErrorCode::InternalError, err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::with_message(ErrorCode::InvalidConfiguration, err.to_string())
    }
}

/// Result type alias for storage and GC operations.
pub type StorageResult<T> = Result<T, StorageError>;
