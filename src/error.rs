//! Error types for the stored procedure gateway.
//!
//! This module defines all gateway error types using `thiserror`. The gateway never
//! recovers from a failure locally: it attaches diagnostic context, logs, and returns
//! the error to the caller. Mapping to HTTP status codes happens in [`crate::http::error`].

use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DbError {
    /// The connection pool could not be established (or the gateway has been closed).
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    /// Checkout, execution or result shaping failed for a specific procedure call.
    #[error("Database request failed: {procedure}: {message}")]
    Request {
        procedure: String,
        /// Bound parameters after redaction. Safe to log.
        parameters: Map<String, JsonValue>,
        message: String,
        /// SQL Server error number, e.g. 2812 for an unknown procedure
        code: Option<u32>,
    },

    /// Raw driver error, before procedure context has been attached.
    #[error("Database error: {message}")]
    Database { message: String, code: Option<u32> },

    #[error("Timeout: {operation} exceeded {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Canceled: {operation}")]
    Canceled { operation: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a raw database error with an optional server error number.
    pub fn database(message: impl Into<String>, code: Option<u32>) -> Self {
        Self::Database {
            message: message.into(),
            code,
        }
    }

    /// Create a request error for a procedure call.
    pub fn request(
        procedure: impl Into<String>,
        parameters: Map<String, JsonValue>,
        message: impl Into<String>,
        code: Option<u32>,
    ) -> Self {
        Self::Request {
            procedure: procedure.into(),
            parameters,
            message: message.into(),
            code,
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms,
        }
    }

    /// Create a cancellation error.
    pub fn canceled(operation: impl Into<String>) -> Self {
        Self::Canceled {
            operation: operation.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Attach procedure context to a driver-level failure.
    ///
    /// A connection lost during checkout or execution becomes part of the call's failure.
    /// Timeouts, cancellations and input errors keep their own identity so callers can
    /// tell them apart from execution failures.
    pub fn with_procedure(self, procedure: &str, parameters: &Map<String, JsonValue>) -> Self {
        match self {
            Self::Database { message, code } => {
                Self::request(procedure, parameters.clone(), message, code)
            }
            Self::Connection { message, .. } | Self::Internal { message } => {
                Self::request(procedure, parameters.clone(), message, None)
            }
            other => other,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Request {
                code: Some(2812), ..
            } => Some("Check that the stored procedure exists and the name is spelled correctly"),
            Self::Request {
                code: Some(201 | 8144 | 8145),
                ..
            } => Some("Check the parameter names against the procedure definition"),
            _ => None,
        }
    }

    /// SQL Server error number, when the failure came from the server.
    pub fn code(&self) -> Option<u32> {
        match self {
            Self::Request { code, .. } | Self::Database { code, .. } => *code,
            _ => None,
        }
    }

    /// Check if this error is retryable by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Convert tiberius errors to DbError.
impl From<tiberius::error::Error> for DbError {
    fn from(err: tiberius::error::Error) -> Self {
        use tiberius::error::Error as TdsError;

        match err {
            TdsError::Server(token) => DbError::database(token.message(), Some(token.code())),
            TdsError::Io { message, .. } => DbError::connection(
                format!("I/O error: {}", message),
                "Check network connectivity and database server status",
            ),
            TdsError::Tls(message) => DbError::connection(
                format!("TLS error: {}", message),
                "Verify TLS configuration or set trustServerCertificate=true for development servers",
            ),
            TdsError::Routing { host, port } => DbError::connection(
                format!("Server requested routing to {}:{}", host, port),
                "Connect to the routed host directly",
            ),
            other => DbError::database(other.to_string(), None),
        }
    }
}

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        DbError::connection(
            format!("I/O error: {}", err),
            "Check network connectivity and database server status",
        )
    }
}

/// Result type alias for gateway operations.
pub type DbResult<T> = Result<T, DbError>;
