//! API error type and the error boundary.
//!
//! Every failure a handler returns becomes an [`ApiError`]. Its `IntoResponse` impl is
//! the only place that maps errors to status codes and public messages. The response
//! carries an [`ErrorContext`] extension that [`error_boundary`] picks up to log the
//! failure once, and in development mode to attach debug details.

use crate::error::DbError;
use crate::http::envelope::ErrorEnvelope;
use crate::http::validation::FieldError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request validation failed")]
    Validation(Vec<FieldError>),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    MethodNotAllowed(String),

    #[error(transparent)]
    Db(#[from] DbError),
}

impl ApiError {
    pub fn validation(errors: Vec<FieldError>) -> Self {
        Self::Validation(errors)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::Db(e) => match e {
                DbError::Connection { .. } => StatusCode::SERVICE_UNAVAILABLE,
                DbError::Request { .. } | DbError::Database { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                DbError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                DbError::Canceled { .. } => StatusCode::SERVICE_UNAVAILABLE,
                DbError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
                DbError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::MethodNotAllowed(_) => "METHOD_NOT_ALLOWED",
            Self::Db(e) => match e {
                DbError::Connection { .. } => "DATABASE_UNAVAILABLE",
                DbError::Request { .. } | DbError::Database { .. } => "DATABASE_ERROR",
                DbError::Timeout { .. } => "TIMEOUT",
                DbError::Canceled { .. } => "CANCELED",
                DbError::InvalidInput { .. } => "BAD_REQUEST",
                DbError::Internal { .. } => "INTERNAL_SERVER_ERROR",
            },
        }
    }

    /// Message safe to show to any client. Database internals stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(_)
            | Self::Unauthorized(_)
            | Self::NotFound(_)
            | Self::MethodNotAllowed(_) => self.to_string(),
            Self::Db(e) => match e {
                DbError::Connection { .. } => "Database is unavailable".to_string(),
                DbError::Request { .. } | DbError::Database { .. } => {
                    "Database request failed".to_string()
                }
                DbError::Timeout { .. } => "The database did not respond in time".to_string(),
                DbError::Canceled { .. } => "The request was canceled".to_string(),
                DbError::InvalidInput { message } => message.clone(),
                DbError::Internal { .. } => "An unexpected error occurred".to_string(),
            },
        }
    }

    fn details(&self) -> Option<JsonValue> {
        match self {
            Self::Validation(errors) => serde_json::to_value(errors).ok(),
            _ => None,
        }
    }
}

/// Attached to every error response for the error boundary.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub envelope: ErrorEnvelope,
    /// Full error text, for logs and development responses.
    pub debug: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let envelope = ErrorEnvelope::new(self.code(), self.public_message(), self.details());
        let context = ErrorContext {
            envelope: envelope.clone(),
            debug: format!("{:?}", self),
        };

        let mut response = (status, Json(envelope)).into_response();
        response.extensions_mut().insert(context);
        response
    }
}

/// Error boundary settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorReporting {
    /// Include debug details in error responses.
    pub development: bool,
}

/// Log every error response once and, in development mode, expose its details.
pub async fn error_boundary(
    State(reporting): State<ErrorReporting>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let mut response = next.run(request).await;
    let Some(context) = response.extensions_mut().remove::<ErrorContext>() else {
        return response;
    };

    let status = response.status();
    if status.is_server_error() {
        error!(
            code = %context.envelope.error.code,
            message = %context.envelope.error.message,
            method = %method,
            path = %path,
            status = status.as_u16(),
            error = %context.debug,
            "Request failed"
        );
    } else {
        warn!(
            code = %context.envelope.error.code,
            message = %context.envelope.error.message,
            method = %method,
            path = %path,
            status = status.as_u16(),
            "Request rejected"
        );
    }

    if reporting.development && context.envelope.error.details.is_none() {
        let mut envelope = context.envelope;
        envelope.error.details = Some(JsonValue::String(context.debug));
        return (status, Json(envelope)).into_response();
    }

    response
}

/// Fallback for unmatched routes.
pub async fn not_found(request: Request<Body>) -> ApiError {
    ApiError::not_found(format!(
        "Route {} {} not found",
        request.method(),
        request.uri().path()
    ))
}

/// Fallback for a known route called with an unsupported method.
pub async fn method_not_allowed(request: Request<Body>) -> ApiError {
    ApiError::MethodNotAllowed(format!(
        "Method {} is not allowed on {}",
        request.method(),
        request.uri().path()
    ))
}
