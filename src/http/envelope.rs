//! Response envelopes shared by every API route.
//!
//! ```text
//! { "success": true,  "data": ..., "timestamp": "2024-05-01T12:00:00.000Z" }
//! { "success": false, "error": { "code": "...", "message": "...", "details": ... }, "timestamp": "..." }
//! ```

use axum::Json;
use axum::http::StatusCode;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Serialize)]
pub struct SuccessEnvelope<T> {
    pub success: bool,
    pub data: T,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: ErrorBody,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

impl ErrorEnvelope {
    pub fn new(code: impl Into<String>, message: impl Into<String>, details: Option<JsonValue>) -> Self {
        Self {
            success: false,
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
                details,
            },
            timestamp: timestamp(),
        }
    }
}

/// 200 with the data wrapped in a success envelope.
pub fn ok<T: Serialize>(data: T) -> Json<SuccessEnvelope<T>> {
    Json(SuccessEnvelope {
        success: true,
        data,
        timestamp: timestamp(),
    })
}

/// 201 with the data wrapped in a success envelope.
pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<SuccessEnvelope<T>>) {
    (StatusCode::CREATED, ok(data))
}

/// ISO-8601 UTC timestamp with millisecond precision.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
