//! Health check endpoint.

use crate::db::{Connector, PoolStatus};
use crate::http::AppState;
use crate::http::envelope::timestamp;
use crate::http::error::method_not_allowed;
use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

pub const SERVICE_NAME: &str = "lovecakes-backend";

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub timestamp: String,
    pub database: PoolStatus,
}

/// GET /health
///
/// Never touches the database; reports the pool as it currently is.
async fn health<C: Connector>(State(state): State<AppState<C>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: SERVICE_NAME,
        timestamp: timestamp(),
        database: state.gateway.status(),
    })
}

/// Health routes
pub fn router<C: Connector>() -> Router<AppState<C>> {
    Router::new()
        .route("/health", get(health::<C>))
        .method_not_allowed_fallback(method_not_allowed)
}
