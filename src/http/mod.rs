//! HTTP boundary.
//!
//! Axum router with:
//! - `/health` (no auth, no envelope)
//! - `/api/v1/external/*` public routes
//! - `/api/v1/internal/*` bearer-token protected routes
//! - Uniform success/error envelopes and a single error boundary
//! - Tracing, CORS, gzip, body limit and security headers

pub mod crud;
pub mod envelope;
pub mod error;
pub mod routes;
pub mod server;
pub mod validation;

pub use error::{ApiError, ErrorReporting};
pub use server::{HttpServer, cors_layer};

use crate::auth::{AuthConfig, auth_middleware};
use crate::db::{Connector, Gateway};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, header},
    middleware,
};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};

/// Maximum accepted request body.
pub const BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024;

/// Shared application state
pub struct AppState<C: Connector> {
    pub gateway: Arc<Gateway<C>>,
    pub auth: Arc<AuthConfig>,
    pub reporting: ErrorReporting,
}

impl<C: Connector> AppState<C> {
    pub fn new(gateway: Arc<Gateway<C>>, auth: AuthConfig, reporting: ErrorReporting) -> Self {
        Self {
            gateway,
            auth: Arc::new(auth),
            reporting,
        }
    }
}

impl<C: Connector> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            auth: Arc::clone(&self.auth),
            reporting: self.reporting,
        }
    }
}

/// Build the application router.
pub fn router<C: Connector>(state: AppState<C>, cors: CorsLayer) -> Router {
    let internal = routes::product::internal_router::<C>().route_layer(
        middleware::from_fn_with_state(Arc::clone(&state.auth), auth_middleware),
    );
    let external = routes::product::external_router::<C>();

    let api = Router::new()
        .nest("/external", external)
        .nest("/internal", internal);

    Router::new()
        .merge(routes::health::router::<C>())
        .nest("/api/v1", api)
        .fallback(error::not_found)
        .layer(middleware::from_fn_with_state(
            state.reporting,
            error::error_boundary,
        ))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(CompressionLayer::new())
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
