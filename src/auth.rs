//! Bearer token authentication for internal routes.
//!
//! Tokens are configured as `<idAccount>:<idUser>:<token>` entries. A request carrying a
//! known token gets the matching [`Identity`] inserted into its extensions, where handlers
//! pick it up with `Extension<Identity>`. With no tokens configured every request is
//! rejected.

use crate::http::ApiError;
use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::Response,
};
use serde::Serialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

/// The authenticated caller, passed to procedures as `idAccount` / `idUser`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub account_id: i64,
    pub user_id: i64,
}

#[derive(Clone)]
struct TokenEntry {
    token: String,
    identity: Identity,
}

/// Authentication configuration for internal routes.
#[derive(Clone, Default)]
pub struct AuthConfig {
    entries: Vec<TokenEntry>,
}

impl AuthConfig {
    /// Create an AuthConfig from `<idAccount>:<idUser>:<token>` entries.
    pub fn from_entries(entries: Vec<String>) -> Result<Self, String> {
        let mut parsed: Vec<TokenEntry> = Vec::with_capacity(entries.len());
        for entry in entries {
            let entry = entry.trim();
            let mut parts = entry.splitn(3, ':');
            let (Some(account), Some(user), Some(token)) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(
                    "Auth token entries must have the form <idAccount>:<idUser>:<token>".to_string(),
                );
            };

            let account_id = account
                .parse()
                .map_err(|_| format!("Invalid account id '{}' in auth token entry", account))?;
            let user_id = user
                .parse()
                .map_err(|_| format!("Invalid user id '{}' in auth token entry", user))?;
            if token.is_empty() {
                return Err("Empty token value in configuration".to_string());
            }
            if parsed.iter().any(|e| e.token == token) {
                return Err("Duplicate token value in configuration".to_string());
            }

            parsed.push(TokenEntry {
                token: token.to_string(),
                identity: Identity {
                    account_id,
                    user_id,
                },
            });
        }
        Ok(Self { entries: parsed })
    }

    /// Configuration that rejects every request.
    pub fn deny_all() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn token_count(&self) -> usize {
        self.entries.len()
    }

    /// Resolve a token to its identity. Every entry is compared so timing does not
    /// depend on which one matched.
    pub fn verify(&self, provided: &str) -> Option<Identity> {
        let mut found = None;
        for entry in &self.entries {
            if constant_time_eq(provided.as_bytes(), entry.token.as_bytes()) {
                found = Some(entry.identity);
            }
        }
        found
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token_count", &self.entries.len())
            .finish()
    }
}

/// Authentication middleware for internal routes.
pub async fn auth_middleware(
    State(auth_config): State<Arc<AuthConfig>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = match extract_bearer_token(&request) {
        Ok(Some(token)) => token,
        Ok(None) => {
            warn!(path = %request.uri().path(), "Authentication failed: missing token");
            return Err(ApiError::unauthorized("No authentication token provided"));
        }
        Err(reason) => {
            warn!(path = %request.uri().path(), reason = reason, "Authentication failed");
            return Err(ApiError::unauthorized("Invalid authentication token"));
        }
    };

    match auth_config.verify(token) {
        Some(identity) => {
            request.extensions_mut().insert(identity);
            Ok(next.run(request).await)
        }
        None => {
            warn!(token_prefix = %mask_token(token), "Authentication failed: invalid token");
            Err(ApiError::unauthorized("Invalid authentication token"))
        }
    }
}

fn extract_bearer_token(request: &Request<Body>) -> Result<Option<&str>, &'static str> {
    let Some(auth_header) = request.headers().get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let auth_str = auth_header
        .to_str()
        .map_err(|_| "Authorization header contains invalid characters")?;

    let Some(token) = auth_str.strip_prefix("Bearer ") else {
        return Err("Expected 'Bearer <token>'");
    };

    let token = token.trim();
    if token.is_empty() {
        return Ok(None);
    }

    Ok(Some(token))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

fn mask_token(token: &str) -> String {
    match token.get(..3) {
        Some(prefix) if token.len() > 3 => format!("{}***", prefix),
        _ => "***".to_string(),
    }
}
