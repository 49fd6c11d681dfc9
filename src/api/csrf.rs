//! Synchronizer-token CSRF protection bound to session identity.
//!
//! Authenticated requests are checked against the secret carried by their
//! session; anonymous mutating requests (login, register) against a secret
//! minted per client identity. The check runs before any handler and fails
//! closed: a missing or mismatched `x-csrf-token` header rejects the request
//! regardless of authentication state. `GET`/`HEAD`/`OPTIONS` are exempt.

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, Method, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::auth::bearer_token;
use super::{ApiError, ApiResponse, AppState};
use crate::constants::auth::{CSRF_COOKIE, CSRF_HEADER};
use crate::services::session::generate_token;

pub struct CsrfGuard {
    enabled: bool,
    /// client identity -> secret, for callers without a session.
    secrets: RwLock<HashMap<String, String>>,
}

impl CsrfGuard {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            secrets: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the secret for an anonymous client identity, minting one on
    /// first use.
    pub async fn token_for(&self, identifier: &str) -> String {
        if let Some(token) = self.secrets.read().await.get(identifier) {
            return token.clone();
        }
        let mut secrets = self.secrets.write().await;
        secrets
            .entry(identifier.to_string())
            .or_insert_with(generate_token)
            .clone()
    }

    pub async fn verify(&self, identifier: &str, provided: &str) -> bool {
        let secrets = self.secrets.read().await;
        secrets
            .get(identifier)
            .is_some_and(|expected| constant_time_eq(expected.as_bytes(), provided.as_bytes()))
    }
}

#[derive(Serialize)]
pub struct CsrfTokenResponse {
    pub token: String,
}

/// Rejects mutating requests whose header token does not match the bound
/// secret. Layered outside the auth middleware so it runs first.
pub async fn csrf_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.csrf().enabled() || !is_mutating(request.method()) {
        return Ok(next.run(request).await);
    }

    let provided = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if provided.is_empty() {
        metrics::counter!("csrf_rejections_total").increment(1);
        return Err(ApiError::Forbidden("Missing CSRF token".to_string()));
    }

    let valid = if let Some(token) = bearer_token(request.headers())
        && let Some(session) = state.sessions().authenticate(&token).await
    {
        constant_time_eq(session.csrf_token.as_bytes(), provided.as_bytes())
    } else {
        state
            .csrf()
            .verify(&client_key(request.headers()), &provided)
            .await
    };

    if !valid {
        metrics::counter!("csrf_rejections_total").increment(1);
        return Err(ApiError::Forbidden("Invalid CSRF token".to_string()));
    }

    Ok(next.run(request).await)
}

/// GET /api/csrf-token
///
/// Mints (or echoes) the caller's token and mirrors it into a cookie the
/// page scripts cannot read.
pub async fn issue_csrf_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let token = if let Some(bearer) = bearer_token(&headers)
        && let Some(session) = state.sessions().authenticate(&bearer).await
    {
        session.csrf_token
    } else {
        state.csrf().token_for(&client_key(&headers)).await
    };

    let secure = state.config().read().await.server.secure_cookies;
    let cookie = format!(
        "{CSRF_COOKIE}={token}; Path=/; HttpOnly; SameSite=Strict{}",
        if secure { "; Secure" } else { "" }
    );

    (
        [(header::SET_COOKIE, cookie)],
        Json(ApiResponse::success(CsrfTokenResponse { token })),
    )
        .into_response()
}

fn is_mutating(method: &Method) -> bool {
    !matches!(method.as_str(), "GET" | "HEAD" | "OPTIONS")
}

/// Client identity for pre-authentication tokens: first `x-forwarded-for`
/// entry, falling back to a fixed local key.
fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "local".to_string())
}

/// Byte-wise comparison without data-dependent early exit.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
