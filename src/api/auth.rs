//! Authentication endpoints and request-time identity resolution.

use axum::{
    Extension, Json,
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use super::{ApiError, ApiResponse, AppState, MessageResponse};
use crate::store::{CredentialCheck, NewUser, PublicUser, Role};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub token: String,
    pub csrf_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: PublicUser,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub code: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

// ============================================================================
// Middleware
// ============================================================================

/// Identity attached to the request after the session resolved.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: PublicUser,
    pub token: String,
}

/// Resolves `Authorization: Bearer <token>` to a live session, then
/// re-fetches the user record. A missing or locked user invalidates the
/// session exactly like expiry would: the token is dropped and the request
/// is rejected.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(token) = bearer_token(request.headers()) else {
        return Err(ApiError::unauthorized());
    };

    let Some(session) = state.sessions().authenticate(&token).await else {
        return Err(ApiError::unauthorized());
    };

    let user = state.users().get_by_id(&session.user_id).await;
    let Some(user) = user.filter(|u| !u.locked) else {
        state.sessions().revoke(&token).await;
        return Err(ApiError::unauthorized());
    };

    tracing::Span::current().record("user_id", user.username.as_str());
    request.extensions_mut().insert(AuthContext { user, token });
    Ok(next.run(request).await)
}

/// Role gate for the admin router. Runs after `auth_middleware`.
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let is_admin = request
        .extensions()
        .get::<AuthContext>()
        .is_some_and(|ctx| ctx.user.role == Role::Admin);

    if !is_admin {
        return Err(ApiError::Forbidden("Forbidden".to_string()));
    }
    Ok(next.run(request).await)
}

pub(super) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get("Authorization")
        && let Ok(auth_str) = auth_header.to_str()
        && let Some(token) = auth_str.strip_prefix("Bearer ")
    {
        return Some(token.trim().to_string());
    }
    None
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/login
///
/// Both "no such user" and "wrong password" burn one password-hash
/// comparison in the store and answer the same 401.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<ApiResponse<SessionResponse>>, ApiError> {
    if payload.username.is_empty() {
        return Err(ApiError::validation("Username is required"));
    }
    if payload.password.is_empty() {
        return Err(ApiError::validation("Password is required"));
    }

    let check = state
        .users()
        .verify_credentials(&payload.username, &payload.password)
        .await?;

    let user = match check {
        CredentialCheck::Ok(user) => user,
        CredentialCheck::Invalid => {
            metrics::counter!("auth_logins_total", "outcome" => "invalid").increment(1);
            state
                .audit()
                .record(
                    "login_failed",
                    json!({"username": payload.username, "reason": "invalid_credentials"}),
                )
                .await;
            return Err(ApiError::invalid_credentials());
        }
        CredentialCheck::Locked => {
            metrics::counter!("auth_logins_total", "outcome" => "locked").increment(1);
            state
                .audit()
                .record(
                    "login_failed",
                    json!({"username": payload.username, "reason": "locked"}),
                )
                .await;
            return Err(ApiError::invalid_credentials());
        }
    };

    let session = state.sessions().create(&user).await;
    metrics::counter!("auth_logins_total", "outcome" => "success").increment(1);
    state
        .audit()
        .record("login_success", json!({"username": user.username}))
        .await;

    Ok(Json(ApiResponse::success(SessionResponse {
        token: session.token,
        csrf_token: session.csrf_token,
        expires_at: session.expires_at,
        user,
    })))
}

/// POST /api/register
///
/// Invite-gated self-registration: validate the invite, create the user,
/// consume the invite. Losing the consume race after the user exists is an
/// accepted edge; the user stays and the invite error surfaces.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<ApiResponse<SessionResponse>>, ApiError> {
    let code = payload.code.trim().to_string();
    if code.is_empty() {
        state
            .audit()
            .record(
                "register_failed",
                json!({"username": payload.username, "reason": "missing_code"}),
            )
            .await;
        return Err(ApiError::validation("Missing invite code"));
    }

    let invite = match state.invites().peek(&code).await {
        Ok(invite) => invite,
        Err(err) => {
            state
                .audit()
                .record(
                    "register_failed",
                    json!({"username": payload.username, "reason": err.to_string(), "code": code}),
                )
                .await;
            return Err(err.into());
        }
    };

    let user = match state
        .users()
        .create_user(NewUser {
            username: payload.username.clone(),
            password: payload.password,
            role: invite.role,
            created_by: Some(format!("invite:{code}")),
            must_change_password: false,
            locked: false,
        })
        .await
    {
        Ok(user) => user,
        Err(err) => {
            state
                .audit()
                .record(
                    "register_failed",
                    json!({"username": payload.username, "reason": err.to_string()}),
                )
                .await;
            return Err(err.into());
        }
    };

    if let Err(err) = state.invites().consume(&code, &user.username).await {
        state
            .audit()
            .record(
                "register_failed",
                json!({"username": user.username, "reason": err.to_string(), "code": code}),
            )
            .await;
        return Err(err.into());
    }

    let session = state.sessions().create(&user).await;
    state
        .audit()
        .record(
            "user_registered",
            json!({"username": user.username, "code": code}),
        )
        .await;

    Ok(Json(ApiResponse::success(SessionResponse {
        token: session.token,
        csrf_token: session.csrf_token,
        expires_at: session.expires_at,
        user,
    })))
}

/// POST /api/logout
///
/// Revokes the current session only; other sessions of the user stay alive.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    state.sessions().revoke(&ctx.token).await;
    state
        .audit()
        .record("logout", json!({"username": ctx.user.username}))
        .await;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Logged out",
    ))))
}

/// POST /api/change-password
///
/// Re-verifies the old password against the stored hash, then rotates it.
/// Every other session of the user is revoked; the session that
/// authenticated the change survives.
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    if payload.old_password.is_empty() || payload.new_password.is_empty() {
        return Err(ApiError::validation("Missing fields"));
    }
    if payload.old_password == payload.new_password {
        return Err(ApiError::validation(
            "New password must be different from current password",
        ));
    }

    let old_valid = state
        .users()
        .verify_password(&ctx.user.id, &payload.old_password)
        .await?;
    if !old_valid {
        state
            .audit()
            .record(
                "password_change_failed",
                json!({"username": ctx.user.username, "reason": "wrong_old_password"}),
            )
            .await;
        return Err(ApiError::validation("Current password is incorrect"));
    }

    state
        .users()
        .set_password(
            &ctx.user.id,
            &payload.new_password,
            false,
            Some(ctx.user.username.clone()),
        )
        .await?;

    let revoked = state
        .sessions()
        .revoke_others(&ctx.user.id, &ctx.token)
        .await;
    state
        .audit()
        .record(
            "password_changed",
            json!({"username": ctx.user.username, "revoked_sessions": revoked}),
        )
        .await;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Password updated successfully",
    ))))
}

/// GET /api/me
pub async fn me(
    Extension(ctx): Extension<AuthContext>,
) -> Json<ApiResponse<PublicUser>> {
    Json(ApiResponse::success(ctx.user))
}
