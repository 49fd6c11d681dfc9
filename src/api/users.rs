//! Administrative user management.
//!
//! All handlers here sit behind `require_admin`. The last remaining
//! administrator can neither be deleted, demoted, nor locked; the store does
//! not enforce that invariant itself, the callers do.

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::auth::AuthContext;
use super::{ApiError, ApiResponse, AppState, MessageResponse};
use crate::store::{NewUser, PublicUser, Role, UserPatch};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub must_change_password: Option<bool>,
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub password: String,
}

/// GET /api/users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Vec<PublicUser>>> {
    Json(ApiResponse::success(state.users().list_users().await))
}

/// POST /api/users
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<Json<ApiResponse<PublicUser>>, ApiError> {
    let user = state
        .users()
        .create_user(NewUser {
            username: payload.username,
            password: payload.password,
            role: payload.role.unwrap_or(Role::User),
            created_by: Some(ctx.user.username.clone()),
            must_change_password: payload.must_change_password.unwrap_or(false),
            locked: false,
        })
        .await?;

    state
        .audit()
        .record(
            "user_created",
            json!({"username": user.username, "createdBy": ctx.user.username}),
        )
        .await;

    Ok(Json(ApiResponse::success(user)))
}

/// PATCH /api/users/{id}
///
/// Partial patch of role / locked / mustChangePassword. Locking cascades
/// into session revocation so a locked account cannot keep an open session.
pub async fn patch_user(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(patch): Json<UserPatch>,
) -> Result<Json<ApiResponse<PublicUser>>, ApiError> {
    let target = state
        .users()
        .get_by_id(&id)
        .await
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let demoting = target.role == Role::Admin && patch.role == Some(Role::User);
    let locking = !target.locked && patch.locked == Some(true);
    if (demoting || (locking && target.role == Role::Admin))
        && state.users().count_admins().await <= 1
    {
        return Err(ApiError::Conflict(
            "Cannot demote or lock the last administrator".to_string(),
        ));
    }

    let updated = state
        .users()
        .update_user(&id, patch, Some(ctx.user.username.clone()))
        .await?;

    if updated.locked && !target.locked {
        state.sessions().revoke_all_for_user(&id).await;
    }

    state
        .audit()
        .record(
            "user_patched",
            json!({"username": updated.username, "updatedBy": ctx.user.username}),
        )
        .await;

    Ok(Json(ApiResponse::success(updated)))
}

/// PUT /api/users/{id}/password
///
/// Administrative reset: the new password reaches the user out of band, so
/// the account is flagged for a forced change and every session dies.
pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<ApiResponse<PublicUser>>, ApiError> {
    let updated = state
        .users()
        .set_password(&id, &payload.password, true, Some(ctx.user.username.clone()))
        .await?;

    state.sessions().revoke_all_for_user(&id).await;

    state
        .audit()
        .record(
            "password_reset",
            json!({"username": updated.username, "resetBy": ctx.user.username}),
        )
        .await;

    Ok(Json(ApiResponse::success(updated)))
}

/// DELETE /api/users/{id}
///
/// Cascades into session revocation. Invites the user consumed keep their
/// `usedBy` reference: the code stays burned and the audit trail intact.
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let target = state
        .users()
        .get_by_id(&id)
        .await
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    if target.role == Role::Admin && state.users().count_admins().await <= 1 {
        return Err(ApiError::Conflict(
            "Cannot delete the last administrator".to_string(),
        ));
    }

    state.users().remove_user(&id).await?;
    state.sessions().revoke_all_for_user(&id).await;

    state
        .audit()
        .record(
            "user_deleted",
            json!({"username": target.username, "deletedBy": ctx.user.username}),
        )
        .await;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "User deleted",
    ))))
}
