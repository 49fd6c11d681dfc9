//! Administrative invite management.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::auth::AuthContext;
use super::{ApiError, ApiResponse, AppState, MessageResponse};
use crate::store::invite::DEFAULT_EXPIRES_IN_HOURS;
use crate::store::{InviteDetails, NewInvite, Role};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListInvitesQuery {
    #[serde(default = "default_include_expired")]
    pub include_expired: bool,
}

const fn default_include_expired() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInviteRequest {
    #[serde(default)]
    pub role: Option<Role>,
    /// Hours until expiry; 0 means the invite never expires. Default 72.
    #[serde(default)]
    pub expires_in_hours: Option<u32>,
    #[serde(default)]
    pub note: Option<String>,
}

/// GET /api/invites
pub async fn list_invites(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListInvitesQuery>,
) -> Json<ApiResponse<Vec<InviteDetails>>> {
    Json(ApiResponse::success(
        state.invites().list_invites(query.include_expired).await,
    ))
}

/// POST /api/invites
pub async fn create_invite(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(payload): Json<CreateInviteRequest>,
) -> Result<Json<ApiResponse<InviteDetails>>, ApiError> {
    let invite = state
        .invites()
        .create_invite(NewInvite {
            role: payload.role.unwrap_or(Role::User),
            created_by: Some(ctx.user.username.clone()),
            expires_in_hours: payload.expires_in_hours.unwrap_or(DEFAULT_EXPIRES_IN_HOURS),
            note: payload.note.unwrap_or_default(),
        })
        .await?;

    state
        .audit()
        .record(
            "invite_created",
            json!({"code": invite.invite.code, "createdBy": ctx.user.username}),
        )
        .await;

    Ok(Json(ApiResponse::success(invite)))
}

/// DELETE /api/invites/{code}
pub async fn delete_invite(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(code): Path<String>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    state.invites().delete_invite(&code).await?;

    state
        .audit()
        .record(
            "invite_deleted",
            json!({"code": code, "deletedBy": ctx.user.username}),
        )
        .await;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Invite deleted",
    ))))
}
