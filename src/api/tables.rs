//! Read-only tariff table endpoints.

use axum::{
    Json,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{ApiError, ApiResponse, AppState};
use crate::tariff::{TableMeta, TariffTable};

#[derive(Serialize)]
pub struct TableListResponse {
    pub keys: Vec<String>,
    pub meta: BTreeMap<String, TableMeta>,
}

#[derive(Serialize)]
pub struct TableResponse {
    pub key: String,
    pub table: TariffTable,
    #[serde(rename = "atMin")]
    pub at_min: serde_json::Map<String, serde_json::Value>,
}

/// GET /api/tables
pub async fn list_tables(State(state): State<Arc<AppState>>) -> Response {
    let provider = state.tables();
    let response = TableListResponse {
        keys: provider.keys(),
        meta: provider.meta().clone(),
    };

    (
        [(header::CACHE_CONTROL, "public, max-age=300")],
        Json(ApiResponse::success(response)),
    )
        .into_response()
}

/// GET /api/tables/{key}
///
/// Unknown keys fall back to the `current` table when one exists.
pub async fn get_table(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    let entry = state
        .tables()
        .entry(&key)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("Table '{key}' not found")))?;

    Ok((
        [(header::CACHE_CONTROL, "public, max-age=86400, immutable")],
        Json(ApiResponse::success(TableResponse {
            key,
            table: entry.table,
            at_min: entry.at_min,
        })),
    )
        .into_response())
}
