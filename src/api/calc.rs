//! Wage calculation endpoint.

use axum::{Json, extract::State};
use std::sync::Arc;

use super::{ApiError, ApiResponse, AppState};
use crate::tariff::calc::{CalcRequest, CalcResult, calculate};

/// POST /api/calc
///
/// Validates the request ranges, then runs the pure breakdown computation.
/// Calculation errors (missing table, missing base value) are client errors:
/// the request named something the loaded tables cannot answer.
pub async fn calc(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CalcRequest>,
) -> Result<Json<ApiResponse<CalcResult>>, ApiError> {
    if let Err(errors) = payload.validate() {
        return Err(ApiError::validation(errors.join(" ")));
    }

    let result = calculate(state.tables().as_ref(), &payload)
        .map_err(|err| ApiError::validation(err.to_string()))?;

    Ok(Json(ApiResponse::success(result)))
}
