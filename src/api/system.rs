//! System endpoints.

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub ts: DateTime<Utc>,
    pub tables: Vec<String>,
    pub uptime_seconds: u64,
}

/// GET /api/health
///
/// Liveness probe; also reports which tariff tables are loaded.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        ts: Utc::now(),
        tables: state.tables().keys(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}
