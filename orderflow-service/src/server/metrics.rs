//! 運用 API（観測の入口）
//!
//! health と Prometheus metrics の出力。読み取り専用。

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::AppState;
use crate::metrics;

/// ヘルスチェックレスポンス
#[derive(Debug, Serialize)]
pub(super) struct HealthResponse {
    pub status: String,
    pub db_healthy: bool,
    pub cache_entries: usize,
}

/// ヘルスチェック（GET /health）
pub(super) async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_healthy = state.health.is_healthy();
    Json(HealthResponse {
        status: if db_healthy { "OK" } else { "DEGRADED" }.to_string(),
        db_healthy,
        cache_entries: state.cache.len(),
    })
}

/// メトリクス（GET /metrics）
pub(super) async fn handle_metrics() -> String {
    metrics::render()
}
