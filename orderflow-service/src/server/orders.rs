//! 注文参照ハンドラ

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use orderflow_core::Order;
use serde::Serialize;
use tracing::error;

use super::AppState;
use crate::service::ProcessError;
use crate::store::StoreError;

/// エラーレスポンス
#[derive(Debug, Serialize)]
pub(super) struct ErrorResponse {
    pub(super) error: String,
}

/// 注文取得（GET /orders/{order_uid}）
///
/// - ヒット: ワイヤ形式と同じ JSON
/// - 見つからない: 404
/// - ストア障害: 503（接続断）/ 500（その他）
pub(super) async fn handle_get_order(
    State(state): State<AppState>,
    Path(order_uid): Path<String>,
) -> Result<Json<Order>, (StatusCode, Json<ErrorResponse>)> {
    match state.service.get_order(&order_uid).await {
        Ok(order) => Ok(Json((*order).clone())),
        Err(err) if err.is_not_found() => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("order with uid '{order_uid}' not found"),
            }),
        )),
        Err(ProcessError::Store(StoreError::ConnectionFailed(err))) => {
            error!(error = %err, order_uid, "store unavailable");
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: "store unavailable".to_string(),
                }),
            ))
        }
        Err(err) => {
            error!(error = %err, order_uid, "failed to get order");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "internal server error".to_string(),
                }),
            ))
        }
    }
}
