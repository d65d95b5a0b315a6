//! HTTP 読み取り API
//!
//! 取り込み済み注文の参照と運用観測だけを提供する読み取り専用の入口。
//! - /orders/{order_uid}: 注文 1 件を JSON で返す
//! - /health: 稼働確認（DB 疎通とキャッシュ常駐数）
//! - /metrics: Prometheus 形式の観測出力

mod metrics;
mod orders;

use std::sync::Arc;

use axum::{routing::get, Router};
use orderflow_core::LruCache;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::health::HealthMonitor;
use crate::service::OrderService;

use metrics::{handle_health, handle_metrics};
use orders::handle_get_order;

/// アプリケーション状態
#[derive(Clone)]
pub(super) struct AppState {
    pub(super) service: Arc<dyn OrderService>,
    pub(super) health: Arc<HealthMonitor>,
    pub(super) cache: Arc<LruCache>,
}

/// HTTP サーバーを起動する。token 取り消しで graceful に停止する。
pub async fn run(
    port: u16,
    service: Arc<dyn OrderService>,
    health: Arc<HealthMonitor>,
    cache: Arc<LruCache>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let state = AppState {
        service,
        health,
        cache,
    };

    let app = Router::new()
        .route("/orders/{order_uid}", get(handle_get_order))
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    info!("http server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(token.cancelled_owned())
        .await?;

    info!("http server stopped");
    Ok(())
}
