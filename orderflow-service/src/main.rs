//! Orderflow Service - 注文取り込みサービス
//!
//! パーティション化されたログ（Kafka）から注文レコードを消費し、
//! 検証して Postgres へ原子的に書き込み、直近の注文をインメモリ
//! キャッシュ越しの読み取り API で返す。
//!
//! ## 全体フロー（超要約）
//! 1) poll スレッドがブローカーからメッセージを取得
//! 2) 有界キュー経由でワーカーが デコード → 検証 → 永続化
//! 3) poison は DLQ へ、一過性の DB 障害はリトライと健全性ゲートで吸収
//! 4) 読み取りは LRU キャッシュ優先で /orders/{uid} から返す
//!
//! ## 起動方法
//! ```bash
//! POSTGRES_USER=app POSTGRES_PASSWORD=... POSTGRES_HOST=localhost \
//! POSTGRES_PORT=5432 POSTGRES_DB=orders cargo run --release -p orderflow-service
//! ```

mod app;
mod config;
mod consumer;
mod health;
mod metrics;
mod server;
mod service;
mod store;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ロギング初期化
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,orderflow_service=debug".into()),
        )
        .init();

    app::run().await
}
