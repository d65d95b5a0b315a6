//! アプリケーション組み立て
//!
//! プール → ストア → サービス → キャッシュ → ヘルスモニタ →
//! コンシューマ → HTTP サーバーの順に配線し、シグナルで graceful に
//! 畳む「司令塔」。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use orderflow_core::LruCache;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::consumer;
use crate::health::HealthMonitor;
use crate::server;
use crate::service::cache::CachingOrderService;
use crate::service::{OrderService, OrderStore, StoreOrderService};
use crate::store::PgStore;

pub async fn run() -> anyhow::Result<()> {
    let config = Config::from_env().context("failed to load config")?;
    info!(
        http_port = config.http_port,
        workers = config.consumer.worker_count,
        topic = %config.kafka.topic,
        dlq_topic = %config.kafka.dlq_topic,
        "starting orderflow service"
    );

    // 接続は遅延。DB が落ちていてもプロセスは起動し、ヘルスゲートが
    // コンシューマを止める
    let store = Arc::new(PgStore::connect_lazy(&config.database)?);

    let cache = Arc::new(LruCache::new(
        config.cache.entry_amount_cap,
        config.cache.entry_size_cap,
    ));
    let base_service = Arc::new(StoreOrderService::new(
        Arc::clone(&store) as Arc<dyn OrderStore>
    ));
    let caching_service = Arc::new(CachingOrderService::new(
        base_service,
        Arc::clone(&store) as Arc<dyn OrderStore>,
        Arc::clone(&cache),
    ));

    // キャッシュのプリロード（失敗しても起動は続ける）
    let preload = tokio::time::timeout(
        Duration::from_secs(10),
        caching_service.preload(config.cache.preload_size),
    )
    .await;
    match preload {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "cache preload failed"),
        Err(_) => warn!("cache preload timed out"),
    }

    let token = CancellationToken::new();

    let health = Arc::new(HealthMonitor::new(store, config.health));
    let health_task = health.start(token.clone()).await;

    let service: Arc<dyn OrderService> = caching_service;
    let consumer_handle = consumer::spawn(
        &config,
        Arc::clone(&service),
        Arc::clone(&health),
        token.clone(),
    )?;

    let server_task = tokio::spawn(server::run(
        config.http_port,
        service,
        Arc::clone(&health),
        cache,
        token.clone(),
    ));

    wait_for_shutdown_signal().await;
    info!("shutting down...");
    token.cancel();

    // 猶予つきでコンシューマを畳む（poll 停止 → ワーカードレイン → DLQ close）
    if tokio::time::timeout(config.shutdown_grace, consumer_handle.shutdown())
        .await
        .is_err()
    {
        warn!("consumer shutdown exceeded grace period");
    }

    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(error = %err, "http server exited with error"),
        Err(err) => error!(error = %err, "http server task panicked"),
    }
    let _ = health_task.await;

    info!("shutdown complete");
    Ok(())
}

/// SIGINT / SIGTERM を待つ
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(err) => {
                error!(error = %err, "failed to install sigterm handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
