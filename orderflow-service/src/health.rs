//! DB ヘルスモニタ
//!
//! 定期プローブの結果を atomic フラグに反映し、コンシューマの
//! pause/resume 判定に使わせる。ワーカーは永続的な接続障害を検知した
//! とき `mark_unhealthy` で前倒しに不健全へ倒せるが、健全へ戻せるのは
//! プローブ成功だけ。回復は必ず観測を伴う。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::HealthConfig;
use crate::metrics;

/// プローブ対象の疎通契約
#[async_trait]
pub trait Pinger: Send + Sync {
    async fn ping(&self) -> anyhow::Result<()>;
}

#[async_trait]
impl Pinger for crate::store::PgStore {
    async fn ping(&self) -> anyhow::Result<()> {
        crate::store::PgStore::ping(self).await?;
        Ok(())
    }
}

pub struct HealthMonitor {
    pinger: Arc<dyn Pinger>,
    healthy: AtomicBool,
    check_interval: Duration,
    check_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(pinger: Arc<dyn Pinger>, config: HealthConfig) -> Self {
        Self {
            pinger,
            // 初回プローブが成功するまでは不健全扱い
            healthy: AtomicBool::new(false),
            check_interval: config.check_interval,
            check_timeout: config.check_timeout,
        }
    }

    /// 監視を開始する
    ///
    /// 初回プローブは同期的に行い、以後は `check_interval` ごとの
    /// バックグラウンドループ。token 取り消しで停止する。
    pub async fn start(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        info!("starting db health checker");
        self.check().await;

        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.check_interval);
            // 起動直後の即時 tick を捨てる（初回プローブは済んでいる）
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => monitor.check().await,
                    _ = token.cancelled() => {
                        info!("stopping db health checker");
                        return;
                    }
                }
            }
        })
    }

    /// 現在の健全性（ロックフリー読み出し）
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// 外部（ワーカー）からの不健全化
    ///
    /// 冪等。healthy → unhealthy の最初の遷移だけログを出す。
    pub fn mark_unhealthy(&self) {
        if self
            .healthy
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            warn!("db connection proactively marked as unhealthy by a worker");
            metrics::DB_UP.store(0, Ordering::Relaxed);
        }
    }

    /// 単発のプローブ。状態遷移はエッジごとに一度だけログする。
    async fn check(&self) {
        let result = tokio::time::timeout(self.check_timeout, self.pinger.ping()).await;
        let was_healthy = self.healthy.load(Ordering::Relaxed);

        match result {
            Ok(Ok(())) => {
                if !was_healthy {
                    info!("database connection restored");
                    self.healthy.store(true, Ordering::Relaxed);
                }
                metrics::DB_UP.store(1, Ordering::Relaxed);
            }
            Ok(Err(err)) => {
                if was_healthy {
                    error!(error = %err, "database connection lost");
                    self.healthy.store(false, Ordering::Relaxed);
                }
                metrics::DB_UP.store(0, Ordering::Relaxed);
            }
            Err(_) => {
                if was_healthy {
                    error!("database connection lost: probe timed out");
                    self.healthy.store(false, Ordering::Relaxed);
                }
                metrics::DB_UP.store(0, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// 応答を差し込めるプローブ
    struct ScriptedPinger {
        responses: Mutex<VecDeque<bool>>,
    }

    impl ScriptedPinger {
        fn new(responses: &[bool]) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.iter().copied().collect()),
            })
        }
    }

    #[async_trait]
    impl Pinger for ScriptedPinger {
        async fn ping(&self) -> anyhow::Result<()> {
            let ok = self.responses.lock().unwrap().pop_front().unwrap_or(false);
            if ok {
                Ok(())
            } else {
                anyhow::bail!("ping failed")
            }
        }
    }

    fn config() -> HealthConfig {
        HealthConfig {
            check_interval: Duration::from_millis(10),
            check_timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn starts_unhealthy_until_first_probe() {
        let monitor = HealthMonitor::new(ScriptedPinger::new(&[true]), config());
        assert!(!monitor.is_healthy());
        monitor.check().await;
        assert!(monitor.is_healthy());
    }

    #[tokio::test]
    async fn probe_failure_flips_to_unhealthy() {
        let monitor = HealthMonitor::new(ScriptedPinger::new(&[true, false]), config());
        monitor.check().await;
        assert!(monitor.is_healthy());
        monitor.check().await;
        assert!(!monitor.is_healthy());
    }

    #[tokio::test]
    async fn mark_unhealthy_is_idempotent() {
        let monitor = HealthMonitor::new(ScriptedPinger::new(&[true]), config());
        monitor.check().await;
        assert!(monitor.is_healthy());

        monitor.mark_unhealthy();
        assert!(!monitor.is_healthy());
        // 2 回目以降は no-op
        monitor.mark_unhealthy();
        assert!(!monitor.is_healthy());
    }

    #[tokio::test]
    async fn only_probe_can_restore_health() {
        let monitor = HealthMonitor::new(ScriptedPinger::new(&[true, true]), config());
        monitor.check().await;
        monitor.mark_unhealthy();
        assert!(!monitor.is_healthy());

        // 成功プローブだけが回復させる
        monitor.check().await;
        assert!(monitor.is_healthy());
    }

    #[tokio::test]
    async fn slow_probe_counts_as_failure() {
        struct SlowPinger;

        #[async_trait]
        impl Pinger for SlowPinger {
            async fn ping(&self) -> anyhow::Result<()> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
        }

        let monitor = HealthMonitor::new(
            Arc::new(SlowPinger),
            HealthConfig {
                check_interval: Duration::from_millis(10),
                check_timeout: Duration::from_millis(20),
            },
        );
        monitor.check().await;
        assert!(!monitor.is_healthy());
    }
}
