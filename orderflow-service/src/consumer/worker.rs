//! 取り込みワーカー
//!
//! キューからメッセージを受け取り、デコード → リトライ付き処理 →
//! 結果分類（コミット / DLQ / 不健全化）を行う。1 メッセージごとに
//! パニック境界を張り、想定外の失敗でもプロセスを落とさない。

use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::FutureExt;
use orderflow_core::{decode_order, Order};
use rdkafka::error::KafkaResult;
use rdkafka::message::{Headers, Message, OwnedMessage};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use super::dlq::{lossy_key, DlqPublisher};
use crate::health::HealthMonitor;
use crate::metrics;
use crate::service::{OrderService, ProcessError};
use crate::store::StoreError;

/// オフセットコミット契約。コミットは手動・メッセージ単位。
pub trait Committer: Send + Sync {
    fn commit(&self, msg: &OwnedMessage) -> KafkaResult<()>;
}

/// DLQ 送信契約
pub trait DeadLetterSink: Send + Sync {
    fn publish(&self, msg: &OwnedMessage, reason: &str);
}

impl DeadLetterSink for DlqPublisher {
    fn publish(&self, msg: &OwnedMessage, reason: &str) {
        DlqPublisher::publish(self, msg, reason);
    }
}

/// ワーカーからの前倒し不健全化の契約
pub trait UnhealthyMarker: Send + Sync {
    fn mark_unhealthy(&self);
}

impl UnhealthyMarker for HealthMonitor {
    fn mark_unhealthy(&self) {
        HealthMonitor::mark_unhealthy(self);
    }
}

/// メッセージ生成時刻を運ぶ任意ヘッダ（ミリ秒 Unix 時刻の 10 進文字列）
const CREATION_TIMESTAMP_HEADER: &str = "creation_timestamp_ms";

pub(super) struct Worker {
    pub id: usize,
    pub service: Arc<dyn OrderService>,
    pub committer: Arc<dyn Committer>,
    pub dlq: Arc<dyn DeadLetterSink>,
    pub health: Arc<dyn UnhealthyMarker>,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Worker {
    /// キューが閉じるまでメッセージを処理し続ける
    ///
    /// シャットダウン時は送信側が drop され、バッファに残った分を
    /// 吐き切ってからループを抜ける。
    pub(super) async fn run(self, jobs: Arc<Mutex<mpsc::Receiver<OwnedMessage>>>) {
        loop {
            let msg = {
                let mut rx = jobs.lock().await;
                rx.recv().await
            };
            let Some(msg) = msg else {
                break;
            };

            // パニック境界: 1 メッセージの失敗で全体を巻き込まない
            let outcome = AssertUnwindSafe(self.process_message(&msg))
                .catch_unwind()
                .await;
            if let Err(panic) = outcome {
                let detail = panic_detail(&panic);
                error!(
                    worker_id = self.id,
                    key = %lossy_key(&msg),
                    panic = %detail,
                    stack = %std::backtrace::Backtrace::force_capture(),
                    "worker encountered panic"
                );
                metrics::MESSAGES_ERROR.fetch_add(1, Ordering::Relaxed);
                self.send_to_dlq(&msg, &format!("worker panic: {detail}"));
                self.commit(&msg);
            }
        }
        info!(worker_id = self.id, "worker shutting down");
    }

    /// デコード → 処理 → 結果分類の本体
    async fn process_message(&self, msg: &OwnedMessage) {
        let order = match decode_order(msg.payload().unwrap_or_default()) {
            Ok(order) => order,
            Err(err) => {
                // poison だが DLQ に載せる価値もない。コミットして捨てる
                metrics::MESSAGES_INVALID.fetch_add(1, Ordering::Relaxed);
                error!(error = %err, key = %lossy_key(msg), "failed to decode message, discarding");
                self.commit(msg);
                return;
            }
        };

        let result = self.process_with_retries(&order).await;
        self.handle_result(msg, &order, result);
    }

    /// 一過性の DB 障害だけを指数バックオフでリトライする
    async fn process_with_retries(&self, order: &Order) -> Result<(), ProcessError> {
        let attempts = self.max_retries.max(1);
        let mut last_err = None;

        for attempt in 0..attempts {
            match self.service.process_new_order(order).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_connection_failed() => {
                    metrics::DB_TRANSIENT_ERRORS.fetch_add(1, Ordering::Relaxed);
                    let backoff = self.retry_backoff * (1u32 << attempt.min(16));
                    warn!(
                        order_uid = %order.order_uid,
                        attempt,
                        retry_in_ms = backoff.as_millis() as u64,
                        error = %err,
                        "transient db connection error, will retry"
                    );
                    tokio::time::sleep(backoff).await;
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err.expect("retry loop exits early unless every attempt failed"))
    }

    /// 最終結果を見てコミット・DLQ・不健全化を決める
    fn handle_result(&self, msg: &OwnedMessage, order: &Order, result: Result<(), ProcessError>) {
        match result {
            Ok(()) => {
                metrics::MESSAGES_VALID.fetch_add(1, Ordering::Relaxed);
                info!(worker_id = self.id, order_uid = %order.order_uid, "order successfully processed");
                self.observe_end_to_end(msg);
                self.commit(msg);
            }
            Err(err) if err.is_connection_failed() => {
                metrics::MESSAGES_ERROR.fetch_add(1, Ordering::Relaxed);
                error!(
                    order_uid = %order.order_uid,
                    error = %err,
                    "failed to process order due to db connection error"
                );
                self.health.mark_unhealthy();
                // コミットしない: ストア復旧後にブローカーが再配送する
            }
            Err(err @ ProcessError::Invalid(_)) => {
                metrics::MESSAGES_INVALID.fetch_add(1, Ordering::Relaxed);
                warn!(order_uid = %order.order_uid, error = %err, "invalid order received, sending to dlq");
                self.send_to_dlq(msg, &err.dlq_reason());
                self.commit(msg);
            }
            Err(err @ ProcessError::Store(StoreError::AlreadyExists { .. })) => {
                metrics::MESSAGES_INVALID.fetch_add(1, Ordering::Relaxed);
                warn!(order_uid = %order.order_uid, error = %err, "order already exists, sending to dlq");
                self.send_to_dlq(msg, &err.dlq_reason());
                self.commit(msg);
            }
            Err(err) => {
                metrics::MESSAGES_ERROR.fetch_add(1, Ordering::Relaxed);
                error!(
                    order_uid = %order.order_uid,
                    error = %err,
                    "failed to process order with an unhandled error, sending to dlq"
                );
                self.send_to_dlq(msg, &err.dlq_reason());
                self.commit(msg);
            }
        }
    }

    fn commit(&self, msg: &OwnedMessage) {
        if let Err(err) = self.committer.commit(msg) {
            error!(error = %err, key = %lossy_key(msg), "failed to commit message");
        }
    }

    fn send_to_dlq(&self, msg: &OwnedMessage, reason: &str) {
        self.dlq.publish(msg, reason);
    }

    /// `creation_timestamp_ms` ヘッダがあればエンドツーエンド遅延を記録
    fn observe_end_to_end(&self, msg: &OwnedMessage) {
        let Some(headers) = msg.headers() else {
            return;
        };
        for header in headers.iter() {
            if header.key != CREATION_TIMESTAMP_HEADER {
                continue;
            }
            let created_ms = header
                .value
                .and_then(|v| std::str::from_utf8(v).ok())
                .and_then(|s| s.parse::<u64>().ok());
            if let Some(created_ms) = created_ms {
                let now_ms = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64;
                let elapsed_us = now_ms.saturating_sub(created_ms) * 1_000;
                metrics::PROCESSING_LATENCY.record(elapsed_us);
            }
            return;
        }
    }
}

fn panic_detail(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
