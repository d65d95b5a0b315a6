//! Kafka コンシューマ中核
//!
//! ## 構成
//! - poll スレッド 1 本: ブローカーとのやり取り（poll / pause / resume /
//!   assignment）を一手に引き受ける
//! - ワーカータスク N 本: 有界キュー越しにメッセージを受けて処理する。
//!   キューが詰まると poll スレッドの送信がブロックし、それが
//!   バックプレッシャーになる
//! - DLQ パブリッシャと遅延監視スレッドを従える
//!
//! ## 健全性ゲート
//! ストアが不健全な間は割り当て済みパーティションを pause し、新規の
//! メッセージ取得を止める。キューに積まれた分は引き続き処理される。
//! 回復をプローブが観測したら resume する。

pub mod dlq;
mod lag;
mod worker;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context as _;
use rdkafka::consumer::{BaseConsumer, Consumer, ConsumerContext, Rebalance};
use rdkafka::error::KafkaResult;
use rdkafka::message::{Message, OwnedMessage};
use rdkafka::{ClientConfig, ClientContext, Offset, TopicPartitionList};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::health::HealthMonitor;
use crate::service::OrderService;
use dlq::DlqPublisher;
use worker::{Committer, Worker};

/// リバランスとコミット結果をログに流すコンテキスト
pub struct ConsumerLogContext;

impl ClientContext for ConsumerLogContext {}

impl ConsumerContext for ConsumerLogContext {
    fn pre_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => info!(partitions = tpl.count(), "partitions assigned"),
            Rebalance::Revoke(tpl) => info!(partitions = tpl.count(), "partitions revoked"),
            Rebalance::Error(err) => warn!(error = %err, "rebalance error"),
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        if let Err(err) = result {
            error!(error = %err, "failed to commit message");
        }
    }
}

/// poll スレッドは BorrowedMessage を detach してキューへ流すため、
/// ワーカー側のコミットはオフセット指定で行う
impl Committer for BaseConsumer<ConsumerLogContext> {
    fn commit(&self, msg: &OwnedMessage) -> KafkaResult<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(msg.topic(), msg.partition(), Offset::Offset(msg.offset() + 1))?;
        Consumer::commit(self, &tpl, rdkafka::consumer::CommitMode::Async)
    }
}

/// 稼働中のコンシューマ一式へのハンドル
pub struct ConsumerHandle {
    poll_thread: thread::JoinHandle<()>,
    lag_thread: thread::JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    dlq: Arc<DlqPublisher>,
}

impl ConsumerHandle {
    /// 全タスク・スレッドを合流させてから DLQ を閉じる
    ///
    /// 呼び出し前に CancellationToken を取り消しておくこと。poll
    /// スレッドが抜けるとキュー送信側が drop され、ワーカーは残りを
    /// 処理しきって終了する。
    pub async fn shutdown(self) {
        let ConsumerHandle {
            poll_thread,
            lag_thread,
            workers,
            dlq,
        } = self;

        let _ = tokio::task::spawn_blocking(move || {
            let _ = poll_thread.join();
        })
        .await;

        for handle in workers {
            let _ = handle.await;
        }

        let _ = tokio::task::spawn_blocking(move || {
            let _ = lag_thread.join();
        })
        .await;

        dlq.close();
        info!("kafka consumer shut down");
    }
}

/// コンシューマを起動する
///
/// poll スレッド・ワーカー・DLQ・ラグ監視をまとめて立ち上げ、
/// ハンドルを返す。
pub fn spawn(
    config: &Config,
    service: Arc<dyn OrderService>,
    health: Arc<HealthMonitor>,
    token: CancellationToken,
) -> anyhow::Result<ConsumerHandle> {
    let consumer: Arc<BaseConsumer<ConsumerLogContext>> =
        Arc::new(build_client_config(config).create_with_context(ConsumerLogContext)?);
    consumer
        .subscribe(&[config.kafka.topic.as_str()])
        .with_context(|| format!("failed to subscribe to {}", config.kafka.topic))?;

    let dlq = Arc::new(DlqPublisher::new(&config.kafka)?);

    let (tx, rx) = mpsc::channel::<OwnedMessage>(config.consumer.job_buffer_size);
    let rx = Arc::new(tokio::sync::Mutex::new(rx));

    let mut workers = Vec::with_capacity(config.consumer.worker_count);
    for id in 0..config.consumer.worker_count {
        let worker = Worker {
            id,
            service: Arc::clone(&service),
            committer: Arc::clone(&consumer) as Arc<dyn Committer>,
            dlq: Arc::clone(&dlq) as Arc<dyn worker::DeadLetterSink>,
            health: Arc::clone(&health) as Arc<dyn worker::UnhealthyMarker>,
            max_retries: config.consumer.max_retries,
            retry_backoff: config.consumer.retry_backoff,
        };
        workers.push(tokio::spawn(worker.run(Arc::clone(&rx))));
    }

    let poll_thread = {
        let consumer = Arc::clone(&consumer);
        let health = Arc::clone(&health);
        let token = token.clone();
        let poll_timeout = config.consumer.poll_timeout;
        thread::Builder::new()
            .name("kafka-poll".into())
            .spawn(move || poll_loop(consumer, health, tx, token, poll_timeout))?
    };

    let lag_thread = lag::spawn(Arc::clone(&consumer), token, Duration::from_secs(5))?;

    info!(
        workers = config.consumer.worker_count,
        job_buffer = config.consumer.job_buffer_size,
        topic = %config.kafka.topic,
        "kafka consumer started"
    );

    Ok(ConsumerHandle {
        poll_thread,
        lag_thread,
        workers,
        dlq,
    })
}

fn build_client_config(config: &Config) -> ClientConfig {
    let kafka = &config.kafka;
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", &kafka.brokers)
        .set("group.id", &kafka.group_id)
        .set("client.id", "orderflow-consumer")
        // コミットは手動・メッセージ単位
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", &kafka.auto_offset_reset);

    if let Some(level) = &kafka.isolation_level {
        client.set("isolation.level", level);
    }
    if let Some(ms) = kafka.session_timeout_ms {
        client.set("session.timeout.ms", ms.to_string());
    }
    if let Some(ms) = kafka.heartbeat_interval_ms {
        client.set("heartbeat.interval.ms", ms.to_string());
    }
    if let Some(ms) = kafka.max_poll_interval_ms {
        client.set("max.poll.interval.ms", ms.to_string());
    }
    client
}

/// poll ループ本体（専用スレッド）
///
/// ブローカー操作はこのスレッドしか行わない。終了時に `tx` が drop
/// され、ワーカーのドレインが始まる。
fn poll_loop(
    consumer: Arc<BaseConsumer<ConsumerLogContext>>,
    health: Arc<HealthMonitor>,
    tx: mpsc::Sender<OwnedMessage>,
    token: CancellationToken,
    poll_timeout: Duration,
) {
    info!("kafka consumer poll loop started");
    let mut paused = false;

    while !token.is_cancelled() {
        if let Err(err) = sync_pause_state(&consumer, &health, &mut paused) {
            warn!(error = %err, "failed to update pause state");
        }

        match consumer.poll(poll_timeout) {
            Some(Ok(msg)) => {
                if paused {
                    // pause 直前に取得済みだった分。コミットせず捨てれば
                    // resume 後にブローカーが再配送する
                    continue;
                }
                // 有界キューへのブロッキング送信がバックプレッシャー
                if tx.blocking_send(msg.detach()).is_err() {
                    error!("worker queue closed unexpectedly");
                    break;
                }
            }
            Some(Err(err)) => {
                let fatal = consumer.client().fatal_error().is_some();
                error!(error = %err, fatal, "kafka error");
                if fatal {
                    break;
                }
            }
            None => {
                // イベントなし。ホットスピンを避ける
                thread::sleep(Duration::from_millis(50));
            }
        }
    }

    info!("shutting down consumer poll loop");
}

/// 健全性フラグと pause 状態を突き合わせる
///
/// 遷移は割り当てが空でない場合のみ。どちらのエッジも一度だけログする。
fn sync_pause_state(
    consumer: &BaseConsumer<ConsumerLogContext>,
    health: &HealthMonitor,
    paused: &mut bool,
) -> KafkaResult<()> {
    let healthy = health.is_healthy();

    if !healthy && !*paused {
        let assignment = consumer.assignment()?;
        if assignment.count() > 0 {
            consumer.pause(&assignment)?;
            *paused = true;
            warn!("store unhealthy, partition consumption paused");
        }
    } else if healthy && *paused {
        let assignment = consumer.assignment()?;
        if assignment.count() > 0 {
            consumer.resume(&assignment)?;
            *paused = false;
            info!("store healthy, partition consumption resumed");
        }
    }

    Ok(())
}
