//! コンシューマラグ監視
//!
//! 一定間隔でコミット済みオフセットとブローカーのウォーターマークを
//! 突き合わせ、パーティションごとの遅れをメトリクスに出す。

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::Offset;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::ConsumerLogContext;
use crate::metrics;

/// ウォーターマーク問い合わせのタイムアウト
const WATERMARK_TIMEOUT: Duration = Duration::from_secs(5);

pub(super) fn spawn(
    consumer: Arc<BaseConsumer<ConsumerLogContext>>,
    token: CancellationToken,
    interval: Duration,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("consumer-lag".into())
        .spawn(move || run(consumer, token, interval))
}

fn run(
    consumer: Arc<BaseConsumer<ConsumerLogContext>>,
    token: CancellationToken,
    interval: Duration,
) {
    let tick = Duration::from_millis(100);
    'outer: loop {
        // interval を小刻みに待ち、キャンセルに速やかに反応する
        let mut waited = Duration::ZERO;
        while waited < interval {
            if token.is_cancelled() {
                break 'outer;
            }
            thread::sleep(tick);
            waited += tick;
        }

        observe_lag(&consumer);
    }
    info!("stopping consumer lag monitor");
}

fn observe_lag(consumer: &BaseConsumer<ConsumerLogContext>) {
    let assignment = match consumer.assignment() {
        Ok(tpl) => tpl,
        Err(err) => {
            warn!(error = %err, "failed to get assigned partitions for lag monitoring");
            return;
        }
    };
    if assignment.count() == 0 {
        return;
    }

    let committed = match consumer.committed(WATERMARK_TIMEOUT) {
        Ok(tpl) => tpl,
        Err(err) => {
            warn!(error = %err, "failed to get committed offsets for lag monitoring");
            return;
        }
    };

    for elem in committed.elements() {
        let (low, high) =
            match consumer.fetch_watermarks(elem.topic(), elem.partition(), WATERMARK_TIMEOUT) {
                Ok(marks) => marks,
                Err(err) => {
                    warn!(
                        error = %err,
                        topic = elem.topic(),
                        partition = elem.partition(),
                        "failed to query watermark offsets"
                    );
                    continue;
                }
            };

        // まだ一度もコミットしていなければ high - low を遅れとみなす
        let lag = match elem.offset() {
            Offset::Offset(committed_offset) => high - committed_offset,
            _ => high - low,
        };

        metrics::set_consumer_lag(elem.topic(), elem.partition(), lag.max(0));
    }
}
