//! サービス全体のメトリクス
//!
//! グローバルな atomic カウンタ群と Prometheus テキスト形式の
//! レンダリング。コンシューマラグだけはパーティションごとのラベルが
//! 要るので mutex 付きマップで持つ。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use orderflow_core::LatencyHistogram;

/// consumer_processed_total{status="valid"}
pub static MESSAGES_VALID: AtomicU64 = AtomicU64::new(0);
/// consumer_processed_total{status="invalid"}
pub static MESSAGES_INVALID: AtomicU64 = AtomicU64::new(0);
/// consumer_processed_total{status="error"}
pub static MESSAGES_ERROR: AtomicU64 = AtomicU64::new(0);
/// DLQ へ送った件数
pub static DLQ_MESSAGES: AtomicU64 = AtomicU64::new(0);
/// DLQ 配信レポートの成否と、送信前に落とした件数
pub static DLQ_DELIVERY_OK: AtomicU64 = AtomicU64::new(0);
pub static DLQ_DELIVERY_ERR: AtomicU64 = AtomicU64::new(0);
pub static DLQ_PUBLISH_DROPPED: AtomicU64 = AtomicU64::new(0);
/// リトライした一過性 DB 障害の回数
pub static DB_TRANSIENT_ERRORS: AtomicU64 = AtomicU64::new(0);
/// DB 疎通 (1/0)
pub static DB_UP: AtomicU64 = AtomicU64::new(0);
/// キャッシュヒット・ミス
pub static CACHE_HITS: AtomicU64 = AtomicU64::new(0);
pub static CACHE_MISSES: AtomicU64 = AtomicU64::new(0);

/// メッセージ生成からの取り込み完了までのエンドツーエンド遅延
pub static PROCESSING_LATENCY: LatencyHistogram = LatencyHistogram::new();
/// DB 応答時間
pub static DB_RESPONSE: LatencyHistogram = LatencyHistogram::new();
/// キャッシュ応答時間
pub static CACHE_RESPONSE: LatencyHistogram = LatencyHistogram::new();

/// consumer_lag{topic,partition}
static CONSUMER_LAG: Mutex<Option<HashMap<(String, i32), i64>>> = Mutex::new(None);

/// パーティションのラグ値を更新する
pub fn set_consumer_lag(topic: &str, partition: i32, lag: i64) {
    let mut guard = match CONSUMER_LAG.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard
        .get_or_insert_with(HashMap::new)
        .insert((topic.to_string(), partition), lag);
}

fn consumer_lag_snapshot() -> Vec<((String, i32), i64)> {
    let guard = match CONSUMER_LAG.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    };
    let mut entries: Vec<_> = guard
        .as_ref()
        .map(|m| m.iter().map(|(k, v)| (k.clone(), *v)).collect())
        .unwrap_or_default();
    entries.sort();
    entries
}

/// Prometheus テキスト形式でスナップショットを出力する
pub fn render() -> String {
    let processing = PROCESSING_LATENCY.snapshot();
    let db = DB_RESPONSE.snapshot();
    let cache = CACHE_RESPONSE.snapshot();

    let mut out = format!(
        "# HELP consumer_processed_total Total number of processed messages\n\
         # TYPE consumer_processed_total counter\n\
         consumer_processed_total{{status=\"valid\"}} {}\n\
         consumer_processed_total{{status=\"invalid\"}} {}\n\
         consumer_processed_total{{status=\"error\"}} {}\n\
         # HELP consumer_dlq_messages_total Total number of messages sent to the DLQ\n\
         # TYPE consumer_dlq_messages_total counter\n\
         consumer_dlq_messages_total {}\n\
         # HELP consumer_dlq_delivery_ok_total Total DLQ delivery reports confirming success\n\
         # TYPE consumer_dlq_delivery_ok_total counter\n\
         consumer_dlq_delivery_ok_total {}\n\
         # HELP consumer_dlq_delivery_err_total Total DLQ delivery reports confirming failure\n\
         # TYPE consumer_dlq_delivery_err_total counter\n\
         consumer_dlq_delivery_err_total {}\n\
         # HELP consumer_dlq_publish_dropped_total Total DLQ publishes dropped before enqueue\n\
         # TYPE consumer_dlq_publish_dropped_total counter\n\
         consumer_dlq_publish_dropped_total {}\n\
         # HELP db_transient_err_total Total number of recoverable DB hiccups\n\
         # TYPE db_transient_err_total counter\n\
         db_transient_err_total {}\n\
         # HELP db_up 1 if database is reachable, 0 if not\n\
         # TYPE db_up gauge\n\
         db_up {}\n\
         # HELP cache_hits_total Total number of cache hits\n\
         # TYPE cache_hits_total counter\n\
         cache_hits_total {}\n\
         # HELP cache_misses_total Total number of cache misses\n\
         # TYPE cache_misses_total counter\n\
         cache_misses_total {}\n\
         # HELP consumer_processing_latency_p50_us End-to-end processing latency p50 in microseconds\n\
         # TYPE consumer_processing_latency_p50_us gauge\n\
         consumer_processing_latency_p50_us {}\n\
         # HELP consumer_processing_latency_p99_us End-to-end processing latency p99 in microseconds\n\
         # TYPE consumer_processing_latency_p99_us gauge\n\
         consumer_processing_latency_p99_us {}\n\
         # HELP consumer_processing_latency_count_total End-to-end latency sample count\n\
         # TYPE consumer_processing_latency_count_total counter\n\
         consumer_processing_latency_count_total {}\n\
         # HELP db_response_time_p99_us DB response time p99 in microseconds\n\
         # TYPE db_response_time_p99_us gauge\n\
         db_response_time_p99_us {}\n\
         # HELP cache_response_time_p99_us Cache response time p99 in microseconds\n\
         # TYPE cache_response_time_p99_us gauge\n\
         cache_response_time_p99_us {}\n",
        MESSAGES_VALID.load(Ordering::Relaxed),
        MESSAGES_INVALID.load(Ordering::Relaxed),
        MESSAGES_ERROR.load(Ordering::Relaxed),
        DLQ_MESSAGES.load(Ordering::Relaxed),
        DLQ_DELIVERY_OK.load(Ordering::Relaxed),
        DLQ_DELIVERY_ERR.load(Ordering::Relaxed),
        DLQ_PUBLISH_DROPPED.load(Ordering::Relaxed),
        DB_TRANSIENT_ERRORS.load(Ordering::Relaxed),
        DB_UP.load(Ordering::Relaxed),
        CACHE_HITS.load(Ordering::Relaxed),
        CACHE_MISSES.load(Ordering::Relaxed),
        processing.percentile(50.0),
        processing.percentile(99.0),
        processing.count,
        db.percentile(99.0),
        cache.percentile(99.0),
    );

    let lags = consumer_lag_snapshot();
    if !lags.is_empty() {
        out.push_str(
            "# HELP consumer_lag Estimated number of messages lagging behind the latest offset\n\
             # TYPE consumer_lag gauge\n",
        );
        for ((topic, partition), lag) in lags {
            out.push_str(&format!(
                "consumer_lag{{topic=\"{topic}\",partition=\"{partition}\"}} {lag}\n"
            ));
        }
    }

    out
}
