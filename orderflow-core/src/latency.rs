//! レイテンシ分布ヒストグラム
//!
//! ## 用途
//! - メッセージ受信から取り込み完了までのエンドツーエンド計測
//! - DB・キャッシュ応答時間の観測
//!
//! ## 設計
//! - 固定バケットにカウントするだけ。個々の値は保存しない
//! - Atomic 操作のみで mutex 不要
//! - 単位はマイクロ秒（DB を跨ぐパイプラインにはナノ秒は細かすぎる）

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// マイクロ秒単位の固定バケットヒストグラム
#[derive(Debug)]
pub struct LatencyHistogram {
    buckets: [AtomicU64; 8],
    sum_micros: AtomicU64,
    count: AtomicU64,
    max_micros: AtomicU64,
}

impl LatencyHistogram {
    /// バケット境界（マイクロ秒）
    pub const BUCKET_BOUNDS: [u64; 8] = [
        100,        // ~ 100µs
        500,        // ~ 500µs
        1_000,      // ~ 1ms
        5_000,      // ~ 5ms
        10_000,     // ~ 10ms
        50_000,     // ~ 50ms
        100_000,    // ~ 100ms
        u64::MAX,   // それ以上
    ];

    pub const fn new() -> Self {
        Self {
            buckets: [
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
            ],
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
            max_micros: AtomicU64::new(0),
        }
    }

    /// レイテンシを記録する
    #[inline]
    pub fn record(&self, latency_micros: u64) {
        let bucket_idx = Self::BUCKET_BOUNDS
            .iter()
            .position(|&bound| latency_micros <= bound)
            .unwrap_or(7);

        // Relaxed: 順序保証不要、速度優先
        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        self.sum_micros.fetch_add(latency_micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let mut current_max = self.max_micros.load(Ordering::Relaxed);
        while latency_micros > current_max {
            match self.max_micros.compare_exchange_weak(
                current_max,
                latency_micros,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => current_max = x,
            }
        }
    }

    /// 統計スナップショットを取得
    pub fn snapshot(&self) -> LatencyStats {
        let count = self.count.load(Ordering::Relaxed);
        let sum = self.sum_micros.load(Ordering::Relaxed);
        let buckets: [u64; 8] = std::array::from_fn(|i| self.buckets[i].load(Ordering::Relaxed));

        LatencyStats {
            count,
            sum_micros: sum,
            mean_micros: if count > 0 { sum / count } else { 0 },
            max_micros: self.max_micros.load(Ordering::Relaxed),
            buckets,
        }
    }

    /// 全カウンタをリセット
    pub fn reset(&self) {
        for bucket in &self.buckets {
            bucket.store(0, Ordering::Relaxed);
        }
        self.sum_micros.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
        self.max_micros.store(0, Ordering::Relaxed);
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// 統計スナップショット
#[derive(Debug, Clone)]
pub struct LatencyStats {
    pub count: u64,
    pub sum_micros: u64,
    pub mean_micros: u64,
    pub max_micros: u64,
    pub buckets: [u64; 8],
}

impl LatencyStats {
    /// パーセンタイル値をバケット境界で近似する
    pub fn percentile(&self, p: f64) -> u64 {
        if self.count == 0 {
            return 0;
        }

        let target = (self.count as f64 * p / 100.0).ceil() as u64;
        let mut cumulative = 0u64;

        for (i, &bucket_count) in self.buckets.iter().enumerate() {
            cumulative += bucket_count;
            if cumulative >= target {
                return LatencyHistogram::BUCKET_BOUNDS[i];
            }
        }

        LatencyHistogram::BUCKET_BOUNDS[7]
    }
}

/// RAII ガード: スコープ終了時に経過時間を記録する
pub struct LatencyGuard<'a> {
    histogram: &'a LatencyHistogram,
    start: Instant,
}

impl<'a> LatencyGuard<'a> {
    #[inline]
    pub fn new(histogram: &'a LatencyHistogram) -> Self {
        Self {
            histogram,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.histogram.record(self.start.elapsed().as_micros() as u64);
    }
}
