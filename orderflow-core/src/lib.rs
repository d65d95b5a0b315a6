//! Orderflow Core - 注文取り込みパイプラインの純粋コア
//!
//! I/O を持たない部品だけを集めたクレート:
//! - 注文ドメインモデルと厳格 JSON デコード (order.rs)
//! - 構造・意味バリデーション (validate.rs)
//! - 近似ディープサイズ計測 (sizeof.rs)
//! - バイト上限つき LRU キャッシュ (lru.rs)
//! - レイテンシヒストグラム (latency.rs)
//!
//! サービス側（Kafka / Postgres / HTTP）は orderflow-service が持つ。

pub mod latency;
pub mod lru;
pub mod order;
pub mod sizeof;
pub mod validate;

pub use latency::{LatencyGuard, LatencyHistogram, LatencyStats};
pub use lru::LruCache;
pub use order::{decode_order, DecodeError, Delivery, Item, Order, Payment};
pub use sizeof::DeepSize;
pub use validate::ValidationError;
