//! キャッシュホットパスのベンチマーク
//!
//! 実行方法:
//! ```bash
//! cargo bench -p orderflow-core
//! ```

use std::sync::Arc;

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use orderflow_core::{DeepSize, LruCache, Order};

fn sample_order(uid: &str) -> Order {
    let json = serde_json::json!({
        "order_uid": uid,
        "track_number": "WBILMTESTTRACK",
        "entry": "WBIL",
        "delivery": {
            "name": "Test Testov",
            "phone": "+9720000000",
            "zip": "2639809",
            "city": "Kiryat Mozkin",
            "address": "Ploshad Mira 15",
            "region": "Kraiot",
            "email": "test@gmail.com"
        },
        "payment": {
            "transaction": uid,
            "request_id": "",
            "currency": "USD",
            "provider": "wbpay",
            "amount": 1817,
            "payment_dt": 1637907727,
            "bank": "alpha",
            "delivery_cost": 1500,
            "goods_total": 317,
            "custom_fee": 0
        },
        "items": [{
            "chrt_id": 9934930,
            "track_number": "WBILMTESTTRACK",
            "price": 453,
            "rid": "ab4219087a764ae0btest",
            "name": "Mascaras",
            "sale": 30,
            "size": "0",
            "total_price": 317,
            "nm_id": 2389212,
            "brand": "Vivienne Sabo",
            "status": 202
        }],
        "locale": "en",
        "internal_signature": "",
        "customer_id": "test",
        "delivery_service": "meest",
        "shardkey": "9",
        "sm_id": 99,
        "date_created": Utc::now(),
        "oof_shard": "1"
    });
    serde_json::from_value(json).expect("sample order")
}

fn bench_deep_size(c: &mut Criterion) {
    let order = sample_order("benchuid0");
    c.bench_function("deep_size_of", |b| {
        b.iter(|| black_box(&order).deep_size_of())
    });
}

fn bench_cache_insert_get(c: &mut Criterion) {
    let cache = LruCache::new(1024, 1 << 20);
    for i in 0..1024 {
        cache.insert(Arc::new(sample_order(&format!("warm{i}"))));
    }
    let hot = Arc::new(sample_order("hotuid"));
    cache.insert(Arc::clone(&hot));

    c.bench_function("cache_get_hit", |b| {
        b.iter(|| black_box(cache.get("hotuid")))
    });

    c.bench_function("cache_insert_existing", |b| {
        b.iter(|| cache.insert(Arc::clone(&hot)))
    });
}

criterion_group!(benches, bench_deep_size, bench_cache_insert_get);
criterion_main!(benches);
