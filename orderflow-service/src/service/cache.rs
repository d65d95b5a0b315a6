//! キャッシュ付き注文サービス（デコレータ）
//!
//! 読み取りはキャッシュ優先（read-through）。書き込み成功時に
//! キャッシュへ同期反映はしない。注文はこのシステムでは write-once
//! なので、ヒットは追い出されるまで正とみなせる。

use std::sync::Arc;

use async_trait::async_trait;
use orderflow_core::{LatencyGuard, LruCache, Order};
use tracing::{debug, info, warn};

use super::{OrderService, OrderStore, ProcessError};
use crate::metrics;
use crate::store::StoreError;

pub struct CachingOrderService {
    next: Arc<dyn OrderService>,
    /// プリロード専用の直接参照
    store: Arc<dyn OrderStore>,
    cache: Arc<LruCache>,
}

impl CachingOrderService {
    pub fn new(next: Arc<dyn OrderService>, store: Arc<dyn OrderStore>, cache: Arc<LruCache>) -> Self {
        Self { next, store, cache }
    }

    /// 起動時に直近の注文をキャッシュへ流し込む
    ///
    /// DB が落ちている場合（ConnectionFailed）は警告だけ出して成功扱い。
    /// 起動パスを止めない。それ以外のエラーは伝播する。
    pub async fn preload(&self, limit: i64) -> Result<(), ProcessError> {
        info!("preloading cache...");
        let orders = match self.store.get_latest_orders(limit).await {
            Ok(orders) => orders,
            Err(StoreError::ConnectionFailed(err)) => {
                warn!(error = %err, "failed to preload cache, db is down");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let count = orders.len();
        for order in orders {
            self.cache.insert(Arc::new(order));
        }
        info!(count, "cache preload complete");
        Ok(())
    }
}

#[async_trait]
impl OrderService for CachingOrderService {
    async fn process_new_order(&self, order: &Order) -> Result<(), ProcessError> {
        // read-through 方針: ここでキャッシュは触らない
        self.next.process_new_order(order).await
    }

    async fn get_order(&self, order_uid: &str) -> Result<Arc<Order>, ProcessError> {
        {
            let _timer = LatencyGuard::new(&metrics::CACHE_RESPONSE);
            if let Some(order) = self.cache.get(order_uid) {
                metrics::CACHE_HITS.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                debug!(order_uid, "cache hit");
                return Ok(order);
            }
        }

        metrics::CACHE_MISSES.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        debug!(order_uid, "cache miss");

        let order = self.next.get_order(order_uid).await?;

        let _timer = LatencyGuard::new(&metrics::CACHE_RESPONSE);
        self.cache.insert(Arc::clone(&order));
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testutil::{connection_failed, sample_order, MockStore};
    use crate::service::StoreOrderService;
    use std::sync::atomic::Ordering;

    fn caching_service(store: Arc<MockStore>, cap: usize) -> CachingOrderService {
        let next = Arc::new(StoreOrderService::new(store.clone()));
        CachingOrderService::new(next, store, Arc::new(LruCache::new(cap, 1 << 20)))
    }

    #[tokio::test]
    async fn miss_populates_cache_then_hit_skips_store() {
        let store = Arc::new(MockStore::default());
        store.push_get(Ok(sample_order("b563feb7b2b84b6test")));
        let service = caching_service(store.clone(), 16);

        let first = service.get_order("b563feb7b2b84b6test").await.unwrap();
        assert_eq!(first.order_uid, "b563feb7b2b84b6test");
        assert_eq!(store.get_calls.load(Ordering::SeqCst), 1);

        // 2 回目はキャッシュが正。ストアは呼ばれない
        let second = service.get_order("b563feb7b2b84b6test").await.unwrap();
        assert_eq!(second.order_uid, first.order_uid);
        assert_eq!(store.get_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn not_found_is_surfaced_and_not_cached() {
        let store = Arc::new(MockStore::default());
        store.push_get(Err(StoreError::NotFound));
        store.push_get(Err(StoreError::NotFound));
        let service = caching_service(store.clone(), 16);

        assert!(service.get_order("missing").await.is_err());
        assert!(service.get_order("missing").await.is_err());
        assert_eq!(store.get_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn write_path_does_not_populate_cache() {
        let store = Arc::new(MockStore::default());
        store.push_get(Ok(sample_order("b563feb7b2b84b6test")));
        let service = caching_service(store.clone(), 16);

        let order = sample_order("b563feb7b2b84b6test");
        service.process_new_order(&order).await.unwrap();

        // 書き込み後も最初の読み取りはストアまで行く
        service.get_order("b563feb7b2b84b6test").await.unwrap();
        assert_eq!(store.get_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn preload_fills_cache() {
        let store = Arc::new(MockStore::default());
        store.push_latest(Ok(vec![
            sample_order("preload1"),
            sample_order("preload2"),
        ]));
        let service = caching_service(store.clone(), 16);

        service.preload(10).await.unwrap();

        service.get_order("preload1").await.unwrap();
        service.get_order("preload2").await.unwrap();
        assert_eq!(store.get_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn preload_swallows_connection_failure() {
        let store = Arc::new(MockStore::default());
        store.push_latest(Err(connection_failed()));
        let service = caching_service(store, 16);

        assert!(service.preload(10).await.is_ok());
    }

    #[tokio::test]
    async fn preload_propagates_other_errors() {
        let store = Arc::new(MockStore::default());
        store.push_latest(Err(StoreError::Other("boom".into())));
        let service = caching_service(store, 16);

        assert!(service.preload(10).await.is_err());
    }
}
