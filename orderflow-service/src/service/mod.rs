//! 注文オーケストレーション層
//!
//! コンシューマと HTTP API の両方が使うビジネスロジック境界。
//! バリデーション → ストア書き込みの合成と、読み取りの窓口を提供する。
//! キャッシュはデコレータ（cache.rs）として重ねる。

pub mod cache;

use std::sync::Arc;

use async_trait::async_trait;
use orderflow_core::{Order, ValidationError};
use tracing::info;

use crate::metrics;
use crate::store::{PgStore, StoreError};

/// ストア契約。service 層とキャッシュのプリロードが依存する。
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: &Order) -> Result<(), StoreError>;
    async fn get(&self, order_uid: &str) -> Result<Order, StoreError>;
    async fn get_latest_orders(&self, limit: i64) -> Result<Vec<Order>, StoreError>;
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        PgStore::insert(self, order).await
    }

    async fn get(&self, order_uid: &str) -> Result<Order, StoreError> {
        PgStore::get(self, order_uid).await
    }

    async fn get_latest_orders(&self, limit: i64) -> Result<Vec<Order>, StoreError> {
        PgStore::get_latest_orders(self, limit).await
    }
}

/// 処理失敗の分類。ワーカーはこの型だけを見てコミット/DLQ/リトライを決める。
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProcessError {
    /// リトライ対象（一過性の接続障害）かどうか
    pub fn is_connection_failed(&self) -> bool {
        matches!(self, Self::Store(StoreError::ConnectionFailed(_)))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(StoreError::NotFound))
    }

    /// DLQ ヘッダに載せる分類文字列
    pub fn dlq_reason(&self) -> String {
        match self {
            Self::Invalid(_) => "invalid order".to_string(),
            Self::Store(StoreError::AlreadyExists { .. }) => "record already exists".to_string(),
            other => other.to_string(),
        }
    }
}

/// 注文サービス契約。コンシューマと API はこの trait 越しに呼ぶ。
#[async_trait]
pub trait OrderService: Send + Sync {
    /// 検証して永続化する。キャッシュへの同期書き込みはしない。
    async fn process_new_order(&self, order: &Order) -> Result<(), ProcessError>;
    /// UID で注文を引く
    async fn get_order(&self, order_uid: &str) -> Result<Arc<Order>, ProcessError>;
}

/// ストア直結のサービス実装
pub struct StoreOrderService {
    store: Arc<dyn OrderStore>,
}

impl StoreOrderService {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl OrderService for StoreOrderService {
    async fn process_new_order(&self, order: &Order) -> Result<(), ProcessError> {
        order.validate()?;

        {
            let _timer = orderflow_core::LatencyGuard::new(&metrics::DB_RESPONSE);
            self.store.insert(order).await?;
        }

        info!(order_uid = %order.order_uid, "order successfully processed");
        Ok(())
    }

    async fn get_order(&self, order_uid: &str) -> Result<Arc<Order>, ProcessError> {
        let _timer = orderflow_core::LatencyGuard::new(&metrics::DB_RESPONSE);
        let order = self.store.get(order_uid).await?;
        Ok(Arc::new(order))
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// テスト用ストア: 応答をキューで差し込み、呼び出し回数を数える
    #[derive(Default)]
    pub struct MockStore {
        pub insert_results: Mutex<VecDeque<Result<(), StoreError>>>,
        pub get_results: Mutex<VecDeque<Result<Order, StoreError>>>,
        pub latest_results: Mutex<VecDeque<Result<Vec<Order>, StoreError>>>,
        pub insert_calls: AtomicUsize,
        pub get_calls: AtomicUsize,
    }

    impl MockStore {
        pub fn push_insert(&self, result: Result<(), StoreError>) {
            self.insert_results.lock().unwrap().push_back(result);
        }

        pub fn push_get(&self, result: Result<Order, StoreError>) {
            self.get_results.lock().unwrap().push_back(result);
        }

        pub fn push_latest(&self, result: Result<Vec<Order>, StoreError>) {
            self.latest_results.lock().unwrap().push_back(result);
        }
    }

    #[async_trait]
    impl OrderStore for MockStore {
        async fn insert(&self, _order: &Order) -> Result<(), StoreError> {
            self.insert_calls.fetch_add(1, Ordering::SeqCst);
            self.insert_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(()))
        }

        async fn get(&self, order_uid: &str) -> Result<Order, StoreError> {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            self.get_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    let _ = order_uid;
                    Err(StoreError::NotFound)
                })
        }

        async fn get_latest_orders(&self, _limit: i64) -> Result<Vec<Order>, StoreError> {
            self.latest_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    /// テスト共通の妥当な注文
    pub fn sample_order(uid: &str) -> Order {
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
            "date_created": "2021-11-26T06:22:19Z",
            "oof_shard": "1"
        });
        serde_json::from_value(json).expect("sample order")
    }

    pub fn connection_failed() -> StoreError {
        StoreError::ConnectionFailed(sqlx::Error::PoolTimedOut)
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::{connection_failed, sample_order, MockStore};
    use super::*;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn valid_order_is_stored() {
        let store = Arc::new(MockStore::default());
        let service = StoreOrderService::new(store.clone());

        let order = sample_order("b563feb7b2b84b6test");
        service.process_new_order(&order).await.unwrap();
        assert_eq!(store.insert_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_order_never_reaches_store() {
        let store = Arc::new(MockStore::default());
        let service = StoreOrderService::new(store.clone());

        let mut order = sample_order("b563feb7b2b84b6test");
        order.order_uid = String::new();

        let err = service.process_new_order(&order).await.unwrap_err();
        assert!(matches!(err, ProcessError::Invalid(_)));
        assert_eq!(store.insert_calls.load(Ordering::SeqCst), 0);
        assert_eq!(err.dlq_reason(), "invalid order");
    }

    #[tokio::test]
    async fn store_errors_pass_through_classified() {
        let store = Arc::new(MockStore::default());
        store.push_insert(Err(StoreError::AlreadyExists {
            uid: "b563feb7b2b84b6test".into(),
        }));
        let service = StoreOrderService::new(store);

        let order = sample_order("b563feb7b2b84b6test");
        let err = service.process_new_order(&order).await.unwrap_err();
        assert_eq!(err.dlq_reason(), "record already exists");
    }

    #[tokio::test]
    async fn connection_failure_is_retryable() {
        let store = Arc::new(MockStore::default());
        store.push_insert(Err(connection_failed()));
        let service = StoreOrderService::new(store);

        let order = sample_order("b563feb7b2b84b6test");
        let err = service.process_new_order(&order).await.unwrap_err();
        assert!(err.is_connection_failed());
    }

    #[tokio::test]
    async fn get_order_surfaces_not_found() {
        let store = Arc::new(MockStore::default());
        store.push_get(Err(StoreError::NotFound));
        let service = StoreOrderService::new(store);

        let err = service.get_order("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
