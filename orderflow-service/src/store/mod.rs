//! Postgres ストア層
//!
//! 注文の原子的な複数テーブル挿入と JSON 読み出し。ドライバ由来の
//! エラーはここで {NotFound, AlreadyExists, ConnectionFailed, Other}
//! に分類し、上位層が sqlx に依存しないようにする。

mod queries;

use orderflow_core::Order;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::debug;

use crate::config::DatabaseConfig;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// ストア境界のエラー分類
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// 該当レコードなし
    #[error("no such record exists")]
    NotFound,
    /// order_uid のユニーク制約違反
    #[error("record already exists: uid={uid}")]
    AlreadyExists { uid: String },
    /// 接続断・タイムアウト・キャンセル等の一過性障害
    #[error("connection to the database failed: {0}")]
    ConnectionFailed(#[source] sqlx::Error),
    #[error("store failure: {0}")]
    Other(#[source] BoxError),
}

/// Postgres 実装
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 遅延接続でプールを作る。DB が落ちていても起動は成功し、
    /// 最初のクエリ（またはヘルスプローブ）で失敗が観測される。
    pub fn connect_lazy(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_lazy(&config.dsn())?;
        Ok(Self { pool })
    }

    /// 注文一式を単一トランザクションで挿入する
    ///
    /// ヘッダ挿入が返す id を FK に使い、delivery / payment / items を
    /// 書き込んで commit。途中で失敗したら tx の drop で rollback される。
    pub async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        let order_id: i64 = sqlx::query_scalar(queries::INSERT_ORDER)
            .bind(&order.order_uid)
            .bind(&order.track_number)
            .bind(&order.entry)
            .bind(&order.locale)
            .bind(&order.internal_signature)
            .bind(&order.customer_id)
            .bind(&order.delivery_service)
            .bind(&order.shard_key)
            .bind(order.sm_id)
            .bind(order.date_created)
            .bind(&order.oof_shard)
            .fetch_one(&mut *tx)
            .await
            .map_err(|err| classify_unique(err, &order.order_uid))?;

        sqlx::query(queries::INSERT_DELIVERY)
            .bind(order_id)
            .bind(&order.delivery.name)
            .bind(&order.delivery.phone)
            .bind(&order.delivery.zip)
            .bind(&order.delivery.city)
            .bind(&order.delivery.address)
            .bind(&order.delivery.region)
            .bind(&order.delivery.email)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        sqlx::query(queries::INSERT_PAYMENT)
            .bind(order_id)
            .bind(&order.payment.transaction)
            .bind(&order.payment.request_id)
            .bind(&order.payment.currency)
            .bind(&order.payment.provider)
            .bind(order.payment.amount)
            .bind(order.payment.payment_dt)
            .bind(&order.payment.bank)
            .bind(order.payment.delivery_cost)
            .bind(order.payment.goods_total)
            .bind(order.payment.custom_fee)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        for item in &order.items {
            sqlx::query(queries::INSERT_ITEM)
                .bind(order_id)
                .bind(item.chrt_id)
                .bind(&item.track_number)
                .bind(item.price)
                .bind(&item.rid)
                .bind(&item.name)
                .bind(item.sale)
                .bind(&item.size)
                .bind(item.total_price)
                .bind(item.nm_id)
                .bind(&item.brand)
                .bind(item.status)
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
        }

        tx.commit().await.map_err(classify)?;
        debug!(order_uid = %order.order_uid, "order persisted");
        Ok(())
    }

    /// 注文 1 件を取得する。副作用なし・冪等。
    pub async fn get(&self, order_uid: &str) -> Result<Order, StoreError> {
        let row: Option<serde_json::Value> = sqlx::query_scalar(queries::SELECT_ORDER_JSON)
            .bind(order_uid)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        let value = row.ok_or(StoreError::NotFound)?;
        serde_json::from_value(value).map_err(|err| StoreError::Other(err.into()))
    }

    /// 更新日時の新しい順に最大 `limit` 件（キャッシュのプリロード用）
    pub async fn get_latest_orders(&self, limit: i64) -> Result<Vec<Order>, StoreError> {
        let rows: Vec<serde_json::Value> = sqlx::query_scalar(queries::SELECT_LATEST_ORDERS_JSON)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;

        rows.into_iter()
            .map(|value| serde_json::from_value(value).map_err(|err| StoreError::Other(err.into())))
            .collect()
    }

    /// ヘルスプローブ用の疎通確認
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }
}

/// 一過性の接続障害かどうか
///
/// - ドライバの接続状態エラー（プール枯渇・クローズ・ワーカー落ち）
/// - OS レベルの broken pipe / connection reset（Io）
/// - Postgres の接続例外クラス 08xxx、管理シャットダウン 57Pxx、
///   クエリキャンセル 57014（デッドライン相当）
fn is_connection_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => match db.code() {
            Some(code) => code.starts_with("08") || code.starts_with("57P") || code == "57014",
            None => false,
        },
        _ => false,
    }
}

fn classify(err: sqlx::Error) -> StoreError {
    if is_connection_error(&err) {
        return StoreError::ConnectionFailed(err);
    }
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        other => StoreError::Other(other.into()),
    }
}

/// ヘッダ挿入専用: ユニーク制約違反 (23505) を AlreadyExists に写す
fn classify_unique(err: sqlx::Error, uid: &str) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some("23505") {
            return StoreError::AlreadyExists { uid: uid.to_string() };
        }
    }
    classify(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_is_connection_failure() {
        let err = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "broken pipe",
        ));
        assert!(is_connection_error(&err));
        assert!(matches!(classify(err), StoreError::ConnectionFailed(_)));
    }

    #[test]
    fn pool_exhaustion_is_connection_failure() {
        assert!(is_connection_error(&sqlx::Error::PoolTimedOut));
        assert!(is_connection_error(&sqlx::Error::PoolClosed));
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        assert!(matches!(classify(sqlx::Error::RowNotFound), StoreError::NotFound));
    }

    #[test]
    fn error_strings_are_stable() {
        // 上位層（DLQ 理由・ログ）が参照する文言
        assert_eq!(StoreError::NotFound.to_string(), "no such record exists");
        let dup = StoreError::AlreadyExists { uid: "abc123".into() };
        assert!(dup.to_string().starts_with("record already exists"));
    }
}
