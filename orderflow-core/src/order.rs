//! 注文ドメインモデルと厳格デコード
//!
//! ブローカーから届く JSON ペイロードをそのまま写した構造体群。
//! ワイヤ形式との互換性のため、フィールド名は受信 JSON に合わせる
//! （`shardkey` のみ rename で吸収）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 注文（ルート集約）
///
/// `order_uid` が全体の主キー。キャッシュキー・Kafka メッセージキー・
/// DB のユニーク制約はすべてこの値を使う。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Order {
    pub order_uid: String,
    pub track_number: String,
    pub entry: String,
    pub delivery: Delivery,
    pub payment: Payment,
    pub items: Vec<Item>,
    /// BCP-47 言語タグ（例: "en", "ru-RU"）
    pub locale: String,
    #[serde(default)]
    pub internal_signature: String,
    pub customer_id: String,
    pub delivery_service: String,
    /// ワイヤ上は "shardkey"（アンダースコア無し）
    #[serde(rename = "shardkey")]
    pub shard_key: String,
    pub sm_id: i32,
    pub date_created: DateTime<Utc>,
    pub oof_shard: String,
}

/// 配送先（注文と 1:1）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Delivery {
    pub name: String,
    /// E.164 形式の電話番号
    pub phone: String,
    pub zip: String,
    pub city: String,
    pub address: String,
    pub region: String,
    pub email: String,
}

/// 支払い（注文と 1:1）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Payment {
    pub transaction: String,
    #[serde(default)]
    pub request_id: String,
    /// ISO-4217 通貨コード
    pub currency: String,
    pub provider: String,
    pub amount: i64,
    /// Unix 秒
    pub payment_dt: i64,
    pub bank: String,
    pub delivery_cost: i64,
    pub goods_total: i64,
    pub custom_fee: i64,
}

/// 注文アイテム（注文と 1:N、最低 1 件）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Item {
    pub chrt_id: i64,
    pub track_number: String,
    pub price: i64,
    pub rid: String,
    pub name: String,
    /// 割引率 0..=100
    pub sale: i32,
    pub size: String,
    pub total_price: i64,
    pub nm_id: i64,
    pub brand: String,
    pub status: i32,
}

/// デコード失敗の分類
///
/// 未知フィールドは呼び出し側で Malformed と同等に扱われるが、
/// DLQ 理由やログでは区別できるよう分けておく。
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed json: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("unknown field in payload: {0}")]
    UnknownField(String),
}

/// ペイロードを厳格にデコードする
///
/// - 構文エラー・型不一致・必須フィールド欠落 → `Malformed`
/// - 未知フィールド → `UnknownField`
///
/// 純粋関数。同じ入力は常に同じ結果を返す。
pub fn decode_order(payload: &[u8]) -> Result<Order, DecodeError> {
    match serde_json::from_slice::<Order>(payload) {
        Ok(order) => Ok(order),
        Err(err) => {
            let msg = err.to_string();
            if err.classify() == serde_json::error::Category::Data
                && msg.starts_with("unknown field")
            {
                Err(DecodeError::UnknownField(msg))
            } else {
                Err(DecodeError::Malformed(err))
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_roundtrip() {
        let order = testdata::valid_order();
        let bytes = serde_json::to_vec(&order).unwrap();
        let decoded = decode_order(&bytes).unwrap();
        assert_eq!(decoded, order);
    }

    #[test]
    fn decode_wire_field_names() {
        let order = testdata::valid_order();
        let value = serde_json::to_value(&order).unwrap();
        // ワイヤ上は shardkey
        assert!(value.get("shardkey").is_some());
        assert!(value.get("shard_key").is_none());
    }

    #[test]
    fn decode_rejects_broken_json() {
        let err = decode_order(br#"{"order_uid": "invalid-0", "items": [}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn decode_rejects_unknown_field() {
        let order = testdata::valid_order();
        let mut value = serde_json::to_value(&order).unwrap();
        value["not_a_field"] = serde_json::json!(1);
        let bytes = serde_json::to_vec(&value).unwrap();
        let err = decode_order(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownField(_)));
    }

    #[test]
    fn decode_rejects_missing_required() {
        let order = testdata::valid_order();
        let mut value = serde_json::to_value(&order).unwrap();
        value.as_object_mut().unwrap().remove("payment");
        let bytes = serde_json::to_vec(&value).unwrap();
        let err = decode_order(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }
}
