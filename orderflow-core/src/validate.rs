//! 注文バリデーション
//!
//! デコード後の注文に対する構造的・意味的チェック。全フィールドを
//! 走査し、最初に違反したフィールドを理由として返す。
//!
//! ここでの検査は「形」のみ（文字クラス・長さ・範囲）。通貨コードや
//! 言語タグをレジストリと突き合わせることはしない。

use crate::order::{Delivery, Item, Order, Payment};

/// バリデーション違反
///
/// Display は常に "invalid order: ..." で始まる。上位層はこの型の
/// 有無だけで poison 判定し、詳細はログ・DLQ ヘッダに流す。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid order: {field}: {reason}")]
pub struct ValidationError {
    /// 違反したフィールド（ドット区切りパス）
    pub field: &'static str,
    pub reason: &'static str,
}

fn fail(field: &'static str, reason: &'static str) -> Result<(), ValidationError> {
    Err(ValidationError { field, reason })
}

impl Order {
    /// 全制約を検査する。妥当なら Ok(())。
    ///
    /// 純粋関数。I/O も共有状態も触らない。
    pub fn validate(&self) -> Result<(), ValidationError> {
        // 主キー欠落は早期リジェクト
        if self.order_uid.trim().is_empty() {
            return fail("order_uid", "must not be empty");
        }
        if !is_alphanumeric(&self.order_uid) {
            return fail("order_uid", "must be alphanumeric");
        }
        if !is_alphanumeric(&self.track_number) {
            return fail("track_number", "must be alphanumeric");
        }
        if self.entry.is_empty() {
            return fail("entry", "required");
        }
        if !is_bcp47(&self.locale) {
            return fail("locale", "must be a language tag");
        }
        if self.customer_id.is_empty() {
            return fail("customer_id", "required");
        }
        if self.delivery_service.is_empty() {
            return fail("delivery_service", "required");
        }
        if !is_numeric(&self.shard_key) {
            return fail("shardkey", "must be numeric");
        }
        if self.sm_id <= 0 {
            return fail("sm_id", "must be positive");
        }
        if !is_numeric(&self.oof_shard) {
            return fail("oof_shard", "must be numeric");
        }

        self.delivery.validate()?;
        self.payment.validate()?;

        if self.items.is_empty() {
            return fail("items", "at least one item required");
        }
        for item in &self.items {
            item.validate()?;
        }

        Ok(())
    }
}

impl Delivery {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return fail("delivery.name", "required");
        }
        if !is_e164(&self.phone) {
            return fail("delivery.phone", "must be E.164");
        }
        if !is_numeric(&self.zip) {
            return fail("delivery.zip", "must be numeric");
        }
        if self.city.is_empty() {
            return fail("delivery.city", "required");
        }
        if self.address.is_empty() {
            return fail("delivery.address", "required");
        }
        if self.region.is_empty() {
            return fail("delivery.region", "required");
        }
        if !is_email(&self.email) {
            return fail("delivery.email", "must be an email address");
        }
        Ok(())
    }
}

impl Payment {
    fn validate(&self) -> Result<(), ValidationError> {
        if !is_alphanumeric(&self.transaction) {
            return fail("payment.transaction", "must be alphanumeric");
        }
        if !is_iso4217(&self.currency) {
            return fail("payment.currency", "must be a currency code");
        }
        if self.provider.is_empty() {
            return fail("payment.provider", "required");
        }
        if self.amount < 0 {
            return fail("payment.amount", "must not be negative");
        }
        if self.payment_dt <= 0 {
            return fail("payment.payment_dt", "must be positive unix seconds");
        }
        if self.bank.is_empty() {
            return fail("payment.bank", "required");
        }
        if self.delivery_cost < 0 {
            return fail("payment.delivery_cost", "must not be negative");
        }
        if self.goods_total <= 0 {
            return fail("payment.goods_total", "must be positive");
        }
        if self.custom_fee < 0 {
            return fail("payment.custom_fee", "must not be negative");
        }
        Ok(())
    }
}

impl Item {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.chrt_id <= 0 {
            return fail("items.chrt_id", "must be positive");
        }
        if !is_alphanumeric(&self.track_number) {
            return fail("items.track_number", "must be alphanumeric");
        }
        if self.price < 0 {
            return fail("items.price", "must not be negative");
        }
        if !is_alphanumeric(&self.rid) {
            return fail("items.rid", "must be alphanumeric");
        }
        if self.name.is_empty() {
            return fail("items.name", "required");
        }
        if !(0..=100).contains(&self.sale) {
            return fail("items.sale", "must be within 0..=100");
        }
        if self.size.is_empty() {
            return fail("items.size", "required");
        }
        if self.total_price < 0 {
            return fail("items.total_price", "must not be negative");
        }
        if self.nm_id <= 0 {
            return fail("items.nm_id", "must be positive");
        }
        if self.brand.is_empty() {
            return fail("items.brand", "required");
        }
        if self.status == 0 {
            return fail("items.status", "required");
        }
        Ok(())
    }
}

fn is_alphanumeric(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric())
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// E.164: '+' に続き 1〜15 桁、先頭は 1-9
fn is_e164(s: &str) -> bool {
    let Some(digits) = s.strip_prefix('+') else {
        return false;
    };
    (1..=15).contains(&digits.len())
        && digits.bytes().all(|b| b.is_ascii_digit())
        && !digits.starts_with('0')
}

/// 最低限のメール形: local@domain、ドメインにドットを 1 つ以上
fn is_email(s: &str) -> bool {
    let mut parts = s.splitn(2, '@');
    let (Some(local), Some(domain)) = (parts.next(), parts.next()) else {
        return false;
    };
    if local.is_empty() || domain.is_empty() {
        return false;
    }
    domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

/// BCP-47 の形: 先頭サブタグは英字 2〜8、以降は英数字 1〜8、'-' 区切り
fn is_bcp47(s: &str) -> bool {
    let mut subtags = s.split('-');
    let Some(primary) = subtags.next() else {
        return false;
    };
    if !(2..=8).contains(&primary.len()) || !primary.bytes().all(|b| b.is_ascii_alphabetic()) {
        return false;
    }
    subtags.all(|t| (1..=8).contains(&t.len()) && t.bytes().all(|b| b.is_ascii_alphanumeric()))
}

/// ISO-4217 の形: 英大文字ちょうど 3 文字
fn is_iso4217(s: &str) -> bool {
    s.len() == 3 && s.bytes().all(|b| b.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::testdata::valid_order;

    #[test]
    fn valid_order_passes() {
        assert!(valid_order().validate().is_ok());
    }

    #[test]
    fn empty_order_uid_rejected() {
        let mut order = valid_order();
        order.order_uid = "   ".into();
        let err = order.validate().unwrap_err();
        assert_eq!(err.field, "order_uid");
    }

    #[test]
    fn non_alphanumeric_uid_rejected() {
        let mut order = valid_order();
        order.order_uid = "has-dashes".into();
        assert!(order.validate().is_err());
    }

    #[test]
    fn bad_locale_rejected() {
        let mut order = valid_order();
        order.locale = "e".into();
        assert_eq!(order.validate().unwrap_err().field, "locale");

        order.locale = "en-US".into();
        assert!(order.validate().is_ok());
    }

    #[test]
    fn bad_phone_rejected() {
        let mut order = valid_order();
        order.delivery.phone = "9720000000".into();
        assert_eq!(order.validate().unwrap_err().field, "delivery.phone");

        order.delivery.phone = "+0123".into();
        assert!(order.validate().is_err());
    }

    #[test]
    fn bad_currency_rejected() {
        let mut order = valid_order();
        order.payment.currency = "usd".into();
        assert_eq!(order.validate().unwrap_err().field, "payment.currency");
    }

    #[test]
    fn sale_range_enforced() {
        let mut order = valid_order();
        order.items[0].sale = 101;
        assert_eq!(order.validate().unwrap_err().field, "items.sale");
        order.items[0].sale = 0;
        assert!(order.validate().is_ok());
    }

    #[test]
    fn empty_items_rejected() {
        let mut order = valid_order();
        order.items.clear();
        assert_eq!(order.validate().unwrap_err().field, "items");
    }

    #[test]
    fn zero_goods_total_rejected() {
        let mut order = valid_order();
        order.payment.goods_total = 0;
        assert_eq!(order.validate().unwrap_err().field, "payment.goods_total");
    }

    #[test]
    fn negative_amount_rejected() {
        let mut order = valid_order();
        order.payment.amount = -1;
        assert_eq!(order.validate().unwrap_err().field, "payment.amount");
    }

    #[test]
    fn validation_is_deterministic() {
        let order = valid_order();
        assert_eq!(order.validate(), order.validate());
    }
}
