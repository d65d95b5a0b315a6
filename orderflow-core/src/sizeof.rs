//! 近似ディープサイズ計測
//!
//! ## 目的
//! キャッシュのエントリサイズ上限を「エントリ数」ではなくバイト数で
//! 判定できるようにする。インラインサイズに加え、文字列・Vec・Box 等の
//! 間接参照先のヒープデータも合算する。
//!
//! ## 精度について
//! - 値は近似。アロケータのオーバーヘッドやパディングまでは追わない
//! - 同じ値に対しては常に同じ結果（決定的）
//! - 構造が増えれば値も単調に増える
//!
//! ## 循環参照
//! `Arc`/`Box` 経由で同じアドレスに再訪した場合は 0 を返して打ち切る。
//! 訪問済み判定はポインタ値（identity）で行う。

use std::collections::HashSet;
use std::mem;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::order::{Delivery, Item, Order, Payment};

/// 訪問済みアドレス集合（循環ガード）
pub type Visited = HashSet<usize>;

/// ヒープ上の間接データを数えられる型
pub trait DeepSize {
    /// インライン領域の外にあるデータのバイト数
    fn heap_size(&self, seen: &mut Visited) -> usize;

    /// インラインサイズ + ヒープデータの合計
    fn deep_size_of(&self) -> usize {
        let mut seen = Visited::new();
        mem::size_of_val(self) + self.heap_size(&mut seen)
    }
}

macro_rules! impl_deep_size_inline {
    ($($ty:ty),* $(,)?) => {
        $(
            impl DeepSize for $ty {
                fn heap_size(&self, _seen: &mut Visited) -> usize {
                    0
                }
            }
        )*
    };
}

impl_deep_size_inline!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, f32, f64, bool, char);

impl DeepSize for String {
    fn heap_size(&self, _seen: &mut Visited) -> usize {
        self.len()
    }
}

impl DeepSize for DateTime<Utc> {
    fn heap_size(&self, _seen: &mut Visited) -> usize {
        0
    }
}

impl<T: DeepSize> DeepSize for Vec<T> {
    /// 確保済み容量ぶんの要素スロット + 各要素のヒープデータ
    fn heap_size(&self, seen: &mut Visited) -> usize {
        let mut size = self.capacity() * mem::size_of::<T>();
        for elem in self {
            size += elem.heap_size(seen);
        }
        size
    }
}

impl<T: DeepSize> DeepSize for Option<T> {
    fn heap_size(&self, seen: &mut Visited) -> usize {
        match self {
            Some(v) => v.heap_size(seen),
            None => 0,
        }
    }
}

impl<T: DeepSize> DeepSize for Box<T> {
    fn heap_size(&self, seen: &mut Visited) -> usize {
        let ptr = (&**self) as *const T as usize;
        if !seen.insert(ptr) {
            return 0;
        }
        mem::size_of::<T>() + (**self).heap_size(seen)
    }
}

impl<T: DeepSize> DeepSize for Arc<T> {
    fn heap_size(&self, seen: &mut Visited) -> usize {
        let ptr = Arc::as_ptr(self) as usize;
        if !seen.insert(ptr) {
            return 0;
        }
        mem::size_of::<T>() + (**self).heap_size(seen)
    }
}

impl DeepSize for Order {
    fn heap_size(&self, seen: &mut Visited) -> usize {
        self.order_uid.heap_size(seen)
            + self.track_number.heap_size(seen)
            + self.entry.heap_size(seen)
            + self.delivery.heap_size(seen)
            + self.payment.heap_size(seen)
            + self.items.heap_size(seen)
            + self.locale.heap_size(seen)
            + self.internal_signature.heap_size(seen)
            + self.customer_id.heap_size(seen)
            + self.delivery_service.heap_size(seen)
            + self.shard_key.heap_size(seen)
            + self.oof_shard.heap_size(seen)
    }
}

impl DeepSize for Delivery {
    fn heap_size(&self, seen: &mut Visited) -> usize {
        self.name.heap_size(seen)
            + self.phone.heap_size(seen)
            + self.zip.heap_size(seen)
            + self.city.heap_size(seen)
            + self.address.heap_size(seen)
            + self.region.heap_size(seen)
            + self.email.heap_size(seen)
    }
}

impl DeepSize for Payment {
    fn heap_size(&self, seen: &mut Visited) -> usize {
        self.transaction.heap_size(seen)
            + self.request_id.heap_size(seen)
            + self.currency.heap_size(seen)
            + self.provider.heap_size(seen)
            + self.bank.heap_size(seen)
    }
}

impl DeepSize for Item {
    fn heap_size(&self, seen: &mut Visited) -> usize {
        self.track_number.heap_size(seen)
            + self.rid.heap_size(seen)
            + self.name.heap_size(seen)
            + self.size.heap_size(seen)
            + self.brand.heap_size(seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::testdata::valid_order;

    #[test]
    fn primitive_has_no_heap() {
        assert_eq!(42u64.deep_size_of(), mem::size_of::<u64>());
    }

    #[test]
    fn string_counts_bytes() {
        let s = String::from("hello");
        assert_eq!(s.deep_size_of(), mem::size_of::<String>() + 5);
    }

    #[test]
    fn order_deeper_than_inline() {
        let order = valid_order();
        assert!(order.deep_size_of() > mem::size_of::<Order>());
    }

    #[test]
    fn size_is_deterministic() {
        let order = valid_order();
        assert_eq!(order.deep_size_of(), order.deep_size_of());
    }

    #[test]
    fn size_is_monotone_in_growth() {
        let order = valid_order();
        let base = order.deep_size_of();

        let mut grown = order.clone();
        grown.items.push(grown.items[0].clone());
        assert!(grown.deep_size_of() > base);

        let mut longer = order.clone();
        longer.customer_id.push_str("xxxxxxxxxxxxxxxx");
        assert!(longer.deep_size_of() > base);
    }

    #[test]
    fn shared_arc_counted_once() {
        let inner = Arc::new(String::from("shared"));
        let pair = vec![Arc::clone(&inner), Arc::clone(&inner)];

        let mut seen = Visited::new();
        let twice = pair.heap_size(&mut seen);

        let mut seen_single = Visited::new();
        let once = vec![Arc::clone(&inner)].heap_size(&mut seen_single);

        // 2 本目の Arc はポインタ再訪で 0 扱い（Arc 自身のスロットぶんだけ増える）
        assert_eq!(twice, once + mem::size_of::<Arc<String>>());
    }
}
