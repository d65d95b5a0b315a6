//! バイト上限つき LRU キャッシュ
//!
//! ## 設計
//! - `order_uid` をキーに `Arc<Order>` のスナップショットを保持する
//! - 連結リストはスロット配列（arena）上のインデックスで表現し、
//!   ノードのヒープ確保を避ける
//! - mutex は 1 本。`get` も recency 更新（昇格）を伴うため書きロック
//!
//! ## 容量制御
//! - `entry_count_cap`: 常駐エントリ数の上限。超過ぶんは LRU 末尾から追い出す
//! - `entry_size_cap`: 単一エントリの近似ディープサイズ上限。
//!   超えた値は挿入自体を黙って無視する（新規キーのみ判定。既存キーの
//!   置き換えはサイズ再計測しない）

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::order::Order;
use crate::sizeof::DeepSize;

/// インデックスの番兵値
const NIL: usize = usize::MAX;

struct Slot {
    key: String,
    value: Arc<Order>,
    prev: usize,
    next: usize,
}

struct LruInner {
    map: HashMap<String, usize>,
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    /// MRU 側
    head: usize,
    /// LRU 側
    tail: usize,
}

/// スレッドセーフな LRU キャッシュ
pub struct LruCache {
    entry_count_cap: usize,
    entry_size_cap: usize,
    inner: Mutex<LruInner>,
}

impl LruCache {
    pub fn new(entry_count_cap: usize, entry_size_cap: usize) -> Self {
        Self {
            entry_count_cap,
            entry_size_cap,
            inner: Mutex::new(LruInner {
                map: HashMap::new(),
                slots: Vec::new(),
                free: Vec::new(),
                head: NIL,
                tail: NIL,
            }),
        }
    }

    /// キーを引く。ヒットしたら MRU に昇格してスナップショットを返す
    pub fn get(&self, key: &str) -> Option<Arc<Order>> {
        let mut inner = self.lock();
        let idx = *inner.map.get(key)?;
        inner.detach(idx);
        inner.push_front(idx);
        Some(Arc::clone(&inner.slot(idx).value))
    }

    /// 注文を挿入する。キーは `order_uid`
    ///
    /// - 既存キー: 値を置き換えて MRU に昇格（サイズ再計測なし）
    /// - 新規キー: `entry_size_cap` 超過なら no-op。それ以外は MRU に追加
    ///
    /// 挿入後、エントリ数が上限以下になるまで LRU 末尾から追い出す
    pub fn insert(&self, value: Arc<Order>) {
        let key = value.order_uid.clone();
        let mut inner = self.lock();

        if let Some(&idx) = inner.map.get(&key) {
            inner.slot_mut(idx).value = value;
            inner.detach(idx);
            inner.push_front(idx);
        } else {
            if value.deep_size_of() > self.entry_size_cap {
                return;
            }
            let idx = inner.alloc(Slot {
                key: key.clone(),
                value,
                prev: NIL,
                next: NIL,
            });
            inner.map.insert(key, idx);
            inner.push_front(idx);
        }

        while inner.map.len() > self.entry_count_cap {
            inner.evict_tail();
        }
    }

    /// 常駐エントリ数
    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl LruInner {
    fn slot(&self, idx: usize) -> &Slot {
        self.slots[idx].as_ref().expect("occupied slot")
    }

    fn slot_mut(&mut self, idx: usize) -> &mut Slot {
        self.slots[idx].as_mut().expect("occupied slot")
    }

    fn alloc(&mut self, slot: Slot) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(slot);
            idx
        } else {
            self.slots.push(Some(slot));
            self.slots.len() - 1
        }
    }

    /// リストからノードを外す（スロットは解放しない）
    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let slot = self.slot(idx);
            (slot.prev, slot.next)
        };
        if prev != NIL {
            self.slot_mut(prev).next = next;
        } else if self.head == idx {
            self.head = next;
        }
        if next != NIL {
            self.slot_mut(next).prev = prev;
        } else if self.tail == idx {
            self.tail = prev;
        }
        let slot = self.slot_mut(idx);
        slot.prev = NIL;
        slot.next = NIL;
    }

    /// ノードを MRU 端に繋ぐ
    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let slot = self.slot_mut(idx);
            slot.prev = NIL;
            slot.next = old_head;
        }
        if old_head != NIL {
            self.slot_mut(old_head).prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    /// LRU 末尾のエントリを削除してスロットを解放する
    fn evict_tail(&mut self) {
        let idx = self.tail;
        if idx == NIL {
            return;
        }
        self.detach(idx);
        let slot = self.slots[idx].take().expect("occupied slot");
        self.map.remove(&slot.key);
        self.free.push(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::testdata::valid_order;

    fn order_with_uid(uid: &str) -> Arc<Order> {
        let mut order = valid_order();
        order.order_uid = uid.into();
        Arc::new(order)
    }

    #[test]
    fn insert_and_get() {
        let cache = LruCache::new(10, 1 << 20);
        cache.insert(order_with_uid("a1"));

        let hit = cache.get("a1").unwrap();
        assert_eq!(hit.order_uid, "a1");
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn count_cap_evicts_lru() {
        let cache = LruCache::new(2, 1 << 20);
        cache.insert(order_with_uid("a1"));
        cache.insert(order_with_uid("b2"));
        cache.insert(order_with_uid("c3"));

        assert_eq!(cache.len(), 2);
        // a1 が最古 → 追い出し済み
        assert!(cache.get("a1").is_none());
        assert!(cache.get("b2").is_some());
        assert!(cache.get("c3").is_some());
    }

    #[test]
    fn get_promotes_entry() {
        let cache = LruCache::new(2, 1 << 20);
        cache.insert(order_with_uid("a1"));
        cache.insert(order_with_uid("b2"));

        // a1 を昇格させると b2 が最古になる
        assert!(cache.get("a1").is_some());
        cache.insert(order_with_uid("c3"));

        assert!(cache.get("a1").is_some());
        assert!(cache.get("b2").is_none());
    }

    #[test]
    fn reinsert_promotes_and_replaces() {
        let cache = LruCache::new(2, 1 << 20);
        cache.insert(order_with_uid("a1"));
        cache.insert(order_with_uid("b2"));

        let mut replacement = valid_order();
        replacement.order_uid = "a1".into();
        replacement.customer_id = "replaced".into();
        cache.insert(Arc::new(replacement));

        cache.insert(order_with_uid("c3"));

        let hit = cache.get("a1").unwrap();
        assert_eq!(hit.customer_id, "replaced");
        assert!(cache.get("b2").is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn oversize_entry_rejected() {
        let cache = LruCache::new(10, 16);
        cache.insert(order_with_uid("a1"));
        assert!(cache.get("a1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn count_never_exceeds_cap() {
        let cache = LruCache::new(3, 1 << 20);
        for i in 0..50 {
            cache.insert(order_with_uid(&format!("uid{i}")));
            assert!(cache.len() <= 3);
        }
    }

    #[test]
    fn slots_are_reused_after_eviction() {
        let cache = LruCache::new(2, 1 << 20);
        for i in 0..100 {
            cache.insert(order_with_uid(&format!("uid{i}")));
        }
        let inner = cache.inner.lock().unwrap();
        // arena は上限ぶんしか伸びない
        assert!(inner.slots.len() <= 3);
    }
}
