//! Bounded, TTL-aware map used for every piece of ephemeral bridge state.
//!
//! Expiry is tracked in a single min-heap of deadlines that is drained by
//! [`ExpiringMap::sweep`], instead of a timer per entry. Reads also check the
//! deadline, so a stale entry is never observed between sweeps. Creation
//! order is kept in a `BTreeMap` keyed by a monotonically increasing sequence
//! number, which makes "evict the oldest-created entry" a first-key lookup.
//!
//! Replacing or removing an entry leaves its old deadline in the heap. The
//! heap is rebuilt from the live entries once stale items outnumber them, so
//! a key refreshed over and over never grows it past a small multiple of
//! `len()`.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

struct Slot<V> {
    value: V,
    seq: u64,
    expires_at: Instant,
}

pub struct ExpiringMap<K, V> {
    entries: HashMap<K, Slot<V>>,
    /// seq -> key, in creation order
    order: BTreeMap<u64, K>,
    deadlines: BinaryHeap<Reverse<(Instant, u64)>>,
    next_seq: u64,
    ttl: Duration,
    capacity: usize,
}

impl<K, V> ExpiringMap<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            deadlines: BinaryHeap::new(),
            next_seq: 0,
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Insert or replace `key`. A replaced entry gets a fresh creation time.
    ///
    /// Returns the key evicted to make room, if the map was full.
    pub fn insert(&mut self, key: K, value: V) -> Option<K> {
        let now = Instant::now();
        self.remove(&key);

        let evicted = if self.entries.len() >= self.capacity {
            self.evict_oldest()
        } else {
            None
        };

        let seq = self.next_seq;
        self.next_seq += 1;
        let expires_at = now + self.ttl;
        self.order.insert(seq, key.clone());
        self.deadlines.push(Reverse((expires_at, seq)));
        self.entries.insert(
            key,
            Slot {
                value,
                seq,
                expires_at,
            },
        );
        self.compact_deadlines();
        evicted
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|slot| slot.expires_at > now)
            .map(|slot| &slot.value)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let now = Instant::now();
        self.entries
            .get_mut(key)
            .filter(|slot| slot.expires_at > now)
            .map(|slot| &mut slot.value)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.seq);
        Some(slot.value)
    }

    /// First live key (in creation order) whose entry satisfies `pred`
    pub fn find_key<F>(&self, mut pred: F) -> Option<K>
    where
        F: FnMut(&K, &V) -> bool,
    {
        let now = Instant::now();
        self.order.values().find_map(|key| {
            let slot = self.entries.get(key)?;
            (slot.expires_at > now && pred(key, &slot.value)).then(|| key.clone())
        })
    }

    /// Drop every entry whose deadline has passed, returning their keys.
    pub fn sweep(&mut self) -> Vec<K> {
        let now = Instant::now();
        let mut expired = Vec::new();

        while let Some(Reverse((deadline, seq))) = self.deadlines.peek().copied() {
            if deadline > now {
                break;
            }
            self.deadlines.pop();

            // Entries removed or replaced earlier leave a stale heap item behind.
            let Some(key) = self.order.remove(&seq) else {
                continue;
            };
            self.entries.remove(&key);
            expired.push(key);
        }

        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.deadlines.clear();
    }

    fn compact_deadlines(&mut self) {
        if self.deadlines.len() <= 2 * self.entries.len() + 16 {
            return;
        }
        self.deadlines = self
            .entries
            .values()
            .map(|slot| Reverse((slot.expires_at, slot.seq)))
            .collect();
    }

    #[cfg(test)]
    pub(crate) fn heap_len(&self) -> usize {
        self.deadlines.len()
    }

    fn evict_oldest(&mut self) -> Option<K> {
        let (_, key) = self.order.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(600);

    #[tokio::test(start_paused = true)]
    async fn test_evicts_oldest_created_first() {
        let mut map = ExpiringMap::new(TTL, 3);
        map.insert("a", 1);
        tokio::time::advance(Duration::from_millis(10)).await;
        map.insert("b", 2);
        map.insert("c", 3);

        let evicted = map.insert("d", 4);
        assert_eq!(evicted, Some("a"));
        assert!(map.get(&"a").is_none());
        assert_eq!(map.get(&"b"), Some(&2));
        assert_eq!(map.len(), 3);

        assert_eq!(map.insert("e", 5), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reinsert_does_not_evict() {
        let mut map = ExpiringMap::new(TTL, 2);
        map.insert("a", 1);
        map.insert("b", 2);

        assert_eq!(map.insert("a", 10), None);
        assert_eq!(map.get(&"a"), Some(&10));
        // "a" was refreshed, so "b" is now the oldest
        assert_eq!(map.insert("c", 3), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_on_read_and_sweep() {
        let mut map = ExpiringMap::new(Duration::from_secs(10), 10);
        map.insert("old", 1);
        tokio::time::advance(Duration::from_secs(5)).await;
        map.insert("new", 2);
        tokio::time::advance(Duration::from_secs(6)).await;

        assert!(map.get(&"old").is_none());
        assert_eq!(map.get(&"new"), Some(&2));

        assert_eq!(map.sweep(), vec!["old"]);
        assert_eq!(map.len(), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(map.sweep(), vec!["new"]);
        assert!(map.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_skips_removed_and_replaced_entries() {
        let mut map = ExpiringMap::new(Duration::from_secs(10), 10);
        map.insert("gone", 1);
        map.insert("kept", 2);
        map.remove(&"gone");
        tokio::time::advance(Duration::from_secs(8)).await;
        map.insert("kept", 3);
        tokio::time::advance(Duration::from_secs(3)).await;

        assert!(map.sweep().is_empty());
        assert_eq!(map.get(&"kept"), Some(&3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshing_one_key_keeps_heap_small() {
        let mut map = ExpiringMap::new(TTL, 100);
        map.insert("other", 0);
        for i in 0..10_000 {
            map.insert("hot", i);
        }

        assert_eq!(map.len(), 2);
        assert!(map.heap_len() <= 2 * map.len() + 17);
        assert_eq!(map.get(&"hot"), Some(&9_999));

        // Rebuilt deadlines still expire the live entries
        tokio::time::advance(TTL).await;
        let mut expired = map.sweep();
        expired.sort();
        assert_eq!(expired, vec!["hot", "other"]);
        assert_eq!(map.heap_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_find_key_walks_creation_order() {
        let mut map = ExpiringMap::new(TTL, 10);
        map.insert("abc-2", 2);
        map.insert("abc-1", 1);
        let found = map.find_key(|key, _| key.starts_with("abc"));
        assert_eq!(found, Some("abc-2"));
    }
}
