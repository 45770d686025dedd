//! Deduplicated, append-ordered record of observed values.
//!
//! The store is the only shared mutable state in a node. It is mutated from
//! three places (client broadcasts, peer broadcasts and anti-entropy merges)
//! and all of them go through [`MessageStore::add_message`], which checks and
//! inserts under one lock. Entries are never removed.

use parking_lot::Mutex;

use crate::message::MessageMap;

/// In-memory message store.
///
/// Every operation takes one exclusive lock for its whole duration, so a
/// membership check and the insertion that depends on it can never interleave
/// with another caller's. The lock is never held across an await point.
#[derive(Debug, Default)]
pub struct MessageStore {
    inner: Mutex<MessageStoreInner>,
}

#[derive(Debug, Default)]
struct MessageStoreInner {
    /// Values in first-insertion order.
    values: Vec<i64>,
    /// Seen identifiers and their values. Same cardinality as `values`.
    seen: MessageMap,
}

impl MessageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value` under `id` unless `id` has been seen before.
    ///
    /// Returns `true` if this was a new message, `false` if it already existed
    /// (in which case `value` is ignored).
    pub fn add_message(&self, id: impl Into<String>, value: i64) -> bool {
        let id = id.into();
        let mut inner = self.inner.lock();

        if inner.seen.contains_key(&id) {
            return false;
        }

        inner.seen.insert(id, value);
        inner.values.push(value);
        true
    }

    /// All values ever added, in the order this node first saw them.
    pub fn read_all(&self) -> Vec<i64> {
        self.inner.lock().values.clone()
    }

    /// An independent copy of the id-to-value mapping.
    pub fn read_snapshot(&self) -> MessageMap {
        self.inner.lock().seen.clone()
    }

    /// Add every entry of `map`, returning how many were new.
    pub fn merge(&self, map: MessageMap) -> usize {
        map.into_iter()
            .filter(|(id, value)| self.add_message(id.as_str(), *value))
            .count()
    }

    /// Check if a message id has been seen.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().seen.contains_key(id)
    }

    /// Number of stored messages.
    pub fn len(&self) -> usize {
        self.inner.lock().values.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn test_add_and_read() {
        let store = MessageStore::new();

        assert!(store.add_message("n1-1", 5));
        assert!(store.add_message("n1-2", 9));

        assert_eq!(store.read_all(), vec![5, 9]);
        assert_eq!(store.len(), 2);
        assert!(store.contains("n1-1"));
        assert!(!store.contains("n1-3"));
    }

    #[test]
    fn test_duplicate_id_is_ignored() {
        let store = MessageStore::new();

        assert!(store.add_message("n1-1", 5));
        assert!(!store.add_message("n1-1", 5));
        // Same id with a different value is still a duplicate.
        assert!(!store.add_message("n1-1", 6));

        assert_eq!(store.read_all(), vec![5]);
        assert_eq!(store.read_snapshot().get("n1-1"), Some(&5));
    }

    #[test]
    fn test_equal_values_under_distinct_ids() {
        let store = MessageStore::new();

        store.add_message("n1-1", 3);
        store.add_message("n2-1", 3);

        assert_eq!(store.read_all(), vec![3, 3]);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let store = MessageStore::new();
        store.add_message("n1-1", 5);

        let mut snapshot = store.read_snapshot();
        snapshot.insert("n9-9".into(), 99);
        snapshot.remove("n1-1");

        assert_eq!(store.read_all(), vec![5]);
        assert!(store.contains("n1-1"));
        assert!(!store.contains("n9-9"));
    }

    #[test]
    fn test_merge_counts_new_entries() {
        let store = MessageStore::new();
        store.add_message("n1-1", 5);

        let mut incoming = MessageMap::new();
        incoming.insert("n1-1".into(), 5);
        incoming.insert("n2-1".into(), 8);
        incoming.insert("n3-1".into(), 13);

        assert_eq!(store.merge(incoming.clone()), 2);
        assert_eq!(store.merge(incoming), 0);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds() {
        let store = Arc::new(MessageStore::new());
        let mut tasks = Vec::new();

        // 8 writers racing over the same 500 ids.
        for _ in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..500 {
                    store.add_message(format!("n1-{i}"), i);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.len(), 500);
        assert_eq!(store.read_snapshot().len(), 500);
    }

    proptest! {
        #[test]
        fn prop_len_matches_distinct_ids(entries in prop::collection::vec((0u64..64, any::<i64>()), 0..256)) {
            let store = MessageStore::new();
            let mut distinct = std::collections::HashSet::new();

            for (seq, value) in &entries {
                let id = format!("n1-{seq}");
                let inserted = store.add_message(id.clone(), *value);
                prop_assert_eq!(inserted, distinct.insert(id));
            }

            prop_assert_eq!(store.len(), distinct.len());
            prop_assert_eq!(store.read_snapshot().len(), distinct.len());
            prop_assert_eq!(store.read_all().len(), distinct.len());
        }
    }
}
