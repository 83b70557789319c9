//! Expiry Index
//!
//! A secondary index over records that have an expiry time, ordered by
//! `(expires_at, key)`. Answers "which keys have expired by `now`" without
//! scanning the whole table. Records without expiry are never indexed.
//!
//! The index is derived state: [`RecordTable`](super::table::RecordTable)
//! updates it on every mutation and it is never persisted.

use crate::clock::Timestamp;
use std::collections::BTreeSet;
use std::ops::Bound;

#[derive(Debug, Default)]
pub struct ExpiryIndex {
    entries: BTreeSet<(Timestamp, String)>,
}

impl ExpiryIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes `key` as expiring at `expires_at`.
    pub fn insert(&mut self, expires_at: Timestamp, key: &str) {
        self.entries.insert((expires_at, key.to_owned()));
    }

    /// Drops the entry for `key` at `expires_at`. Returns whether it was present.
    pub fn remove(&mut self, expires_at: Timestamp, key: &str) -> bool {
        self.entries.remove(&(expires_at, key.to_owned()))
    }

    /// Replaces the indexed expiry of `key`. Either side may be None.
    pub fn reindex(&mut self, key: &str, old: Option<Timestamp>, new: Option<Timestamp>) {
        if old == new {
            return;
        }
        if let Some(old) = old {
            self.remove(old, key);
        }
        if let Some(new) = new {
            self.insert(new, key);
        }
    }

    /// Number of indexed keys with `expires_at <= now`.
    pub fn count_expired(&self, now: Timestamp) -> usize {
        self.expired_range(now).count()
    }

    /// Up to `limit` keys with `expires_at <= now`, earliest first.
    pub fn expired(&self, now: Timestamp, limit: usize) -> Vec<String> {
        self.expired_range(now)
            .take(limit)
            .map(|(_, key)| key.clone())
            .collect()
    }

    /// Number of keys that carry an expiry time.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no key carries an expiry time.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn expired_range(&self, now: Timestamp) -> impl Iterator<Item = &(Timestamp, String)> {
        // (now, "") < (now, any key) < (now + 1, "")
        let upper = match now.checked_add(1) {
            Some(next) => Bound::Excluded((next, String::new())),
            None => Bound::Unbounded,
        };
        self.entries.range((Bound::Unbounded, upper))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_is_inclusive_of_now() {
        let mut index = ExpiryIndex::new();
        index.insert(10, "a");
        index.insert(20, "b");
        index.insert(20, "c");
        index.insert(30, "d");

        assert_eq!(index.count_expired(9), 0);
        assert_eq!(index.count_expired(10), 1);
        assert_eq!(index.count_expired(20), 3);
        assert_eq!(index.expired(25, 10), vec!["a", "b", "c"]);
        assert_eq!(index.expired(25, 2), vec!["a", "b"]);
        assert_eq!(index.count_expired(u64::MAX), 4);
    }

    #[test]
    fn test_reindex() {
        let mut index = ExpiryIndex::new();
        index.reindex("k", None, Some(50));
        assert_eq!(index.expired(50, 10), vec!["k"]);

        index.reindex("k", Some(50), Some(70));
        assert_eq!(index.len(), 1);
        assert_eq!(index.count_expired(69), 0);
        assert_eq!(index.expired(70, 10), vec!["k"]);

        index.reindex("k", Some(70), None);
        assert!(index.is_empty());
    }

    #[test]
    fn test_remove_missing() {
        let mut index = ExpiryIndex::new();
        index.insert(5, "a");
        assert!(!index.remove(6, "a"));
        assert!(index.remove(5, "a"));
        assert!(!index.remove(5, "a"));
    }
}
