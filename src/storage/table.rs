//! Record Table
//!
//! Owns the `key -> (value, expires_at)` mapping together with its
//! [`ExpiryIndex`]. Keys are kept in a `BTreeMap`, so every scan is in
//! ascending key order and pagination is stable for a fixed snapshot.
//!
//! All state changes go through [`RecordTable::apply`], which takes a batch of
//! [`Mutation`]s. The same batches are what the record log persists, so replay
//! after a restart runs exactly the code path the live writes ran.
//!
//! ```text
//!   Database ──batch──> RecordLog (frame) ──ok──> RecordTable::apply
//!                                                   ├─ records: BTreeMap
//!                                                   └─ expiry:  ExpiryIndex
//! ```

use super::expiry_index::ExpiryIndex;
use super::pattern::LikePattern;
use super::record::Record;
use crate::clock::Timestamp;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One logical change to the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    /// Insert or replace a record
    Put {
        key: String,
        value: Bytes,
        expires_at: Option<Timestamp>,
    },
    /// Remove a record if present
    Delete { key: String },
    /// Remove every record
    Clear,
}

impl Mutation {
    /// Creates a put that stores `record` under `key`.
    pub fn put(key: impl Into<String>, record: Record) -> Self {
        Mutation::Put {
            key: key.into(),
            value: record.value,
            expires_at: record.expires_at,
        }
    }

    /// Creates a delete for `key`.
    pub fn delete(key: impl Into<String>) -> Self {
        Mutation::Delete { key: key.into() }
    }
}

#[derive(Debug, Default)]
pub struct RecordTable {
    records: BTreeMap<String, Record>,
    expiry: ExpiryIndex,
}

impl RecordTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a batch in order. Infallible: anything that can be rejected
    /// must be rejected before the batch is built.
    pub fn apply(&mut self, batch: impl IntoIterator<Item = Mutation>) {
        for mutation in batch {
            match mutation {
                Mutation::Put {
                    key,
                    value,
                    expires_at,
                } => {
                    self.put(key, Record::with_expiry(value, expires_at));
                }
                Mutation::Delete { key } => {
                    self.remove(&key);
                }
                Mutation::Clear => {
                    self.records.clear();
                    self.expiry.clear();
                }
            }
        }
    }

    fn put(&mut self, key: String, record: Record) {
        let old = self.records.get(&key).and_then(|r| r.expires_at);
        self.expiry.reindex(&key, old, record.expires_at);
        self.records.insert(key, record);
    }

    fn remove(&mut self, key: &str) -> Option<Record> {
        let record = self.records.remove(key)?;
        if let Some(exp) = record.expires_at {
            self.expiry.remove(exp, key);
        }
        Some(record)
    }

    /// Raw lookup, expired or not.
    pub fn get(&self, key: &str) -> Option<&Record> {
        self.records.get(key)
    }

    /// Lookup that treats expired records as absent.
    pub fn get_live(&self, key: &str, now: Timestamp) -> Option<&Record> {
        self.records.get(key).filter(|r| r.is_live(now))
    }

    /// Returns `true` if `key` holds a live record.
    pub fn contains_live(&self, key: &str, now: Timestamp) -> bool {
        self.get_live(key, now).is_some()
    }

    /// Records whose key matches `pattern`, in ascending key order.
    pub fn scan<'a>(
        &'a self,
        pattern: &'a LikePattern,
    ) -> Box<dyn Iterator<Item = (&'a String, &'a Record)> + 'a> {
        match pattern.literal_prefix() {
            Some(prefix) => Box::new(
                self.records
                    .range(prefix.clone()..)
                    .take_while(move |(key, _)| key.starts_with(prefix.as_str()))
                    .filter(move |(key, _)| pattern.matches(key)),
            ),
            None if pattern.matches_all() => Box::new(self.records.iter()),
            None => Box::new(self.records.iter().filter(move |(key, _)| pattern.matches(key))),
        }
    }

    /// Live keys matching `pattern`, in ascending key order.
    pub fn live_keys<'a>(
        &'a self,
        pattern: &'a LikePattern,
        now: Timestamp,
    ) -> impl Iterator<Item = &'a String> + 'a {
        self.scan(pattern)
            .filter(move |(_, record)| record.is_live(now))
            .map(|(key, _)| key)
    }

    /// All records, live or expired, in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Record)> {
        self.records.iter()
    }

    /// Raw row count, live or expired.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the table holds no records at all.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records with `expires_at <= now`.
    pub fn count_expired(&self, now: Timestamp) -> usize {
        self.expiry.count_expired(now)
    }

    /// Up to `limit` expired keys, earliest expiry first.
    pub fn expired_keys(&self, now: Timestamp, limit: usize) -> Vec<String> {
        self.expiry.expired(now, limit)
    }

    /// Number of records that carry an expiry time.
    pub fn expiring(&self) -> usize {
        self.expiry.len()
    }
}
