//! Raw statements for [`Database::execute`](crate::Database::execute).
//!
//! These run directly against the record table. They skip key validation
//! and the liveness filter, so expired-but-unreclaimed rows are visible and
//! values are returned in their encoded form (see [`crate::codec`]).
//!
//! ```
//! use flashdb::{Database, Filter, Statement};
//!
//! let db = Database::memory().unwrap();
//! db.set("user:1", "hexa", None).unwrap();
//! db.set("user:2", "ariz", None).unwrap();
//!
//! let rows = db.execute(Statement::Select(Filter::Like("user:%".into()))).unwrap();
//! assert_eq!(rows.len(), 2);
//! ```

use crate::clock::Timestamp;
use crate::storage::pattern::LikePattern;
use crate::storage::record::Record;
use bytes::Bytes;

/// A raw table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub key: String,
    /// Codec-encoded value
    pub value: Bytes,
    pub expires_at: Option<Timestamp>,
}

impl Row {
    pub(crate) fn from_record(key: &str, record: &Record) -> Self {
        Self {
            key: key.to_owned(),
            value: record.value.clone(),
            expires_at: record.expires_at,
        }
    }
}

/// Row selection for [`Statement::Select`] and [`Statement::Delete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Every row
    All,
    /// The row with exactly this key
    Key(String),
    /// Rows whose key matches a LIKE pattern
    Like(String),
    /// Rows with `expires_at <= t`
    ExpiredAt(Timestamp),
}

/// A raw statement. Each variant carries its own parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Returns matching rows in ascending key order
    Select(Filter),
    /// Removes matching rows and returns them
    Delete(Filter),
    /// Inserts or replaces a row and returns it
    Upsert(Row),
    /// Removes every row; returns nothing
    Truncate,
}

/// A [`Filter`] compiled against the database's collation.
pub(crate) enum CompiledFilter {
    All,
    Key(String),
    Like(LikePattern),
    ExpiredAt(Timestamp),
}

impl CompiledFilter {
    pub(crate) fn new(filter: Filter, case_sensitive_like: bool) -> Self {
        match filter {
            Filter::All => CompiledFilter::All,
            Filter::Key(key) => CompiledFilter::Key(key),
            Filter::Like(pattern) => {
                CompiledFilter::Like(LikePattern::new(&pattern, case_sensitive_like))
            }
            Filter::ExpiredAt(ts) => CompiledFilter::ExpiredAt(ts),
        }
    }

    pub(crate) fn matches(&self, key: &str, record: &Record) -> bool {
        match self {
            CompiledFilter::All => true,
            CompiledFilter::Key(k) => k == key,
            CompiledFilter::Like(pattern) => pattern.matches(key),
            CompiledFilter::ExpiredAt(ts) => record.expires_at.is_some_and(|exp| exp <= *ts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters() {
        let expiring = Record::with_expiry(Bytes::from("v"), Some(10));
        let forever = Record::new(Bytes::from("v"));

        assert!(CompiledFilter::new(Filter::All, true).matches("x", &forever));
        assert!(CompiledFilter::new(Filter::Key("x".into()), true).matches("x", &forever));
        assert!(!CompiledFilter::new(Filter::Key("x".into()), true).matches("y", &forever));
        assert!(CompiledFilter::new(Filter::Like("X%".into()), false).matches("xyz", &forever));

        let expired = CompiledFilter::new(Filter::ExpiredAt(10), true);
        assert!(expired.matches("x", &expiring));
        assert!(!expired.matches("x", &forever));
        assert!(!CompiledFilter::new(Filter::ExpiredAt(9), true).matches("x", &expiring));
    }
}
