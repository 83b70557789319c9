//! The public database handle.
//!
//! [`Database`] owns the record table, its expiry index and (for file-backed
//! databases) the record log. Every operation goes through it.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Database                             │
//! │   RwLock<Option<State>>          (None once closed)         │
//! │   ┌───────────────────────────────────────────────────────┐ │
//! │   │ State                                                 │ │
//! │   │   table: RecordTable  ── records + ExpiryIndex        │ │
//! │   │   log:   Option<RecordLog>                            │ │
//! │   └───────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writers take the lock exclusively and commit one batch at a time: the
//! batch is appended to the log first, then applied to the table. Readers
//! share the lock, so they always see whole batches.
//!
//! ## Expiry
//!
//! Expired records are invisible to every read path the moment their
//! `expires_at` passes; reads filter on `expires_at IS NULL OR expires_at >
//! now`. Physical removal is separate: [`Database::cleanup`], the optional
//! [`ExpirySweeper`](crate::ExpirySweeper), and (under
//! [`CleanupPolicy::OnRead`]) a bounded prepass before `get`, `get_many`,
//! `exists`, `keys`, `paginate` and `count`. The prepass only runs when the
//! write lock is free, so it never makes a reader wait.

use crate::clock::{Clock, SystemClock, Timestamp};
use crate::codec;
use crate::config::{CleanupPolicy, Config, Target};
use crate::error::{Error, Result};
use crate::statement::{CompiledFilter, Filter, Row, Statement};
use crate::storage::log::RecordLog;
use crate::storage::pattern::LikePattern;
use crate::storage::record::{expiry_from_ttl, Record};
use crate::storage::table::{Mutation, RecordTable};
use bytes::Bytes;
use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};


/// Expiry state of a key, distinguishing "absent" from "never expires".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// No live record under this key
    Absent,
    /// Live record without expiry
    Never,
    /// Live record expiring at this epoch second
    At(Timestamp),
}

/// Database statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Records stored, live or expired
    pub keys: usize,
    /// Records that carry an expiry time
    pub expiring: usize,
    /// Records already expired but not yet reclaimed
    pub expired: usize,
    /// Expired records reclaimed since open
    pub reclaimed: u64,
    /// Size of the record log (None for in-memory databases)
    pub log_bytes: Option<u64>,
}

struct State {
    table: RecordTable,
    log: Option<RecordLog>,
    reclaimed: u64,
}

impl State {
    /// Persists then applies one batch.
    fn commit(&mut self, batch: Vec<Mutation>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        if let Some(log) = self.log.as_mut() {
            log.append(&batch)?;
        }
        self.table.apply(batch);
        Ok(())
    }

    /// Deletes up to `limit` expired records.
    fn reclaim(&mut self, now: Timestamp, limit: usize) -> Result<usize> {
        let expired = self.table.expired_keys(now, limit);
        let count = expired.len();
        self.commit(expired.into_iter().map(Mutation::delete).collect())?;
        self.reclaimed += count as u64;
        Ok(count)
    }
}

/// An embedded key-value database with TTL support.
///
/// # Example
///
/// ```
/// use flashdb::Database;
/// use std::time::Duration;
///
/// let db = Database::memory().unwrap();
///
/// db.set("name", "hexa", Some(Duration::from_secs(3600))).unwrap();
/// db.set("age", 30, None).unwrap();
///
/// assert_eq!(db.get::<String>("name").unwrap().as_deref(), Some("hexa"));
/// assert_eq!(db.get::<u32>("age").unwrap(), Some(30));
///
/// db.rename("age", "years").unwrap();
/// assert_eq!(db.pop::<u32>("years").unwrap(), Some(30));
/// assert!(!db.exists("years").unwrap());
///
/// db.close().unwrap();
/// ```
pub struct Database {
    state: RwLock<Option<State>>,
    config: Config,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Database")
            .field("target", &self.config.target)
            .field("open", &state.is_some())
            .field("keys", &state.as_ref().map(|s| s.table.len()))
            .finish()
    }
}

impl Database {
    /// Opens (or creates) a file-backed database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(Config::path(path))
    }

    /// Creates an in-memory database.
    pub fn memory() -> Result<Self> {
        Self::open_with(Config::memory())
    }

    /// Opens a database described by `config`, reading time from the system
    /// clock.
    pub fn open_with(config: Config) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    /// Opens a database that reads time from `clock`.
    pub fn open_with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut table = RecordTable::new();
        let log = match &config.target {
            Target::Memory => None,
            Target::Path(path) => Some(RecordLog::open(path, config.sync, &mut table)?),
        };

        info!(
            location = ?config.target,
            keys = table.len(),
            "Database opened"
        );

        Ok(Self {
            state: RwLock::new(Some(State {
                table,
                log,
                reclaimed: 0,
            })),
            config,
            clock,
        })
    }

    /// The configuration this database was opened with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns `true` once [`close`](Self::close) has succeeded.
    pub fn is_closed(&self) -> bool {
        self.state.read().is_none()
    }

    fn read(&self) -> Result<MappedRwLockReadGuard<'_, State>> {
        RwLockReadGuard::try_map(self.state.read(), Option::as_ref)
            .map_err(|_| Error::ConnectionClosed)
    }

    fn write(&self) -> Result<MappedRwLockWriteGuard<'_, State>> {
        RwLockWriteGuard::try_map(self.state.write(), Option::as_mut)
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Bounded reclamation ahead of a read. Skipped if a writer holds the lock.
    fn prepass(&self) -> Result<()> {
        let CleanupPolicy::OnRead { budget } = self.config.cleanup else {
            return Ok(());
        };
        let Some(mut guard) = self.state.try_write() else {
            return Ok(());
        };
        let state = guard.as_mut().ok_or(Error::ConnectionClosed)?;
        let reclaimed = state.reclaim(self.clock.now(), budget)?;
        if reclaimed > 0 {
            trace!(reclaimed, "Reclaimed expired records before read");
        }
        Ok(())
    }

    fn pattern(&self, pattern: &str) -> LikePattern {
        LikePattern::new(pattern, self.config.case_sensitive_like)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Stores `value` under `key`, replacing any existing record.
    ///
    /// With `ttl`, the record expires `ttl` from now (rounded up to whole
    /// seconds); without, it never expires.
    pub fn set<V: Serialize>(&self, key: &str, value: V, ttl: Option<Duration>) -> Result<()> {
        validate_key(key)?;
        let value = codec::encode_value(&value)?;
        self.put(key, value, ttl)
    }

    /// Stores an opaque byte payload.
    pub fn set_bytes(&self, key: &str, value: impl AsRef<[u8]>, ttl: Option<Duration>) -> Result<()> {
        validate_key(key)?;
        self.put(key, codec::encode_bytes(value.as_ref()), ttl)
    }

    fn put(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        let mut state = self.write()?;
        let expires_at = expiry(self.clock.now(), ttl)?;
        state.commit(vec![Mutation::Put {
            key: key.to_owned(),
            value,
            expires_at,
        }])
    }

    /// Stores many records as one atomic batch.
    ///
    /// Every key is validated and every value encoded before anything is
    /// written; one bad entry rejects the whole batch.
    ///
    /// ```
    /// use flashdb::Database;
    /// use std::collections::HashMap;
    /// use std::time::Duration;
    ///
    /// let db = Database::memory().unwrap();
    /// let mut items = HashMap::new();
    /// items.insert("session1", ("hexa1", Some(Duration::from_secs(3600))));
    /// items.insert("session2", ("hexa2", None));
    /// db.set_many(items).unwrap();
    /// assert_eq!(db.count().unwrap(), 2);
    /// ```
    pub fn set_many<I, K, V>(&self, items: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, (V, Option<Duration>))>,
        K: AsRef<str>,
        V: Serialize,
    {
        let mut encoded = Vec::new();
        for (key, (value, ttl)) in items {
            let key = key.as_ref();
            validate_key(key)?;
            encoded.push((key.to_owned(), codec::encode_value(&value)?, ttl));
        }

        let mut state = self.write()?;
        let now = self.clock.now();
        let batch = encoded
            .into_iter()
            .map(|(key, value, ttl)| {
                Ok(Mutation::Put {
                    key,
                    value,
                    expires_at: expiry(now, ttl)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        trace!(records = batch.len(), "Committing batch set");
        state.commit(batch)
    }

    /// Removes `key`. Removing an absent key is not an error.
    ///
    /// Returns `true` if a live record was removed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let mut state = self.write()?;
        let Some(record) = state.table.get(key) else {
            return Ok(false);
        };
        let was_live = record.is_live(self.clock.now());
        state.commit(vec![Mutation::delete(key)])?;
        Ok(was_live)
    }

    /// Removes many keys as one atomic batch.
    ///
    /// Returns the number of live records removed.
    pub fn delete_many<I, K>(&self, keys: I) -> Result<usize>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut unique = BTreeSet::new();
        for key in keys {
            let key = key.as_ref();
            validate_key(key)?;
            unique.insert(key.to_owned());
        }

        let mut state = self.write()?;
        let now = self.clock.now();
        let mut removed = 0;
        let mut batch = Vec::with_capacity(unique.len());
        for key in unique {
            if let Some(record) = state.table.get(&key) {
                if record.is_live(now) {
                    removed += 1;
                }
                batch.push(Mutation::delete(key));
            }
        }
        state.commit(batch)?;
        Ok(removed)
    }

    /// Moves the record at `old_key` to `new_key`, keeping its value and
    /// expiry. An existing record at `new_key` is replaced.
    ///
    /// Fails with [`Error::KeyNotFound`] if `old_key` is absent or expired,
    /// leaving both keys untouched.
    pub fn rename(&self, old_key: &str, new_key: &str) -> Result<()> {
        validate_key(old_key)?;
        validate_key(new_key)?;

        let mut state = self.write()?;
        let record = state
            .table
            .get_live(old_key, self.clock.now())
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(old_key.to_owned()))?;
        if old_key == new_key {
            return Ok(());
        }
        state.commit(vec![
            Mutation::delete(old_key),
            Mutation::put(new_key, record),
        ])
    }

    /// Same as [`rename`](Self::rename): one atomic step, expiry preserved.
    pub fn move_key(&self, src: &str, dst: &str) -> Result<()> {
        self.rename(src, dst)
    }

    /// Returns the live value of `key` and removes it in one step.
    ///
    /// Absent or expired keys return `None` and change nothing. If the value
    /// cannot be decoded as `V`, the record stays in place.
    pub fn pop<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>> {
        self.take(key, |value| codec::decode_value(value))
    }

    /// Byte-payload counterpart of [`pop`](Self::pop).
    pub fn pop_bytes(&self, key: &str) -> Result<Option<Bytes>> {
        self.take(key, codec::decode_bytes)
    }

    fn take<T>(&self, key: &str, decode: impl FnOnce(&Bytes) -> Result<T>) -> Result<Option<T>> {
        validate_key(key)?;
        let mut state = self.write()?;
        let Some(record) = state.table.get_live(key, self.clock.now()) else {
            return Ok(None);
        };
        let value = decode(&record.value)?;
        state.commit(vec![Mutation::delete(key)])?;
        Ok(Some(value))
    }

    /// Replaces the value of an existing key without touching its expiry.
    pub fn update<V: Serialize>(&self, key: &str, value: V) -> Result<()> {
        validate_key(key)?;
        let value = codec::encode_value(&value)?;
        self.replace_value(key, value)
    }

    /// Byte-payload counterpart of [`update`](Self::update).
    pub fn update_bytes(&self, key: &str, value: impl AsRef<[u8]>) -> Result<()> {
        validate_key(key)?;
        self.replace_value(key, codec::encode_bytes(value.as_ref()))
    }

    fn replace_value(&self, key: &str, value: Bytes) -> Result<()> {
        let mut state = self.write()?;
        let expires_at = state
            .table
            .get_live(key, self.clock.now())
            .map(|r| r.expires_at)
            .ok_or_else(|| Error::KeyNotFound(key.to_owned()))?;
        state.commit(vec![Mutation::Put {
            key: key.to_owned(),
            value,
            expires_at,
        }])
    }

    /// Sets the expiry of an existing key to `ttl` from now, or clears it
    /// when `ttl` is `None`.
    pub fn set_expire(&self, key: &str, ttl: Option<Duration>) -> Result<()> {
        validate_key(key)?;
        let mut state = self.write()?;
        let now = self.clock.now();
        let value = state
            .table
            .get_live(key, now)
            .map(|r| r.value.clone())
            .ok_or_else(|| Error::KeyNotFound(key.to_owned()))?;
        let expires_at = expiry(now, ttl)?;
        state.commit(vec![Mutation::Put {
            key: key.to_owned(),
            value,
            expires_at,
        }])
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Returns the live value of `key`, or `None` if absent or expired.
    pub fn get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>> {
        self.get_encoded(key)?
            .map(|value| codec::decode_value(&value))
            .transpose()
    }

    /// Byte-payload counterpart of [`get`](Self::get).
    pub fn get_bytes(&self, key: &str) -> Result<Option<Bytes>> {
        self.get_encoded(key)?
            .map(|value| codec::decode_bytes(&value))
            .transpose()
    }

    fn get_encoded(&self, key: &str) -> Result<Option<Bytes>> {
        validate_key(key)?;
        self.prepass()?;
        let state = self.read()?;
        Ok(state
            .table
            .get_live(key, self.clock.now())
            .map(|r| r.value.clone()))
    }

    /// Returns the live values among `keys`. Absent and expired keys are
    /// left out of the map.
    pub fn get_many<I, K, V>(&self, keys: I) -> Result<HashMap<String, V>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
        V: DeserializeOwned,
    {
        let keys: Vec<K> = keys.into_iter().collect();
        for key in &keys {
            validate_key(key.as_ref())?;
        }
        self.prepass()?;

        let found: Vec<(String, Bytes)> = {
            let state = self.read()?;
            let now = self.clock.now();
            keys.iter()
                .filter_map(|key| {
                    let key = key.as_ref();
                    state
                        .table
                        .get_live(key, now)
                        .map(|r| (key.to_owned(), r.value.clone()))
                })
                .collect()
        };

        found
            .into_iter()
            .map(|(key, value)| Ok((key, codec::decode_value(&value)?)))
            .collect()
    }

    /// Whether `key` holds a live record.
    pub fn exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        self.prepass()?;
        let state = self.read()?;
        Ok(state.table.contains_live(key, self.clock.now()))
    }

    /// Expiry time of a live key.
    ///
    /// Returns `None` both when the key is absent and when it never expires;
    /// use [`get_expire_state`](Self::get_expire_state) to tell them apart.
    pub fn get_expire(&self, key: &str) -> Result<Option<Timestamp>> {
        Ok(match self.get_expire_state(key)? {
            Expiry::At(ts) => Some(ts),
            Expiry::Never | Expiry::Absent => None,
        })
    }

    /// Expiry state of `key`: [`Expiry::Absent`] for missing or expired keys,
    /// [`Expiry::Never`] for live keys without expiry, otherwise
    /// [`Expiry::At`].
    pub fn get_expire_state(&self, key: &str) -> Result<Expiry> {
        validate_key(key)?;
        let state = self.read()?;
        Ok(match state.table.get_live(key, self.clock.now()) {
            None => Expiry::Absent,
            Some(Record {
                expires_at: None, ..
            }) => Expiry::Never,
            Some(Record {
                expires_at: Some(ts),
                ..
            }) => Expiry::At(*ts),
        })
    }

    /// Remaining time to live of a live key with an expiry.
    pub fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        validate_key(key)?;
        let state = self.read()?;
        let now = self.clock.now();
        Ok(state.table.get_live(key, now).and_then(|r| r.ttl(now)))
    }

    /// Live keys matching a LIKE `pattern` (`%` any run, `_` one character),
    /// in ascending key order.
    pub fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.prepass()?;
        let pattern = self.pattern(pattern);
        let state = self.read()?;
        Ok(state
            .table
            .live_keys(&pattern, self.clock.now())
            .cloned()
            .collect())
    }

    /// One page of [`keys`](Self::keys). Pages start at 1; a page past the
    /// end is empty.
    pub fn paginate(&self, pattern: &str, page: usize, page_size: usize) -> Result<Vec<String>> {
        if page == 0 {
            return Err(Error::invalid("page must be at least 1"));
        }
        if page_size == 0 {
            return Err(Error::invalid("page size must be at least 1"));
        }
        let Some(offset) = (page - 1).checked_mul(page_size) else {
            return Ok(Vec::new());
        };

        self.prepass()?;
        let pattern = self.pattern(pattern);
        let state = self.read()?;
        Ok(state
            .table
            .live_keys(&pattern, self.clock.now())
            .skip(offset)
            .take(page_size)
            .cloned()
            .collect())
    }

    /// Number of stored records, live or expired.
    pub fn count(&self) -> Result<usize> {
        self.prepass()?;
        Ok(self.read()?.table.len())
    }

    /// Number of records with `expires_at <= now`.
    pub fn count_expired(&self) -> Result<usize> {
        let state = self.read()?;
        Ok(state.table.count_expired(self.clock.now()))
    }

    /// Returns a snapshot of database statistics. Never reclaims anything.
    pub fn stats(&self) -> Result<Stats> {
        let state = self.read()?;
        Ok(Stats {
            keys: state.table.len(),
            expiring: state.table.expiring(),
            expired: state.table.count_expired(self.clock.now()),
            reclaimed: state.reclaimed,
            log_bytes: state.log.as_ref().map(RecordLog::len),
        })
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Deletes every expired record. Returns how many were removed.
    pub fn cleanup(&self) -> Result<usize> {
        let mut state = self.write()?;
        let removed = state.reclaim(self.clock.now(), usize::MAX)?;
        if removed > 0 {
            debug!(removed, keys_remaining = state.table.len(), "Expired records cleaned up");
        }
        Ok(removed)
    }

    /// Compacts the record log down to the current contents.
    ///
    /// Query results are unchanged; expired records that have not been
    /// reclaimed are carried over. No-op for in-memory databases.
    pub fn vacuum(&self) -> Result<()> {
        let mut guard = self.write()?;
        let state = &mut *guard;
        if let Some(log) = state.log.as_mut() {
            log.rewrite(&state.table)?;
        }
        Ok(())
    }

    /// Blocks until every committed mutation is on stable storage.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.write()?;
        if let Some(log) = state.log.as_mut() {
            log.sync()?;
        }
        Ok(())
    }

    /// Runs a raw statement against the record table.
    ///
    /// See [`crate::statement`]. Raw statements see expired rows and store
    /// whatever they are given; keeping the data sensible is up to the caller.
    pub fn execute(&self, statement: Statement) -> Result<Vec<Row>> {
        let case_sensitive = self.config.case_sensitive_like;
        match statement {
            Statement::Select(filter) => {
                let state = self.read()?;
                Ok(select(&state.table, filter, case_sensitive))
            }
            Statement::Delete(filter) => {
                let mut state = self.write()?;
                let rows = select(&state.table, filter, case_sensitive);
                state.commit(rows.iter().map(|r| Mutation::delete(r.key.clone())).collect())?;
                Ok(rows)
            }
            Statement::Upsert(row) => {
                let mut state = self.write()?;
                state.commit(vec![Mutation::Put {
                    key: row.key.clone(),
                    value: row.value.clone(),
                    expires_at: row.expires_at,
                }])?;
                Ok(vec![row])
            }
            Statement::Truncate => {
                let mut state = self.write()?;
                state.commit(vec![Mutation::Clear])?;
                Ok(Vec::new())
            }
        }
    }

    /// Flushes and closes the database. Every later call fails with
    /// [`Error::ConnectionClosed`].
    pub fn close(&self) -> Result<()> {
        let mut state = self
            .state
            .write()
            .take()
            .ok_or(Error::ConnectionClosed)?;
        if let Some(log) = state.log.as_mut() {
            log.sync()?;
        }
        info!(location = ?self.config.target, "Database closed");
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Some(log) = self.state.get_mut().as_mut().and_then(|s| s.log.as_mut()) {
            if let Err(e) = log.sync() {
                warn!(path = %log.path().display(), error = %e, "Failed to flush record log on drop");
            }
        }
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::invalid("key must not be empty"));
    }
    Ok(())
}

fn expiry(now: Timestamp, ttl: Option<Duration>) -> Result<Option<Timestamp>> {
    ttl.map(|ttl| {
        expiry_from_ttl(now, ttl).ok_or_else(|| Error::invalid("ttl exceeds the timestamp range"))
    })
    .transpose()
}

fn select(table: &RecordTable, filter: Filter, case_sensitive: bool) -> Vec<Row> {
    if let Filter::Key(key) = &filter {
        return table
            .get(key)
            .map(|record| vec![Row::from_record(key, record)])
            .unwrap_or_default();
    }
    let filter = CompiledFilter::new(filter, case_sensitive);
    match &filter {
        CompiledFilter::Like(pattern) => table
            .scan(pattern)
            .map(|(key, record)| Row::from_record(key, record))
            .collect(),
        _ => table
            .iter()
            .filter(|(key, record)| filter.matches(key, record))
            .map(|(key, record)| Row::from_record(key, record))
            .collect(),
    }
}
