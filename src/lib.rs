//! # FlashDB - An Embedded Key-Value Store with Expiration
//!
//! FlashDB is an in-process key-value store with per-key time-to-live,
//! LIKE-style key search, atomic batch writes and an optional durable record
//! log.
//!
//! ## Features
//!
//! - **TTL Support**: Keys can expire; expired keys read as absent immediately
//! - **Atomic Batches**: `set_many`, `delete_many`, `rename` and `pop` commit
//!   all-or-nothing
//! - **Pattern Search**: `%` / `_` wildcards with stable, paginated results
//! - **Durability**: Checksummed append-only log with crash recovery,
//!   `flush()` and `vacuum()`
//! - **Typed Values**: Any serde type, encoded as MessagePack
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              Database                                   │
//! │   validate ─> encode (codec) ─> lock ─> log append ─> table apply       │
//! │                                                                         │
//! │  ┌──────────────────────────────────┐    ┌──────────────────────────┐   │
//! │  │          RecordTable             │    │       RecordLog          │   │
//! │  │  ┌────────────┐ ┌─────────────┐  │    │  header │ frame │ frame  │   │
//! │  │  │  BTreeMap  │ │ ExpiryIndex │  │    │  (crc32, MessagePack)    │   │
//! │  │  └────────────┘ └─────────────┘  │    └──────────────────────────┘   │
//! │  └──────────────────────────────────┘                                   │
//! │                    ▲                                                    │
//! │                    │ cleanup()                                          │
//! │  ┌─────────────────┴───────────────────────────────────────────────┐    │
//! │  │    Read-path prepass (bounded)  /  ExpirySweeper (Tokio task)   │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use flashdb::Database;
//! use std::time::Duration;
//!
//! let db = Database::memory().unwrap();
//!
//! db.set("name", "hexa", Some(Duration::from_secs(3600))).unwrap();
//! db.set("age", 30, None).unwrap();
//! db.set("session1", vec!["a", "b"], None).unwrap();
//!
//! assert_eq!(db.get::<u32>("age").unwrap(), Some(30));
//! assert_eq!(db.keys("se%").unwrap(), vec!["session1"]);
//!
//! db.update("age", 31).unwrap();
//! db.move_key("age", "years").unwrap();
//! assert_eq!(db.pop::<u32>("years").unwrap(), Some(31));
//!
//! db.cleanup().unwrap();
//! db.flush().unwrap();
//! db.close().unwrap();
//! ```
//!
//! ## Module Overview
//!
//! - [`database`]: the [`Database`] handle and every public operation
//! - [`storage`]: record table, expiry index, pattern matcher, record log
//!   and background sweeper
//! - [`codec`]: value encoding
//! - [`statement`]: raw statements for [`Database::execute`]
//! - [`config`], [`clock`], [`error`]

pub mod clock;
pub mod codec;
pub mod config;
pub mod database;
pub mod error;
pub mod statement;
pub mod storage;

// Re-export commonly used types for convenience
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::{CleanupPolicy, Config, SyncMode, Target};
pub use database::{Database, Expiry, Stats};
pub use error::{Error, Result};
pub use statement::{Filter, Row, Statement};
pub use storage::{start_expiry_sweeper, ExpirySweeper, SweeperConfig};

/// Version of FlashDB
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
