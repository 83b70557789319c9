//! Storage Engine Module
//!
//! The pieces underneath [`Database`](crate::Database):
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      RecordTable                            │
//! │   BTreeMap<String, Record>      ExpiryIndex                 │
//! │   (key order, LIKE scans)       BTreeSet<(expires_at, key)> │
//! └─────────────────────────────────────────────────────────────┘
//!               ▲ apply(batch)                 ▲ cleanup()
//!               │                              │
//!  ┌────────────┴────────────┐     ┌───────────┴───────────────┐
//!  │       RecordLog         │     │      ExpirySweeper        │
//!  │  framed, checksummed    │     │  (Background Tokio Task)  │
//!  │  append-only file       │     └───────────────────────────┘
//!  └─────────────────────────┘
//! ```
//!
//! - [`record`]: stored records and the liveness rule
//! - [`expiry_index`]: secondary index by expiry time
//! - [`table`]: the record table and its mutation batches
//! - [`pattern`]: LIKE matching for key search
//! - [`log`]: persistence, recovery and compaction
//! - [`expiry`]: background reclamation

pub mod expiry;
pub mod expiry_index;
pub mod log;
pub mod pattern;
pub mod record;
pub mod table;

// Re-export commonly used types
pub use expiry::{start_expiry_sweeper, ExpirySweeper, SweeperConfig};
pub use pattern::LikePattern;
pub use record::Record;
