//! Open-time configuration.
//!
//! ```
//! use flashdb::{Config, CleanupPolicy, SyncMode};
//!
//! let config = Config::memory()
//!     .with_sync(SyncMode::Manual)
//!     .with_cleanup(CleanupPolicy::Explicit)
//!     .with_case_sensitive_like(true);
//! assert!(config.case_sensitive_like);
//! ```

use std::path::{Path, PathBuf};

/// Default number of expired records reclaimed by one read-path prepass.
pub const DEFAULT_CLEANUP_BUDGET: usize = 128;

/// Where the records live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// No file artifact; contents vanish with the handle
    Memory,
    /// Record log at this path (created if missing)
    Path(PathBuf),
}

/// When committed mutations are forced to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Only on `flush()` and `close()`
    #[default]
    Manual,
    /// After every committed mutation
    Always,
}

/// How expired records are physically reclaimed.
///
/// Expired records are invisible to reads under every policy; this only
/// decides when they are deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupPolicy {
    /// Before each read-path call, reclaim up to `budget` expired records if
    /// the write lock is free. Never blocks the read.
    OnRead { budget: usize },
    /// Only `cleanup()` and the background sweeper reclaim.
    Explicit,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        CleanupPolicy::OnRead {
            budget: DEFAULT_CLEANUP_BUDGET,
        }
    }
}

/// Configuration for [`Database::open_with`](crate::Database::open_with).
#[derive(Debug, Clone)]
pub struct Config {
    pub target: Target,
    pub sync: SyncMode,
    pub cleanup: CleanupPolicy,
    /// Whether `LIKE` patterns compare ASCII letters case-sensitively
    pub case_sensitive_like: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: Target::Memory,
            sync: SyncMode::default(),
            cleanup: CleanupPolicy::default(),
            case_sensitive_like: false,
        }
    }
}

impl Config {
    /// In-memory database with default settings.
    pub fn memory() -> Self {
        Self::default()
    }

    /// File-backed database at `path` with default settings.
    pub fn path(path: impl AsRef<Path>) -> Self {
        Self {
            target: Target::Path(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// Sets when commits are forced to stable storage.
    pub fn with_sync(mut self, sync: SyncMode) -> Self {
        self.sync = sync;
        self
    }

    /// Sets how expired records are reclaimed.
    pub fn with_cleanup(mut self, cleanup: CleanupPolicy) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// Makes `LIKE` patterns compare ASCII letters case-sensitively.
    pub fn with_case_sensitive_like(mut self, enabled: bool) -> Self {
        self.case_sensitive_like = enabled;
        self
    }
}
