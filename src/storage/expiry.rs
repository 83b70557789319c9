//! Background Expiry Sweeper
//!
//! Expired records are invisible as soon as they expire, but they keep
//! occupying memory (and log space) until something deletes them. Reads
//! reclaim a bounded number under [`CleanupPolicy::OnRead`], and
//! [`Database::cleanup`] reclaims everything on demand. The sweeper is the
//! third option: a Tokio task that calls `cleanup` periodically, so records
//! that are never read again still get reclaimed.
//!
//! ## Adaptive Frequency
//!
//! If a large fraction of the records were expired, the sweeper runs more
//! often. If nothing expired, it backs off.
//!
//! The sweeper stops when its handle is dropped or when the database is
//! closed.
//!
//! [`CleanupPolicy::OnRead`]: crate::CleanupPolicy::OnRead

use crate::database::Database;
use crate::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Base interval between sweeps (default: 1s)
    pub base_interval: Duration,

    /// Minimum interval between sweeps (default: 100ms)
    pub min_interval: Duration,

    /// Maximum interval between sweeps (default: 30s)
    pub max_interval: Duration,

    /// If this fraction of records were expired, speed up sweeping
    pub speedup_threshold: f64,

    /// If this fraction of records were expired, slow down sweeping
    pub slowdown_threshold: f64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        // Expiry has one-second resolution, so sweeping much faster than
        // that only finds the same records again
        Self {
            base_interval: Duration::from_secs(1),
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(30),
            speedup_threshold: 0.25,
            slowdown_threshold: 0.01,
        }
    }
}

/// A handle to the running expiry sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Starts the sweeper on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use flashdb::{Database, ExpirySweeper, SweeperConfig};
    /// use std::sync::Arc;
    ///
    /// let db = Arc::new(Database::open("cache.db")?);
    /// let sweeper = ExpirySweeper::start(Arc::clone(&db), SweeperConfig::default());
    ///
    /// // Sweeper runs in the background...
    ///
    /// drop(sweeper);
    /// ```
    pub fn start(db: Arc<Database>, config: SweeperConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweeper_loop(db, config, shutdown_rx));

        info!("Background expiry sweeper started");

        Self { shutdown_tx }
    }

    /// Stops the sweeper.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        info!("Background expiry sweeper stopped");
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(
    db: Arc<Database>,
    config: SweeperConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut current_interval = config.base_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(current_interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let keys_before = match db.stats() {
            Ok(stats) => stats.keys,
            Err(Error::ConnectionClosed) => {
                debug!("Database closed, expiry sweeper exiting");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Expiry sweeper could not read stats");
                continue;
            }
        };

        let expired = match db.cleanup() {
            Ok(expired) => expired,
            Err(Error::ConnectionClosed) => {
                debug!("Database closed, expiry sweeper exiting");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Expiry sweep failed");
                continue;
            }
        };

        if keys_before > 0 {
            let expiry_rate = expired as f64 / keys_before as f64;

            if expiry_rate > config.speedup_threshold {
                current_interval = (current_interval / 2).max(config.min_interval);
                debug!(
                    expired = expired,
                    rate = %format!("{:.2}%", expiry_rate * 100.0),
                    new_interval_ms = current_interval.as_millis(),
                    "High expiry rate, speeding up sweeper"
                );
            } else if expiry_rate < config.slowdown_threshold && expired == 0 {
                current_interval = (current_interval * 2).min(config.max_interval);
                trace!(
                    new_interval_ms = current_interval.as_millis(),
                    "Low expiry rate, slowing down sweeper"
                );
            }
        }
    }
}

/// Starts the expiry sweeper with default configuration.
pub fn start_expiry_sweeper(db: Arc<Database>) -> ExpirySweeper {
    ExpirySweeper::start(db, SweeperConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{CleanupPolicy, Config};

    fn fast_config() -> SweeperConfig {
        SweeperConfig {
            base_interval: Duration::from_millis(10),
            min_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(50),
            ..Default::default()
        }
    }

    fn open(clock: &ManualClock) -> Arc<Database> {
        let config = Config::memory().with_cleanup(CleanupPolicy::Explicit);
        Arc::new(Database::open_with_clock(config, Arc::new(clock.clone())).unwrap())
    }

    #[tokio::test]
    async fn test_sweeper_cleans_expired_keys() {
        let clock = ManualClock::new(1_000);
        let db = open(&clock);

        for i in 0..10 {
            db.set(&format!("key{}", i), "value", Some(Duration::from_secs(5)))
                .unwrap();
        }
        db.set("persistent", "value", None).unwrap();
        assert_eq!(db.count().unwrap(), 11);

        let _sweeper = ExpirySweeper::start(Arc::clone(&db), fast_config());
        clock.advance(5);

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(db.count().unwrap(), 1);
        assert!(db.exists("persistent").unwrap());
        assert_eq!(db.stats().unwrap().reclaimed, 10);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_drop() {
        let clock = ManualClock::new(1_000);
        let db = open(&clock);

        {
            let _sweeper = ExpirySweeper::start(Arc::clone(&db), fast_config());
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        db.set("key", "value", Some(Duration::from_secs(1))).unwrap();
        clock.advance(2);
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Not reclaimed, but still invisible
        assert_eq!(db.count().unwrap(), 1);
        assert_eq!(db.get::<String>("key").unwrap(), None);
    }

    #[tokio::test]
    async fn test_sweeper_exits_when_database_closed() {
        let clock = ManualClock::new(1_000);
        let db = open(&clock);
        let _sweeper = ExpirySweeper::start(Arc::clone(&db), fast_config());

        db.close().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Only the test's handle remains once the task has returned
        assert_eq!(Arc::strong_count(&db), 1);
    }
}
