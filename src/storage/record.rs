//! Stored records and the liveness rule.

use crate::clock::Timestamp;
use bytes::Bytes;
use std::time::Duration;

/// A stored value with optional expiry time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Codec-encoded value
    pub value: Bytes,
    /// When this record expires (None = never expires)
    pub expires_at: Option<Timestamp>,
}

impl Record {
    /// Creates a record that never expires.
    pub fn new(value: Bytes) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Creates a record with an absolute expiry time.
    pub fn with_expiry(value: Bytes, expires_at: Option<Timestamp>) -> Self {
        Self { value, expires_at }
    }

    /// A record is live while `expires_at` is unset or still in the future.
    #[inline]
    pub fn is_live(&self, now: Timestamp) -> bool {
        is_live(self.expires_at, now)
    }

    /// Remaining time to live, or None if the record never expires.
    pub fn ttl(&self, now: Timestamp) -> Option<Duration> {
        self.expires_at
            .map(|exp| Duration::from_secs(exp.saturating_sub(now)))
    }
}

/// `expires_at IS NULL OR expires_at > now`
#[inline]
pub fn is_live(expires_at: Option<Timestamp>, now: Timestamp) -> bool {
    expires_at.map(|exp| exp > now).unwrap_or(true)
}

/// Converts a TTL into an absolute expiry time.
///
/// Sub-second remainders round up, so a nonzero TTL always survives the
/// second it was written in. Returns None on overflow.
pub fn expiry_from_ttl(now: Timestamp, ttl: Duration) -> Option<Timestamp> {
    let mut secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 {
        secs = secs.checked_add(1)?;
    }
    now.checked_add(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness_boundary() {
        let record = Record::with_expiry(Bytes::from("v"), Some(100));
        assert!(record.is_live(99));
        assert!(!record.is_live(100));
        assert!(!record.is_live(101));

        let forever = Record::new(Bytes::from("v"));
        assert!(forever.is_live(u64::MAX));
    }

    #[test]
    fn test_ttl_remaining() {
        let record = Record::with_expiry(Bytes::from("v"), Some(100));
        assert_eq!(record.ttl(40), Some(Duration::from_secs(60)));
        assert_eq!(record.ttl(200), Some(Duration::ZERO));
        assert_eq!(Record::new(Bytes::new()).ttl(40), None);
    }

    #[test]
    fn test_expiry_from_ttl() {
        assert_eq!(expiry_from_ttl(10, Duration::from_secs(5)), Some(15));
        assert_eq!(expiry_from_ttl(10, Duration::ZERO), Some(10));
        assert_eq!(expiry_from_ttl(10, Duration::from_millis(1)), Some(11));
        assert_eq!(expiry_from_ttl(10, Duration::from_millis(2500)), Some(13));
        assert_eq!(expiry_from_ttl(u64::MAX, Duration::from_secs(1)), None);
    }
}
