//! Core value types shared by the storage and command layers.

mod key;

pub use key::Key;

/// Timestamp in milliseconds since Unix epoch.
pub type Timestamp = i64;

/// Get current timestamp in milliseconds.
#[inline]
#[must_use]
pub fn current_timestamp_ms() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

/// Expiration time of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    /// No expiration
    #[default]
    Never,
    /// Expire at specific timestamp (milliseconds since epoch)
    At(Timestamp),
}

impl Expiry {
    /// Expiry `millis` from now. Non-positive values expire immediately.
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        Self::At(current_timestamp_ms().saturating_add(millis.max(0)))
    }

    /// Expiry `seconds` from now.
    #[must_use]
    pub fn from_seconds(seconds: i64) -> Self {
        Self::from_millis(seconds.saturating_mul(1000))
    }

    /// Whether the expiry lies in the past relative to `now`.
    #[inline]
    #[must_use]
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        match self {
            Self::Never => false,
            Self::At(ts) => now >= *ts,
        }
    }

    /// Remaining time to live in milliseconds, `None` if the entry never expires.
    #[must_use]
    pub fn remaining_ms(&self, now: Timestamp) -> Option<i64> {
        match self {
            Self::Never => None,
            Self::At(ts) => Some((ts - now).max(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry() {
        let now = current_timestamp_ms();
        assert!(!Expiry::Never.is_expired_at(now));
        assert!(Expiry::At(now - 1).is_expired_at(now));
        assert!(!Expiry::At(now + 10_000).is_expired_at(now));
        assert_eq!(Expiry::At(now + 500).remaining_ms(now), Some(500));
        assert_eq!(Expiry::Never.remaining_ms(now), None);
    }
}
