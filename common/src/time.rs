//! Timing defaults for SimpleBank ledger operations.

use std::time::Duration;

/// Default timeouts.
pub mod constants {
    use super::Duration;

    /// How long a transfer may run before it is rolled back (5 seconds).
    pub fn default_transfer_timeout() -> Duration {
        Duration::from_secs(5)
    }

    /// How long to wait for a pooled connection (5 seconds).
    pub fn default_acquire_timeout() -> Duration {
        Duration::from_secs(5)
    }
}

/// Parse a millisecond count where `0` means "no limit".
pub fn optional_millis(millis: u64) -> Option<Duration> {
    (millis > 0).then(|| Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_millis() {
        assert_eq!(optional_millis(0), None);
        assert_eq!(optional_millis(250), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_defaults_are_positive() {
        assert!(constants::default_transfer_timeout() > Duration::ZERO);
        assert!(constants::default_acquire_timeout() > Duration::ZERO);
    }
}
