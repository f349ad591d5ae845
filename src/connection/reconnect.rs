//! Bounded reconnect policy
//!
//! One policy object serves both transports. Attempt 1 runs immediately
//! after the link drops; every later attempt waits `delay` first.

use lsmd_shared::{defaults, ConnectionTarget};
use std::time::Duration;

/// Reconnect settings plus the target to reconnect to
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub delay: Duration,
    /// Target of the most recent connect request
    pub last_known_target: Option<ConnectionTarget>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: defaults::RECONNECT_ATTEMPTS,
            delay: Duration::from_millis(defaults::RECONNECT_DELAY_MS),
            last_known_target: None,
        }
    }
}

impl ReconnectPolicy {
    /// Whether an unplanned link loss should be retried
    pub fn should_reconnect(&self) -> bool {
        self.enabled && self.last_known_target.is_some()
    }

    /// Explicit disconnect: never reconnect behind the caller's back
    pub fn disarm(&mut self) {
        self.enabled = false;
        self.last_known_target = None;
    }

    pub fn retry(&self) -> BoundedRetry {
        BoundedRetry::new(self.max_attempts, self.delay)
    }
}

/// Attempt counter for one reconnect run
#[derive(Debug, Clone)]
pub struct BoundedRetry {
    max_attempts: u32,
    delay: Duration,
    attempt: u32,
}

impl BoundedRetry {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            attempt: 0,
        }
    }

    /// Advance to the next attempt, or `None` once exhausted
    pub fn next_attempt(&mut self) -> Option<u32> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some(self.attempt)
    }

    /// Wait to apply before `attempt`
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        (attempt > 1 && !self.delay.is_zero()).then_some(self.delay)
    }

    pub fn attempts_made(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_sequence() {
        let mut retry = BoundedRetry::new(2, Duration::from_secs(1));
        assert_eq!(retry.next_attempt(), Some(1));
        assert_eq!(retry.delay_before(1), None);
        assert_eq!(retry.next_attempt(), Some(2));
        assert_eq!(retry.delay_before(2), Some(Duration::from_secs(1)));
        assert_eq!(retry.next_attempt(), None);
        assert_eq!(retry.attempts_made(), 2);
    }

    #[test]
    fn test_zero_attempts_is_exhausted() {
        let mut retry = BoundedRetry::new(0, Duration::from_secs(1));
        assert_eq!(retry.next_attempt(), None);
        assert_eq!(retry.attempts_made(), 0);
    }

    #[test]
    fn test_policy_needs_target() {
        let mut policy = ReconnectPolicy {
            enabled: true,
            ..Default::default()
        };
        assert!(!policy.should_reconnect());

        policy.last_known_target = Some(ConnectionTarget::ble("00:11:22:33:44:55"));
        assert!(policy.should_reconnect());

        policy.disarm();
        assert!(!policy.enabled);
        assert!(policy.last_known_target.is_none());
        assert!(!policy.should_reconnect());
    }

    #[test]
    fn test_defaults() {
        let policy = ReconnectPolicy::default();
        assert!(!policy.enabled);
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.delay, Duration::from_secs(1));
    }
}
