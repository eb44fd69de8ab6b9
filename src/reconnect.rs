//! Retry/backoff policy shared by the pull-style backends.
//!
//! A transient read failure triggers a reconnect cycle: wait, reopen, read
//! again. The wait grows geometrically up to a cap; a successful read resets
//! the cycle. Fatal failures (rejected credentials, unsupported format) are
//! never retried.

use std::time::Duration;

use crate::errors::CameraError;

/// Backoff parameters. `max_attempts == 0` retries forever.
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Start a fresh reconnect cycle.
    pub fn begin(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            attempt: 0,
            delay: self.base_delay,
        }
    }

    /// Whether an error should enter the reconnect cycle at all.
    pub fn should_retry(&self, err: &CameraError) -> bool {
        err.is_transient()
    }
}

/// Mutable state of one reconnect cycle.
#[derive(Clone, Debug)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
    delay: Duration,
}

impl Backoff {
    /// Delay to sleep before the next attempt, or `None` when attempts are
    /// exhausted. Each call advances the cycle.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.policy.max_attempts != 0 && self.attempt >= self.policy.max_attempts {
            return None;
        }
        self.attempt += 1;
        let current = self.delay;
        let scaled = self.delay.as_secs_f64() * self.policy.multiplier;
        self.delay = Duration::from_secs_f64(scaled).min(self.policy.max_delay);
        Some(current.min(self.policy.max_delay))
    }

    /// Attempts consumed so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// A successful read resets the cycle.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.delay = self.policy.base_delay;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_ms: u64, multiplier: f64, max_ms: u64, attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(base_ms),
            multiplier,
            max_delay: Duration::from_millis(max_ms),
            max_attempts: attempts,
        }
    }

    #[test]
    fn delays_grow_geometrically_and_cap() {
        let mut backoff = policy(100, 2.0, 350, 5).begin();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(350)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(350)));
    }

    #[test]
    fn attempts_are_bounded() {
        let mut backoff = policy(1, 2.0, 10, 2).begin();
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempts(), 2);
    }

    #[test]
    fn zero_max_attempts_retries_forever() {
        let mut backoff = policy(1, 2.0, 4, 0).begin();
        for _ in 0..64 {
            assert!(backoff.next_delay().is_some());
        }
    }

    #[test]
    fn reset_restarts_the_cycle() {
        let mut backoff = policy(100, 2.0, 1000, 3).begin();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn fatal_errors_are_not_retried() {
        let policy = ReconnectPolicy::default();
        assert!(policy.should_retry(&CameraError::Connection("timeout".into())));
        assert!(!policy.should_retry(&CameraError::AuthRejected("cam".into())));
        assert!(!policy.should_retry(&CameraError::DeviceUnavailable("/dev/video0".into())));
    }
}
