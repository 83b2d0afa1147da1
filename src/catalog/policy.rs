use std::time::Duration;

/// Retry behaviour for an optimistic operation whose commit was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. `0` is treated as `1`.
    pub max_attempts: usize,
    /// Base duration in milliseconds for backoff calculation.
    pub base_backoff_ms: u64,
    /// Maximum duration in milliseconds for backoff.
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// A single attempt; a refused commit is returned to the caller.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_backoff_ms: 1,
            max_backoff_ms: 1,
        }
    }

    pub fn bounded(max_attempts: usize, base_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_attempts,
            base_backoff_ms,
            max_backoff_ms,
        }
    }

    pub fn attempts(&self) -> usize {
        self.max_attempts.max(1)
    }

    /// `true` when another attempt may follow attempt number `attempt`
    /// (1-based).
    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.attempts()
    }

    /// Exponential backoff after attempt number `attempt`, in milliseconds.
    pub fn backoff_ms(&self, attempt: usize) -> u64 {
        let base = self.base_backoff_ms.max(1);
        let cap = self.max_backoff_ms.max(base);

        let mut backoff = base;
        for _ in 1..attempt {
            backoff = backoff.saturating_mul(2).min(cap);
        }
        backoff
    }

    pub fn backoff(&self, attempt: usize) -> Duration {
        Duration::from_millis(self.backoff_ms(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::no_retry()
    }
}

/// Retry policies of the two popularity operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopularityPolicy {
    /// Applied when the increment's EXEC is refused. Defaults to no retry:
    /// increments are not idempotent, so replaying is the caller's call.
    pub increment: RetryPolicy,
    /// Applied when the leaderboard moves during a top-N read.
    pub snapshot: RetryPolicy,
}

impl Default for PopularityPolicy {
    fn default() -> Self {
        Self {
            increment: RetryPolicy::no_retry(),
            snapshot: RetryPolicy::bounded(16, 1, 64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let policy = RetryPolicy::bounded(10, 5, 100);
        let delays: Vec<u64> = (1..=7).map(|attempt| policy.backoff_ms(attempt)).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 80, 100, 100]);
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::bounded(3, 1, 10);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));

        let single = RetryPolicy::no_retry();
        assert!(!single.should_retry(1));

        let zero = RetryPolicy::bounded(0, 1, 1);
        assert_eq!(zero.attempts(), 1);
        assert!(!zero.should_retry(1));
    }

    #[test]
    fn test_defaults() {
        let policy = PopularityPolicy::default();
        assert_eq!(policy.increment.attempts(), 1);
        assert_eq!(policy.snapshot.attempts(), 16);
    }
}
