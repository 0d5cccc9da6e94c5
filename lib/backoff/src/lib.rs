//! `tokio-retry` crate
//! MIT License
//! Copyright (c) 2017 Sam Rijs
//!
//! Exponential back-off for retrying a failed operation a bounded number of
//! times.

use std::time::Duration;

/// Delays grow as `factor * base^n` where `n` is the number of past attempts,
/// capped by `max_delay`. After `max_retries` delays the back-off is exhausted.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current: u64,
    base: u64,
    factor: u64,
    max_delay: Option<Duration>,
    max_retries: Option<usize>,
    attempts: usize,
}

impl ExponentialBackoff {
    /// Constructs a new exponential back-off strategy, given a base in
    /// milliseconds.
    pub const fn from_millis(base: u64) -> ExponentialBackoff {
        ExponentialBackoff {
            current: base,
            base,
            factor: 1,
            max_delay: None,
            max_retries: None,
            attempts: 0,
        }
    }

    /// A multiplicative factor applied to every delay, `1000` turns the
    /// delays into seconds.
    pub const fn factor(mut self, factor: u64) -> ExponentialBackoff {
        self.factor = factor;
        self
    }

    /// No delay will be longer than this.
    pub const fn max_delay(mut self, duration: Duration) -> ExponentialBackoff {
        self.max_delay = Some(duration);
        self
    }

    /// Stop handing out delays after this many retries.
    pub const fn max_retries(mut self, retries: usize) -> ExponentialBackoff {
        self.max_retries = Some(retries);
        self
    }

    /// Number of delays handed out since creation or the last `reset`.
    pub const fn attempts(&self) -> usize {
        self.attempts
    }

    /// The next delay, or `None` once the retries are used up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.max_retries
            && self.attempts >= max
        {
            return None;
        }
        self.attempts += 1;

        let mut delay = Duration::from_millis(self.current.saturating_mul(self.factor));
        if let Some(max_delay) = self.max_delay
            && delay > max_delay
        {
            delay = max_delay;
        }

        self.current = self.current.saturating_mul(self.base);

        Some(delay)
    }

    /// Start over from the base delay with a full retry budget.
    pub fn reset(&mut self) {
        self.current = self.base;
        self.attempts = 0;
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_delay()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_exponentially() {
        let mut backoff = ExponentialBackoff::from_millis(10);

        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(10)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn factor_scales_delays() {
        let delays = ExponentialBackoff::from_millis(2)
            .factor(50)
            .take(4)
            .collect::<Vec<_>>();

        assert_eq!(
            delays,
            [100, 200, 400, 800].map(Duration::from_millis).to_vec()
        );
    }

    #[test]
    fn saturates_at_maximum_value() {
        let mut backoff = ExponentialBackoff::from_millis(u64::MAX - 1);

        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(u64::MAX - 1)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(u64::MAX)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(u64::MAX)));
    }

    #[test]
    fn capped_by_max_delay() {
        let mut backoff = ExponentialBackoff::from_millis(2).max_delay(Duration::from_millis(4));

        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(2)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(4)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(4)));
    }

    #[test]
    fn exhausted_after_max_retries() {
        let mut backoff = ExponentialBackoff::from_millis(2).max_retries(2);

        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempts(), 2);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(2)));
    }

    #[test]
    fn zero_retries() {
        let mut backoff = ExponentialBackoff::from_millis(2).max_retries(0);
        assert_eq!(backoff.next(), None);
    }
}
