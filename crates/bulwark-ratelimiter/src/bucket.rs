use std::time::Duration;

/// Longest wait a bucket ever reports. Rates so slow that a refill would
/// take longer are reported as this.
pub const MAX_WAIT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Capacity and refill rate applied to every bucket of one key class.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BucketPolicy {
    /// Maximum number of tokens a bucket can hold.
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_per_second: f64,
}

impl BucketPolicy {
    /// Creates a policy.
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        Self {
            capacity,
            refill_per_second,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), &'static str> {
        if self.capacity == 0 {
            return Err("bucket capacity must be at least 1");
        }
        if !self.refill_per_second.is_finite() || self.refill_per_second <= 0.0 {
            return Err("refill_per_second must be a positive finite number");
        }
        Ok(())
    }
}

/// Result of one refill-and-consume step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Consumption {
    /// Whether the requested tokens were taken.
    pub allowed: bool,
    /// Tokens left in the bucket after the step.
    pub remaining: f64,
    /// When denied, how long until the request could succeed. When allowed,
    /// how long until the bucket is full again.
    pub wait: Duration,
}

/// Token bucket state for one key.
///
/// Time is kept as unix milliseconds rather than a monotonic instant so the
/// same state can be stored in a shared store and advanced by any process.
/// All methods are pure arithmetic over the supplied `now_ms`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_second: f64,
    last_refill_ms: u64,
}

impl TokenBucket {
    /// Creates a full bucket.
    pub fn new(policy: BucketPolicy, now_ms: u64) -> Self {
        Self {
            capacity: f64::from(policy.capacity),
            tokens: f64::from(policy.capacity),
            refill_per_second: policy.refill_per_second,
            last_refill_ms: now_ms,
        }
    }

    /// Tokens currently in the bucket, as of the last refill.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Maximum number of tokens.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Unix milliseconds of the last refill.
    pub fn last_refill_ms(&self) -> u64 {
        self.last_refill_ms
    }

    /// Adds the tokens earned since the last refill, capped at capacity.
    ///
    /// A `now_ms` earlier than the last refill (clock skew between processes)
    /// adds nothing and leaves the refill timestamp untouched.
    pub fn refill(&mut self, now_ms: u64) {
        if now_ms <= self.last_refill_ms {
            return;
        }
        let elapsed = (now_ms - self.last_refill_ms) as f64 / 1000.0;
        self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);
        self.last_refill_ms = now_ms;
    }

    /// Refills, then takes `cost` tokens if that many are available.
    pub fn try_consume(&mut self, cost: u32, now_ms: u64) -> Consumption {
        self.refill(now_ms);
        let cost = f64::from(cost);

        if cost <= self.tokens {
            self.tokens = (self.tokens - cost).max(0.0);
            return Consumption {
                allowed: true,
                remaining: self.tokens,
                wait: self.refill_time(self.capacity - self.tokens),
            };
        }

        // A cost above capacity can never be met; report time until full.
        let deficit = if cost > self.capacity {
            self.capacity - self.tokens
        } else {
            cost - self.tokens
        };
        Consumption {
            allowed: false,
            remaining: self.tokens,
            wait: self.refill_time(deficit),
        }
    }

    /// Returns true if the bucket is full again and nobody has touched it for
    /// at least `idle_ms`.
    pub(crate) fn is_idle(&self, now_ms: u64, idle_ms: u64) -> bool {
        let mut refilled = self.clone();
        refilled.refill(now_ms);
        refilled.tokens >= refilled.capacity
            && now_ms.saturating_sub(self.last_refill_ms) >= idle_ms
    }

    fn refill_time(&self, tokens: f64) -> Duration {
        if tokens <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(tokens / self.refill_per_second)
            .map_or(MAX_WAIT, |wait| wait.min(MAX_WAIT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(capacity: u32, rate: f64) -> TokenBucket {
        TokenBucket::new(BucketPolicy::new(capacity, rate), 0)
    }

    #[test]
    fn vanishing_rate_caps_the_wait() {
        let mut b = bucket(1, 1e-300);
        let first = b.try_consume(1, 0);
        assert!(first.allowed);
        assert_eq!(first.wait, MAX_WAIT);

        let denied = b.try_consume(1, 10);
        assert!(!denied.allowed);
        assert_eq!(denied.wait, MAX_WAIT);
    }

    #[test]
    fn starts_full() {
        let b = bucket(5, 1.0);
        assert_eq!(b.tokens(), 5.0);
    }

    #[test]
    fn burst_beyond_capacity_is_denied() {
        let mut b = bucket(5, 1.0);
        let allowed = (0..7).filter(|_| b.try_consume(1, 0).allowed).count();
        assert_eq!(allowed, 5);
        assert_eq!(b.tokens(), 0.0);
    }

    #[test]
    fn denial_reports_time_until_cost_refilled() {
        let mut b = bucket(5, 1.0);
        for _ in 0..5 {
            b.try_consume(1, 0);
        }
        let denied = b.try_consume(1, 0);
        assert!(!denied.allowed);
        assert_eq!(denied.wait, Duration::from_secs(1));

        let denied = b.try_consume(3, 0);
        assert_eq!(denied.wait, Duration::from_secs(3));
    }

    #[test]
    fn refill_is_lazy_and_capped() {
        let mut b = bucket(5, 2.0);
        for _ in 0..5 {
            b.try_consume(1, 0);
        }
        b.refill(1_000);
        assert_eq!(b.tokens(), 2.0);
        b.refill(60_000);
        assert_eq!(b.tokens(), 5.0);
    }

    #[test]
    fn clock_skew_does_not_add_or_rewind() {
        let mut b = TokenBucket::new(BucketPolicy::new(5, 1.0), 10_000);
        b.try_consume(5, 10_000);
        b.refill(9_000);
        assert_eq!(b.tokens(), 0.0);
        assert_eq!(b.last_refill_ms(), 10_000);
    }

    #[test]
    fn cost_above_capacity_never_succeeds() {
        let mut b = bucket(5, 1.0);
        let c = b.try_consume(6, 0);
        assert!(!c.allowed);
        assert_eq!(c.remaining, 5.0);
        assert_eq!(c.wait, Duration::ZERO);
    }

    #[test]
    fn idle_means_full_and_untouched() {
        let mut b = bucket(2, 1.0);
        b.try_consume(1, 0);
        assert!(!b.is_idle(500, 1_000));
        assert!(b.is_idle(5_000, 1_000));
    }

    #[test]
    fn policy_validation() {
        assert!(BucketPolicy::new(0, 1.0).validate().is_err());
        assert!(BucketPolicy::new(1, 0.0).validate().is_err());
        assert!(BucketPolicy::new(1, f64::NAN).validate().is_err());
        assert!(BucketPolicy::new(1, 0.5).validate().is_ok());
    }
}
