//! Property tests for the token bucket.
//!
//! Invariants tested:
//! - Token count stays within [0, capacity] for any sequence of operations
//! - Without refill, at most `capacity` unit requests are admitted
//! - A request is only denied when the bucket holds fewer tokens than it costs

use bulwark_ratelimiter::{BucketPolicy, TokenBucket};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    /// Property: tokens never leave [0, capacity]
    #[test]
    fn tokens_stay_in_bounds(
        capacity in 1u32..=200,
        rate in 0.1f64..100.0,
        steps in prop::collection::vec((0u64..5_000, 0u32..=50), 1..100),
    ) {
        let mut bucket = TokenBucket::new(BucketPolicy::new(capacity, rate), 0);
        let mut now = 0u64;

        for (advance, cost) in steps {
            now += advance;
            let consumption = bucket.try_consume(cost, now);
            prop_assert!(bucket.tokens() >= 0.0);
            prop_assert!(bucket.tokens() <= bucket.capacity());
            prop_assert!(consumption.remaining >= 0.0);
            if !consumption.allowed {
                prop_assert!(f64::from(cost) > consumption.remaining);
            }
        }
    }

    /// Property: a burst at one instant admits exactly `capacity` requests
    #[test]
    fn burst_admits_capacity(
        capacity in 1u32..=100,
        rate in 0.1f64..100.0,
        attempts in 1usize..300,
    ) {
        let mut bucket = TokenBucket::new(BucketPolicy::new(capacity, rate), 1_000);
        let allowed = (0..attempts)
            .filter(|_| bucket.try_consume(1, 1_000).allowed)
            .count();

        prop_assert_eq!(allowed, attempts.min(capacity as usize));
    }

    /// Property: clocks going backwards never mint tokens
    #[test]
    fn earlier_timestamps_add_nothing(
        capacity in 2u32..=100,
        rate in 0.1f64..100.0,
        rewind in 1u64..10_000,
    ) {
        let start = 20_000u64;
        let mut bucket = TokenBucket::new(BucketPolicy::new(capacity, rate), start);
        prop_assert!(bucket.try_consume(capacity, start).allowed);

        let consumption = bucket.try_consume(1, start - rewind);
        prop_assert!(!consumption.allowed);
        prop_assert_eq!(bucket.tokens(), 0.0);
    }
}
