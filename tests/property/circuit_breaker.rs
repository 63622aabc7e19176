//! Property tests for the circuit breaker.
//!
//! Invariants tested:
//! - Fewer consecutive failures than the threshold never open the circuit
//! - Reaching the threshold always opens it and stops calls
//! - An open circuit never invokes the operation

use bulwark_circuitbreaker::{CircuitBreaker, CircuitState};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

fn breaker(threshold: u32) -> CircuitBreaker {
    CircuitBreaker::builder()
        .name("prop")
        .failure_threshold(threshold)
        .reset_timeout(Duration::from_secs(60))
        .build()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    /// Property: runs of failures shorter than the threshold, separated by a
    /// success, keep the circuit closed
    #[test]
    fn short_failure_runs_stay_closed(
        threshold in 2u32..=20,
        runs in prop::collection::vec(0u32..20, 1..20),
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let breaker = breaker(threshold);
            for run in runs {
                for _ in 0..run.min(threshold - 1) {
                    let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
                }
                prop_assert_eq!(breaker.state(), CircuitState::Closed);
                breaker.call(|| async { Ok::<_, &str>(()) }).await.unwrap();
            }
            Ok(())
        })?;
    }

    /// Property: the threshold opens the circuit and later calls are rejected
    /// without running
    #[test]
    fn threshold_opens_and_rejects(
        threshold in 1u32..=20,
        extra in 1usize..=30,
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let breaker = breaker(threshold);
            let calls = Arc::new(AtomicUsize::new(0));

            for _ in 0..(threshold as usize + extra) {
                let calls = Arc::clone(&calls);
                let _ = breaker
                    .call(|| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>("boom")
                    })
                    .await;
            }

            prop_assert_eq!(breaker.state(), CircuitState::Open);
            prop_assert_eq!(calls.load(Ordering::SeqCst), threshold as usize);
            prop_assert_eq!(breaker.metrics().total_rejections, extra as u64);
            Ok(())
        })?;
    }
}
