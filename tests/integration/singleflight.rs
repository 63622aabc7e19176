use bulwark_singleflight::{SingleFlight, SingleFlightConfig, SingleFlightError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn concurrent_callers_share_one_computation() {
    let flights: SingleFlight<String, u64, String> = SingleFlight::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let flights = flights.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                flights
                    .execute("report:2024".to_string(), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(42)
                    })
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap(), Ok(42));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let stats = flights.stats();
    assert_eq!(stats.executions, 1);
    assert_eq!(stats.joins, 49);
}

#[tokio::test]
async fn every_waiter_sees_the_same_error() {
    let flights: SingleFlight<&'static str, u64, String> = SingleFlight::new();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let flights = flights.clone();
            tokio::spawn(async move {
                flights
                    .execute("k", || async {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Err("upstream 500".to_string())
                    })
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(
            handle.await.unwrap(),
            Err(SingleFlightError::Compute("upstream 500".to_string()))
        );
    }

    // A failure stays joinable for the grace window, then the next caller retries.
    let late = flights.execute("k", || async { Ok(7) }).await;
    assert_eq!(late, Err(SingleFlightError::Compute("upstream 500".to_string())));

    tokio::time::sleep(Duration::from_millis(150)).await;
    let retried = flights.execute("k", || async { Ok(7) }).await;
    assert_eq!(retried, Ok(7));
}

#[tokio::test]
async fn distinct_keys_run_independently() {
    let flights: SingleFlight<u32, u32, String> =
        SingleFlight::with_config(SingleFlightConfig::builder().name("ids").into_config());

    let (a, b) = tokio::join!(
        flights.execute(1, || async { Ok(10) }),
        flights.execute(2, || async { Ok(20) }),
    );
    assert_eq!(a, Ok(10));
    assert_eq!(b, Ok(20));
    assert_eq!(flights.stats().executions, 2);
}
