use super::support::FakeDb;
use bulwark_core::ResilienceError;
use bulwark_pool::{PoolConfig, PoolError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn checked_out_connections_never_exceed_max_size() {
    let db = FakeDb::default();
    let pool = PoolConfig::builder()
        .name("db")
        .max_size(3)
        .acquire_timeout(Duration::from_secs(5))
        .build(db.clone())
        .unwrap();
    let in_use = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let pool = pool.clone();
            let in_use = Arc::clone(&in_use);
            let peak = Arc::clone(&peak);
            tokio::spawn(async move {
                let conn = pool.acquire().await.unwrap();
                let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_use.fetch_sub(1, Ordering::SeqCst);
                drop(conn);
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(db.connects.load(Ordering::SeqCst) <= 3);
    let stats = pool.stats();
    assert_eq!(stats.active, 0);
    assert!(stats.total() <= 3);
}

#[tokio::test(start_paused = true)]
async fn exhaustion_maps_to_pool_exhausted() {
    let pool = PoolConfig::builder()
        .name("db")
        .max_size(1)
        .acquire_timeout(Duration::from_millis(200))
        .build(FakeDb::default())
        .unwrap();

    let _held = pool.acquire().await.unwrap();
    let err = pool.acquire().await.unwrap_err();
    assert!(err.is_exhausted());

    let mapped: ResilienceError<String> = err.into();
    match mapped {
        ResilienceError::PoolExhausted { max_size, waited } => {
            assert_eq!(max_size, 1);
            assert!(waited >= Duration::from_millis(200));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_database_reports_connect_errors() {
    let db = FakeDb::default();
    db.fail_connect.store(true, Ordering::SeqCst);
    let pool = PoolConfig::builder()
        .name("db")
        .max_size(2)
        .build(db.clone())
        .unwrap();

    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, PoolError::Connect { .. }));
    assert_eq!(pool.stats().total(), 0);

    db.fail_connect.store(false, Ordering::SeqCst);
    assert_eq!(*pool.acquire().await.unwrap(), 0);
}

#[tokio::test]
async fn close_drains_idle_connections() {
    let pool = PoolConfig::builder()
        .name("db")
        .min_size(2)
        .max_size(4)
        .build(FakeDb::default())
        .unwrap();
    assert_eq!(pool.warm_up().await.unwrap(), 2);

    assert_eq!(pool.close().await, 2);
    assert!(pool.is_closed());
    assert!(matches!(pool.acquire().await, Err(PoolError::Closed(_))));
}
