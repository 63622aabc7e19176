use super::support::FakeDb;
use bulwark::{Bulwark, BulwarkSettings, FetchRequest, FetchSource};
use bulwark_core::ResilienceError;
use bulwark_healthcheck::HealthStatus;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn pipeline(settings: &str) -> Bulwark<FakeDb, String> {
    super::support::init_tracing();
    let settings = BulwarkSettings::from_json(settings).unwrap();
    Bulwark::from_settings(settings, FakeDb::default()).unwrap()
}

#[tokio::test]
async fn concurrent_misses_load_once() {
    let bulwark = pipeline(r#"{ "pool": { "name": "db", "max_size": 2 } }"#);
    let loads = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let bulwark = bulwark.clone();
            let loads = Arc::clone(&loads);
            tokio::spawn(async move {
                let request = FetchRequest::new("product:9").client(format!("client-{i}"));
                bulwark
                    .fetch(request, move |_conn| async move {
                        loads.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(Bytes::from_static(b"widget"))
                    })
                    .await
            })
        })
        .collect();

    for handle in handles {
        let fetched = handle.await.unwrap().unwrap();
        assert_eq!(fetched.value, Bytes::from_static(b"widget"));
        assert!(fetched.rate_limit.allowed);
    }
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    let again = bulwark
        .fetch(FetchRequest::new("product:9"), |_conn| async {
            Err("should be cached".to_string())
        })
        .await
        .unwrap();
    assert_eq!(again.source, FetchSource::Cache);

    bulwark.shutdown().await;
}

#[tokio::test]
async fn client_budget_is_enforced_before_loading() {
    let bulwark = pipeline(
        r#"{ "rate_limit": { "default_capacity": 2, "default_refill_per_second": 0.5 } }"#,
    );

    for i in 0..2 {
        bulwark
            .fetch(FetchRequest::new(format!("k{i}")).client("bot"), |_conn| async {
                Ok(Bytes::from_static(b"v"))
            })
            .await
            .unwrap();
    }
    let err = bulwark
        .fetch(FetchRequest::new("k9").client("bot"), |_conn| async {
            Ok(Bytes::from_static(b"v"))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ResilienceError::RateLimited { retry_after: Some(_) }));

    bulwark.shutdown().await;
}

#[tokio::test]
async fn health_covers_every_component() {
    let bulwark = pipeline(r#"{ "pool": { "name": "db" } }"#);

    let health = bulwark.health().await;
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.http_status(), 200);
    assert!(health.checks.contains_key("db"));
    assert!(health.checks.contains_key("circuit_breakers"));
    assert!(health.checks.keys().any(|name| name.starts_with("cache.")));
    assert!(health.checks.keys().any(|name| name.starts_with("ratelimiter.")));

    let report = bulwark.shutdown().await;
    assert_eq!(report.pools_closed, 1);
    assert!(bulwark.registry().is_shut_down());
}
