use bulwark_healthcheck::{
    ComponentHealth, FnHealthCheck, HealthAggregator, HealthStatus,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn report_serializes_with_worst_status() {
    let aggregator = HealthAggregator::builder()
        .name("api")
        .check(Arc::new(FnHealthCheck::new("db", || async {
            ComponentHealth::healthy("db")
        })))
        .check(Arc::new(FnHealthCheck::new("cache", || async {
            ComponentHealth::degraded("cache", "remote tier unreachable")
        })))
        .build();

    let health = aggregator.check_health().await;
    assert_eq!(health.status, HealthStatus::Degraded);
    assert_eq!(health.http_status(), 200);

    let json = serde_json::to_value(&health).unwrap();
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["checks"]["db"]["status"], "healthy");
    assert_eq!(
        json["checks"]["cache"]["details"]["reason"],
        "remote tier unreachable"
    );
}

#[tokio::test]
async fn hung_check_is_unhealthy() {
    let aggregator = HealthAggregator::builder()
        .timeout(Duration::from_millis(50))
        .check(Arc::new(FnHealthCheck::new("db", || async {
            ComponentHealth::healthy("db")
        })))
        .check(Arc::new(FnHealthCheck::new("search", || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            ComponentHealth::healthy("search")
        })))
        .build();

    let health = aggregator.check_health().await;
    assert_eq!(health.status, HealthStatus::Unhealthy);
    assert_eq!(health.http_status(), 503);
    assert_eq!(health.failing(), vec!["search"]);
    assert_eq!(aggregator.latest(), Some(health));
}

#[tokio::test]
async fn nothing_registered_is_healthy() {
    let health = HealthAggregator::new().check_health().await;
    assert_eq!(health.status, HealthStatus::Healthy);
    assert!(health.checks.is_empty());
}
