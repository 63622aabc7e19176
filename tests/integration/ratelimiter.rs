use bulwark_core::ResilienceError;
use bulwark_ratelimiter::{RateLimiter, RateLimiterError};
use std::time::{Duration, SystemTime};

#[tokio::test]
async fn burst_beyond_capacity_is_denied() {
    let limiter = RateLimiter::builder()
        .name("api")
        .default_policy(5, 1.0)
        .build();
    let started = SystemTime::now();

    let decisions = futures::future::join_all((0..7).map(|_| limiter.check("10.0.0.1"))).await;

    let allowed = decisions.iter().filter(|d| d.allowed).count();
    assert_eq!(allowed, 5);
    for denied in decisions.iter().filter(|d| !d.allowed) {
        assert_eq!(denied.status_code(), 429);
        assert!(denied.reset_at > started);
        assert!(denied.reset_at <= started + Duration::from_secs(2));
        let headers = denied.headers();
        assert!(headers.contains(&("X-RateLimit-Limit", "5".to_string())));
        assert!(headers.contains(&("X-RateLimit-Remaining", "0".to_string())));
        assert!(headers.iter().any(|(name, _)| *name == "Retry-After"));
    }

    // Other clients have their own budget.
    assert!(limiter.check("10.0.0.2").await.allowed);
    let stats = limiter.stats();
    assert_eq!(stats.allowed, 6);
    assert_eq!(stats.denied, 2);
    assert_eq!(stats.local_buckets, 2);
}

#[tokio::test]
async fn prefix_policies_override_the_default() {
    let limiter = RateLimiter::builder()
        .default_policy(100, 10.0)
        .policy("login", 2, 0.1)
        .build();

    assert!(limiter.check("login:alice").await.allowed);
    assert!(limiter.check("login:alice").await.allowed);
    let denied = limiter.check("login:alice").await;
    assert!(!denied.allowed);
    assert_eq!(denied.limit, 2);

    let other = limiter.check("search:alice").await;
    assert!(other.allowed);
    assert_eq!(other.limit, 100);
}

#[tokio::test]
async fn acquire_maps_to_rate_limited() {
    let limiter = RateLimiter::builder().default_policy(1, 1.0).build();
    limiter.acquire("k").await.unwrap();

    let err = limiter.acquire("k").await.unwrap_err();
    let RateLimiterError::RateLimitExceeded { retry_after, .. } = &err;
    assert!(*retry_after > Duration::ZERO);
    assert!(*retry_after <= Duration::from_secs(1));

    let mapped: ResilienceError<std::io::Error> = err.into();
    assert!(matches!(mapped, ResilienceError::RateLimited { retry_after: Some(_) }));
}
