use bulwark_circuitbreaker::{CircuitBreaker, CircuitBreakerError, CircuitBreakerLayer, CircuitState};
use bulwark_core::ResilienceError;
use bulwark_ratelimiter::{RateLimitLayer, RateLimiter};
use std::time::Duration;
use tower::{service_fn, ServiceBuilder, ServiceExt};

#[derive(Debug, Clone, PartialEq)]
struct Lookup {
    tenant: &'static str,
    fail: bool,
}

#[tokio::test]
async fn limiter_wraps_breaker_wraps_service() {
    super::support::init_tracing();
    let limiter = RateLimiter::builder()
        .default_policy(100, 100.0)
        .policy("tenant", 3, 0.01)
        .build();
    let breaker = CircuitBreaker::builder()
        .name("lookup")
        .failure_threshold(2)
        .reset_timeout(Duration::from_secs(60))
        .build();

    let service = ServiceBuilder::new()
        .layer(RateLimitLayer::new(limiter, |req: &Lookup| {
            format!("tenant:{}", req.tenant)
        }))
        .layer(CircuitBreakerLayer::new(breaker.clone()))
        .service(service_fn(|req: Lookup| async move {
            if req.fail {
                Err("backend error")
            } else {
                Ok(req.tenant.len())
            }
        }));

    let ok = Lookup { tenant: "acme", fail: false };
    let bad = Lookup { tenant: "globex", fail: true };

    assert_eq!(service.clone().oneshot(ok.clone()).await.unwrap(), 4);
    for _ in 0..2 {
        let err = service.clone().oneshot(bad.clone()).await.unwrap_err();
        assert!(matches!(
            err,
            ResilienceError::Application(CircuitBreakerError::Inner("backend error"))
        ));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let rejected = service.clone().oneshot(ok.clone()).await.unwrap_err();
    assert!(matches!(
        rejected,
        ResilienceError::Application(CircuitBreakerError::OpenCircuit { .. })
    ));

    // The limiter runs first: globex's third request still reaches the open
    // breaker, its fourth never gets past the limiter.
    let limited = service.clone().oneshot(bad.clone()).await.unwrap_err();
    assert!(matches!(limited, ResilienceError::Application(CircuitBreakerError::OpenCircuit { .. })));
    let limited = service.clone().oneshot(bad).await.unwrap_err();
    assert!(limited.is_rate_limited());
}
