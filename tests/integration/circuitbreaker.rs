use bulwark_circuitbreaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
use bulwark_core::ResilienceError;
use std::time::Duration;

fn breaker() -> CircuitBreaker {
    CircuitBreaker::builder()
        .name("payments")
        .failure_threshold(3)
        .reset_timeout(Duration::from_millis(50))
        .half_open_success_threshold(2)
        .build()
}

async fn fail(breaker: &CircuitBreaker) -> Result<(), CircuitBreakerError<&'static str>> {
    breaker.call(|| async { Err::<(), _>("declined") }).await
}

async fn succeed(breaker: &CircuitBreaker) -> Result<(), CircuitBreakerError<&'static str>> {
    breaker.call(|| async { Ok::<_, &'static str>(()) }).await
}

#[tokio::test]
async fn full_state_cycle() {
    let breaker = breaker();

    for _ in 0..3 {
        assert!(matches!(fail(&breaker).await, Err(CircuitBreakerError::Inner("declined"))));
    }
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(breaker.http_status(), 503);

    let rejected = fail(&breaker).await.unwrap_err();
    assert!(rejected.is_circuit_open());
    let mapped: ResilienceError<&'static str> = rejected.into();
    assert!(matches!(mapped, ResilienceError::CircuitOpen { .. }));

    tokio::time::sleep(Duration::from_millis(80)).await;
    succeed(&breaker).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    succeed(&breaker).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.metrics().consecutive_failures, 0);
}

#[tokio::test]
async fn half_open_failure_reopens() {
    let breaker = breaker();
    for _ in 0..3 {
        let _ = fail(&breaker).await;
    }

    tokio::time::sleep(Duration::from_millis(80)).await;
    let _ = fail(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(fail(&breaker).await.unwrap_err().is_circuit_open());
}

#[tokio::test]
async fn success_resets_the_failure_streak() {
    let breaker = breaker();
    for _ in 0..10 {
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        succeed(&breaker).await.unwrap();
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn transitions_are_observable() {
    let breaker = breaker();
    let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&seen);
    breaker.on_transition(move |from, to| sink.lock().push((from, to)));

    for _ in 0..3 {
        let _ = fail(&breaker).await;
    }
    breaker.reset();

    assert_eq!(
        *seen.lock(),
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::Closed),
        ]
    );
}
