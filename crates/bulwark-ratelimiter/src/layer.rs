use crate::RateLimiter;
use bulwark_core::ResilienceError;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// A Tower [`Layer`] that admits requests through a [`RateLimiter`].
///
/// The key function maps each request to its rate-limit key, for example
/// `ip:<addr>` or `user:<id>`.
///
/// ```
/// use bulwark_ratelimiter::{RateLimitLayer, RateLimiter};
/// use tower::{service_fn, ServiceBuilder};
///
/// let limiter = RateLimiter::builder().policy("user", 10, 1.0).build();
/// let service = ServiceBuilder::new()
///     .layer(RateLimitLayer::new(limiter, |user: &u64| format!("user:{}", user)))
///     .service(service_fn(|user: u64| async move { Ok::<_, std::io::Error>(user) }));
/// # let _ = service;
/// ```
pub struct RateLimitLayer<F> {
    limiter: RateLimiter,
    key_fn: Arc<F>,
}

impl<F> RateLimitLayer<F> {
    /// Creates a layer that keys requests with `key_fn`.
    pub fn new(limiter: RateLimiter, key_fn: F) -> Self {
        Self {
            limiter,
            key_fn: Arc::new(key_fn),
        }
    }
}

impl<F> Clone for RateLimitLayer<F> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            key_fn: Arc::clone(&self.key_fn),
        }
    }
}

impl<S, F> Layer<S> for RateLimitLayer<F> {
    type Service = RateLimitService<S, F>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            key_fn: Arc::clone(&self.key_fn),
        }
    }
}

/// Service produced by [`RateLimitLayer`].
pub struct RateLimitService<S, F> {
    inner: S,
    limiter: RateLimiter,
    key_fn: Arc<F>,
}

impl<S: Clone, F> Clone for RateLimitService<S, F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            key_fn: Arc::clone(&self.key_fn),
        }
    }
}

impl<S, F, Req> Service<Req> for RateLimitService<S, F>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
    F: Fn(&Req) -> String + Send + Sync + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = ResilienceError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner
            .poll_ready(cx)
            .map_err(ResilienceError::Application)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let key = (self.key_fn)(&req);
        let limiter = self.limiter.clone();
        // The clone is not driven to readiness; swap so the ready one is used.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            limiter.acquire(&key).await?;
            inner
                .call(req)
                .await
                .map_err(ResilienceError::Application)
        })
    }
}
