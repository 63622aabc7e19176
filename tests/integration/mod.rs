//! Integration tests, one module per component plus the full pipeline.

pub mod cache;
pub mod circuitbreaker;
pub mod health;
pub mod layers;
pub mod pipeline;
pub mod pool;
pub mod ratelimiter;
pub mod singleflight;
pub mod support;
