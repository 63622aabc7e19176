//! Caching, deduplication, circuit breaking, rate limiting and connection
//! pooling beneath request handling.
//!
//! `bulwark` ties the component crates together:
//!
//! - [`BulwarkSettings`]: one serde document configuring every component,
//!   validated before anything is built.
//! - [`Registry`]: owns the cache, the breakers, the rate limiter, the
//!   health aggregator and their background tasks. There are no globals;
//!   [`Registry::shutdown_all`] stops everything the registry started.
//! - [`Bulwark`]: the read path. Rate-limit admission, cache lookup, and on
//!   a miss one deduplicated load through a circuit breaker and a pooled
//!   connection, written back to the cache.
//!
//! Each component is also re-exported as a module for direct use.
//!
//! # Example
//!
//! ```
//! use async_trait::async_trait;
//! use bulwark::{Bulwark, BulwarkSettings, FetchRequest};
//! use bulwark::pool::ConnectionManager;
//! use bytes::Bytes;
//!
//! struct Db;
//!
//! #[async_trait]
//! impl ConnectionManager for Db {
//!     type Connection = ();
//!     type Error = std::io::Error;
//!
//!     async fn connect(&self) -> Result<(), std::io::Error> {
//!         Ok(())
//!     }
//!
//!     async fn validate(&self, _conn: &mut ()) -> Result<(), std::io::Error> {
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = BulwarkSettings::from_json(r#"{ "pool": { "max_size": 4 } }"#)?;
//! let bulwark: Bulwark<Db, String> = Bulwark::from_settings(settings, Db)?;
//!
//! let fetched = bulwark
//!     .fetch(FetchRequest::new("user:42").client("10.0.0.7"), |_conn| async {
//!         Ok(Bytes::from_static(b"{\"name\":\"alice\"}"))
//!     })
//!     .await
//!     .map_err(|err| err.to_string())?;
//! for (name, value) in fetched.rate_limit.headers() {
//!     println!("{}: {}", name, value);
//! }
//!
//! let health = bulwark.health().await;
//! println!("{} -> {}", health.status, health.http_status());
//! bulwark.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Feature Flags
//! - `tracing` (default): structured logs from every component
//! - `metrics`: counters, gauges and histograms through the `metrics` crate

mod error;
mod fetch;
mod health;
mod registry;
mod settings;

pub use error::SettingsError;
pub use fetch::{Bulwark, FetchRequest, FetchSource, Fetched};
pub use health::{BreakerHealth, CacheHealth, RateLimiterHealth};
pub use registry::{Registry, RegistryBuilder, ShutdownReport};
pub use settings::{
    BulwarkSettings, CacheMaintenanceSettings, CircuitBreakerSettings, HealthSettings,
    PoolSettings, PolicySettings, RateLimitSettings, SingleFlightSettings,
};

pub use bulwark_cache as cache;
pub use bulwark_circuitbreaker as circuitbreaker;
pub use bulwark_core as core;
pub use bulwark_core::ResilienceError;
pub use bulwark_healthcheck as healthcheck;
pub use bulwark_pool as pool;
pub use bulwark_ratelimiter as ratelimiter;
pub use bulwark_singleflight as singleflight;
