//! Property-based tests for the bulwark components.
//!
//! Run with: cargo test --test property_tests

pub mod circuit_breaker;
pub mod memory_cache;
pub mod token_bucket;
