//! Test doubles shared by the integration tests.

use async_trait::async_trait;
use bulwark_cache::{CacheError, RemoteStore, RemoteValue};
use bulwark_pool::ConnectionManager;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Routes component logs through the test harness so they show up next to
/// a failing assertion.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .try_init();
}

/// In-memory stand-in for a shared cache server, with an outage switch and
/// call counters.
#[derive(Default)]
pub struct FakeRemote {
    entries: Mutex<HashMap<String, (Bytes, Option<Duration>)>>,
    down: AtomicBool,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
}

impl FakeRemote {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn seed(&self, key: &str, value: &'static [u8], ttl: Option<Duration>) {
        self.entries
            .lock()
            .insert(key.to_string(), (Bytes::from_static(value), ttl));
    }

    pub fn value(&self, key: &str) -> Option<Bytes> {
        self.entries.lock().get(key).map(|(value, _)| value.clone())
    }

    fn reachable(&self) -> Result<(), CacheError> {
        if self.down.load(Ordering::SeqCst) {
            Err(CacheError::Remote("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn get(&self, key: &str) -> Result<Option<RemoteValue>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.reachable()?;
        Ok(self.entries.lock().get(key).map(|(value, ttl)| RemoteValue {
            value: value.clone(),
            ttl: *ttl,
        }))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.reachable()?;
        self.entries.lock().insert(key.to_string(), (value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.reachable()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.reachable()?;
        self.entries.lock().clear();
        Ok(())
    }
}

/// Connection manager handing out numbered connections, tracking how many
/// are checked out at once.
#[derive(Clone, Default)]
pub struct FakeDb {
    pub connects: Arc<AtomicUsize>,
    pub fail_connect: Arc<AtomicBool>,
}

#[async_trait]
impl ConnectionManager for FakeDb {
    type Connection = usize;
    type Error = String;

    async fn connect(&self) -> Result<usize, String> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err("database unreachable".into());
        }
        Ok(self.connects.fetch_add(1, Ordering::SeqCst))
    }

    async fn validate(&self, _conn: &mut usize) -> Result<(), String> {
        Ok(())
    }
}
