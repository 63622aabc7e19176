use bytes::Bytes;
use std::time::Duration;
use tokio::time::Instant;

/// Which tier an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Tier {
    /// In-process memory.
    Local,
    /// The shared remote store.
    Distributed,
}

impl Tier {
    /// Returns a static label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Local => "local",
            Tier::Distributed => "distributed",
        }
    }
}

/// A cached value with its expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Cache key.
    pub key: String,
    /// Opaque serialized payload.
    pub value: Bytes,
    /// When the entry stops being served; `None` never expires.
    pub expires_at: Option<Instant>,
    /// Tier holding the entry.
    pub tier: Tier,
    /// When the entry was written.
    pub inserted_at: Instant,
}

impl CacheEntry {
    /// Creates an entry written at `now`. A TTL too large to represent as an
    /// instant never expires.
    pub fn new(key: String, value: Bytes, ttl: Option<Duration>, tier: Tier, now: Instant) -> Self {
        Self {
            key,
            value,
            expires_at: ttl.and_then(|ttl| now.checked_add(ttl)),
            tier,
            inserted_at: now,
        }
    }

    /// An entry whose expiry is not in the future is absent to every reader.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Time left before expiry; `None` for entries that never expire.
    pub fn remaining_ttl(&self, now: Instant) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_inclusive() {
        let now = Instant::now();
        let entry = CacheEntry::new(
            "k".into(),
            Bytes::from_static(b"v"),
            Some(Duration::from_secs(1)),
            Tier::Local,
            now,
        );
        assert!(!entry.is_expired(now));
        assert!(entry.is_expired(now + Duration::from_secs(1)));
        assert_eq!(
            entry.remaining_ttl(now + Duration::from_millis(400)),
            Some(Duration::from_millis(600))
        );
    }

    #[test]
    fn no_ttl_never_expires() {
        let now = Instant::now();
        let entry = CacheEntry::new("k".into(), Bytes::new(), None, Tier::Distributed, now);
        assert!(!entry.is_expired(now + Duration::from_secs(86_400)));
        assert_eq!(entry.remaining_ttl(now), None);
    }

    #[test]
    fn unrepresentable_ttl_never_expires() {
        let now = Instant::now();
        let entry = CacheEntry::new(
            "k".into(),
            Bytes::new(),
            Some(Duration::MAX),
            Tier::Local,
            now,
        );
        assert_eq!(entry.expires_at, None);
        assert!(!entry.is_expired(now + Duration::from_secs(86_400)));
    }
}
