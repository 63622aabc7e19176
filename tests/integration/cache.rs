use super::support::FakeRemote;
use bulwark_cache::{
    CacheAdapter, CacheAdapterConfig, DistributedSettings, MemoryCache, MemorySettings,
    RemoteStore, WriteOutcome,
};
use bulwark_circuitbreaker::CircuitBreakerRegistry;
use bytes::Bytes;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn multi_tier(remote: &Arc<FakeRemote>, breakers: &CircuitBreakerRegistry) -> Arc<dyn CacheAdapter> {
    CacheAdapterConfig::MultiTier {
        local: MemorySettings::default(),
        distributed: DistributedSettings::default(),
    }
    .build(
        "sessions",
        Some(Arc::clone(remote) as Arc<dyn RemoteStore>),
        breakers,
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn entry_is_absent_after_ttl() {
    let cache = MemoryCache::builder().build().unwrap();
    cache
        .set("token", Bytes::from_static(b"abc"), Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(
        cache.get("token").await.unwrap(),
        Some(Bytes::from_static(b"abc"))
    );

    tokio::time::advance(Duration::from_millis(1_001)).await;
    assert_eq!(cache.get("token").await.unwrap(), None);
    assert!(!cache.exists("token").await.unwrap());
}

#[tokio::test]
async fn distributed_hit_is_served_locally_afterwards() {
    let remote = FakeRemote::shared();
    remote.seed("user:7", b"bob", Some(Duration::from_secs(30)));
    let breakers = CircuitBreakerRegistry::default();
    let cache = multi_tier(&remote, &breakers);

    for _ in 0..3 {
        assert_eq!(
            cache.get("user:7").await.unwrap(),
            Some(Bytes::from_static(b"bob"))
        );
    }

    assert_eq!(remote.gets.load(Ordering::SeqCst), 1);
    let stats = cache.stats();
    assert_eq!(stats.distributed_hits, 1);
    assert_eq!(stats.local_hits, 2);
    assert_eq!(stats.backfills, 1);
    assert_eq!(breakers.len(), 1);
    assert!(!breakers.get("sessions.distributed").is_open());
}

#[tokio::test]
async fn degraded_write_is_reconciled_once_remote_returns() {
    let remote = FakeRemote::shared();
    let breakers = CircuitBreakerRegistry::default();
    let cache = multi_tier(&remote, &breakers);

    remote.set_down(true);
    let outcome = cache
        .set("cart:1", Bytes::from_static(b"3 items"), None)
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Degraded);
    assert_eq!(
        cache.get("cart:1").await.unwrap(),
        Some(Bytes::from_static(b"3 items"))
    );
    assert_eq!(remote.value("cart:1"), None);

    remote.set_down(false);
    assert_eq!(cache.reconcile().await.unwrap(), 1);
    assert_eq!(remote.value("cart:1"), Some(Bytes::from_static(b"3 items")));
    assert_eq!(cache.reconcile().await.unwrap(), 0);
}

#[tokio::test]
async fn equivalent_prompts_share_an_entry() {
    let config: CacheAdapterConfig = serde_json::from_str(
        r#"{ "kind": "ai", "namespace": "gpt", "inner": { "kind": "memory", "max_size": 100 } }"#,
    )
    .unwrap();
    let cache = config
        .build("completions", None, &CircuitBreakerRegistry::default())
        .unwrap();

    cache
        .set("  What is   Rust? ", Bytes::from_static(b"a language"), None)
        .await
        .unwrap();
    assert_eq!(
        cache.get("what is rust?").await.unwrap(),
        Some(Bytes::from_static(b"a language"))
    );
    assert_eq!(cache.get("what is go?").await.unwrap(), None);
}

#[test]
fn nested_prompt_caches_are_rejected() {
    let config: CacheAdapterConfig = serde_json::from_str(
        r#"{ "kind": "ai", "namespace": "a",
             "inner": { "kind": "ai", "namespace": "b", "inner": { "kind": "memory" } } }"#,
    )
    .unwrap();
    assert!(config.validate().is_err());
}
