//! # Caching Integration Tests
//!
//! CacheManager and CacheInvalidator behavior against a real Redis.

use brandhub_cache::{get_or_set, CacheInvalidator, CacheManager, KvStore, StoreConfig};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use testcontainers::clients::Cli;
use testcontainers::core::WaitFor;
use testcontainers::GenericImage;
use tokio::time::sleep;

fn redis_image() -> GenericImage {
    GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn connect(port: u16) -> KvStore {
    init_tracing();
    let config = StoreConfig {
        url: format!("redis://127.0.0.1:{port}"),
        key_prefix: "test:".to_string(),
        ..Default::default()
    };
    KvStore::connect(config).await.unwrap()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrgDetails {
    name: String,
    member_count: u32,
}

#[tokio::test]
#[ignore] // Requires Docker for Redis container
async fn test_set_get_round_trip() {
    let docker = Cli::default();
    let node = docker.run(redis_image());
    let store = connect(node.get_host_port_ipv4(6379)).await;
    let cache = CacheManager::new(store, "org");

    let details = OrgDetails {
        name: "Acme".to_string(),
        member_count: 12,
    };

    assert!(cache.set("details:1", &details, None).await);
    let cached: Option<OrgDetails> = cache.get("details:1").await;
    assert_eq!(cached, Some(details));
}

#[tokio::test]
#[ignore] // Requires Docker for Redis container
async fn test_get_missing_key_is_a_miss() {
    let docker = Cli::default();
    let node = docker.run(redis_image());
    let store = connect(node.get_host_port_ipv4(6379)).await;
    let cache = CacheManager::new(store, "org");

    let cached: Option<OrgDetails> = cache.get("details:absent").await;
    assert_eq!(cached, None);

    // deleted keys also read as misses
    let details = OrgDetails {
        name: "Acme".to_string(),
        member_count: 1,
    };
    cache.set("details:2", &details, None).await;
    assert!(cache.delete("details:2").await);
    assert_eq!(cache.get::<OrgDetails>("details:2").await, None);
    // idempotent
    assert!(!cache.delete("details:2").await);
}

#[tokio::test]
#[ignore] // Requires Docker for Redis container
async fn test_ttl_expiry() {
    let docker = Cli::default();
    let node = docker.run(redis_image());
    let store = connect(node.get_host_port_ipv4(6379)).await;
    let cache = CacheManager::new(store, "org");

    cache
        .set("short", &"value".to_string(), Some(Duration::from_secs(1)))
        .await;
    assert!(cache.exists("short").await);
    assert_eq!(cache.get::<String>("short").await.as_deref(), Some("value"));

    sleep(Duration::from_millis(1500)).await;

    assert_eq!(cache.get::<String>("short").await, None);
    assert!(!cache.exists("short").await);
}

#[tokio::test]
#[ignore] // Requires Docker for Redis container
async fn test_delete_pattern_is_namespace_scoped() {
    let docker = Cli::default();
    let node = docker.run(redis_image());
    let store = connect(node.get_host_port_ipv4(6379)).await;
    let orgs = CacheManager::new(store.clone(), "org");
    let users = CacheManager::new(store, "user");

    orgs.set("users:1:page1", &1u32, None).await;
    orgs.set("users:1:page2", &2u32, None).await;
    orgs.set("users:2:page1", &3u32, None).await;
    // same-looking key in another namespace must survive
    users.set("users:1:page1", &4u32, None).await;

    let deleted = orgs.delete_pattern("users:1:*").await;
    assert_eq!(deleted, 2);

    assert!(!orgs.exists("users:1:page1").await);
    assert!(!orgs.exists("users:1:page2").await);
    assert!(orgs.exists("users:2:page1").await);
    assert!(users.exists("users:1:page1").await);

    // no matches deletes nothing
    assert_eq!(orgs.delete_pattern("users:9:*").await, 0);
}

#[tokio::test]
#[ignore] // Requires Docker for Redis container
async fn test_increment_creates_then_accumulates() {
    let docker = Cli::default();
    let node = docker.run(redis_image());
    let store = connect(node.get_host_port_ipv4(6379)).await;
    let cache = CacheManager::new(store, "org");

    assert_eq!(cache.increment("counter", 1).await, 1);
    assert_eq!(cache.increment("counter", 5).await, 6);
}

#[tokio::test]
#[ignore] // Requires Docker for Redis container
async fn test_expire_and_ttl_pass_through() {
    let docker = Cli::default();
    let node = docker.run(redis_image());
    let store = connect(node.get_host_port_ipv4(6379)).await;
    let cache = CacheManager::new(store, "org");

    cache.set("k", &1u32, Some(Duration::from_secs(600))).await;
    let ttl = cache.ttl("k").await.unwrap();
    assert!(ttl > 590 && ttl <= 600);

    assert!(cache.expire("k", Duration::from_secs(30)).await);
    let ttl = cache.ttl("k").await.unwrap();
    assert!(ttl > 0 && ttl <= 30);

    assert!(!cache.expire("missing", Duration::from_secs(30)).await);
    assert_eq!(cache.ttl("missing").await, Some(-2));
}

#[tokio::test]
#[ignore] // Requires Docker for Redis container
async fn test_get_or_set_fetches_once() {
    let docker = Cli::default();
    let node = docker.run(redis_image());
    let store = connect(node.get_host_port_ipv4(6379)).await;
    let cache = CacheManager::new(store, "org");

    let fetches = AtomicU32::new(0);

    let first = get_or_set(&cache, "expensive", None, || async {
        fetches.fetch_add(1, Ordering::SeqCst);
        42u32
    })
    .await;
    assert_eq!(first, 42);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    // second call hits the cache; the fetcher must not run again
    let second = get_or_set(&cache, "expensive", None, || async {
        fetches.fetch_add(1, Ordering::SeqCst);
        99u32
    })
    .await;
    assert_eq!(second, 42);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
#[ignore] // Requires Docker for Redis container
async fn test_flush_clears_only_own_namespace() {
    let docker = Cli::default();
    let node = docker.run(redis_image());
    let store = connect(node.get_host_port_ipv4(6379)).await;
    let orgs = CacheManager::new(store.clone(), "org");
    let users = CacheManager::new(store, "user");

    orgs.set("a", &1u32, None).await;
    orgs.set("b", &2u32, None).await;
    users.set("a", &3u32, None).await;

    assert_eq!(orgs.flush().await, 2);
    assert!(!orgs.exists("a").await);
    assert!(users.exists("a").await);
}

#[tokio::test]
#[ignore] // Requires Docker for Redis container
async fn test_store_outage_degrades_to_misses() {
    init_tracing();
    let docker = Cli::default();
    let node = docker.run(redis_image());
    let config = StoreConfig {
        url: format!("redis://127.0.0.1:{}", node.get_host_port_ipv4(6379)),
        key_prefix: "test:".to_string(),
        max_retries: 0,
        command_timeout: Duration::from_millis(200),
        ..Default::default()
    };
    let store = KvStore::connect(config).await.unwrap();
    let cache = CacheManager::new(store, "org");

    assert!(cache.set("details:1", &1u32, None).await);

    // stop the container; every store command now errors
    drop(node);

    // a cache outage degrades to misses and no-ops, never to failures
    assert_eq!(cache.get::<u32>("details:1").await, None);
    assert!(!cache.set("details:1", &2u32, None).await);
    assert!(!cache.delete("details:1").await);
    assert!(!cache.exists("details:1").await);
    assert_eq!(cache.increment("counter", 1).await, 0);
    assert_eq!(cache.delete_pattern("*").await, 0);
    assert_eq!(cache.ttl("details:1").await, None);
}

#[tokio::test]
#[ignore] // Requires Docker for Redis container
async fn test_invalidate_organization_fan_out() {
    let docker = Cli::default();
    let node = docker.run(redis_image());
    let store = connect(node.get_host_port_ipv4(6379)).await;
    let invalidator = CacheInvalidator::new(store);

    let orgs = invalidator.organizations();
    let assets = invalidator.assets();

    orgs.set("details:7", &"d".to_string(), None).await;
    orgs.set("settings:7", &"s".to_string(), None).await;
    orgs.set("usage:7", &"u".to_string(), None).await;
    orgs.set("users:7:page1", &"p".to_string(), None).await;
    orgs.set("users:7:page2", &"p".to_string(), None).await;
    assets.set("org:7:asset:1", &"a".to_string(), None).await;
    // another organization's entries must survive
    orgs.set("details:8", &"d".to_string(), None).await;
    orgs.set("users:8:page1", &"p".to_string(), None).await;

    invalidator.invalidate_organization("7").await;

    assert!(!orgs.exists("details:7").await);
    assert!(!orgs.exists("settings:7").await);
    assert!(!orgs.exists("usage:7").await);
    assert!(!orgs.exists("users:7:page1").await);
    assert!(!orgs.exists("users:7:page2").await);
    assert!(!assets.exists("org:7:asset:1").await);
    assert!(orgs.exists("details:8").await);
    assert!(orgs.exists("users:8:page1").await);

    // invalidation is idempotent-safe to re-issue
    invalidator.invalidate_organization("7").await;
}

#[tokio::test]
#[ignore] // Requires Docker for Redis container
async fn test_invalidate_user_and_asset_and_tier() {
    let docker = Cli::default();
    let node = docker.run(redis_image());
    let store = connect(node.get_host_port_ipv4(6379)).await;
    let invalidator = CacheInvalidator::new(store);

    invalidator
        .users()
        .set("profile:u1", &"p".to_string(), None)
        .await;
    invalidator
        .users()
        .set("permissions:u1", &"p".to_string(), None)
        .await;
    invalidator
        .users()
        .set("roles:u1", &"r".to_string(), None)
        .await;
    invalidator.invalidate_user("u1").await;
    assert!(!invalidator.users().exists("profile:u1").await);
    assert!(!invalidator.users().exists("permissions:u1").await);
    assert!(!invalidator.users().exists("roles:u1").await);

    invalidator
        .assets()
        .set("details:a1", &"d".to_string(), None)
        .await;
    invalidator
        .assets()
        .set("metadata:a1", &"m".to_string(), None)
        .await;
    invalidator
        .organizations()
        .set("usage:7", &"u".to_string(), None)
        .await;
    invalidator.invalidate_asset("a1", "7").await;
    assert!(!invalidator.assets().exists("details:a1").await);
    assert!(!invalidator.assets().exists("metadata:a1").await);
    // usage depends on asset state and must be purged too
    assert!(!invalidator.organizations().exists("usage:7").await);

    invalidator
        .tiers()
        .set("limits:t1", &"l".to_string(), None)
        .await;
    invalidator.invalidate_tier("t1").await;
    assert!(!invalidator.tiers().exists("limits:t1").await);
}
