//! Ref TTL eviction tests.

mod common;

use cas_gc::models::{BlobId, BucketId, GcMethod, NamespaceId, NamespacePolicy, RefKey};
use cas_gc::{CancellationToken, RefCleanup};
use std::sync::Arc;

use common::{FlakyRefIndex, TestCache, UnavailableReplicationLog};

#[tokio::test]
async fn test_expired_ref_is_deleted_with_one_delete_event() {
    let cache = TestCache::new();
    cache.policy("n1", GcMethod::LastAccess);
    let blob = BlobId::from_content(b"payload");
    cache.add_ref("n1", "B", "K", &blob, 90);

    let deleted = cache
        .ref_collector()
        .cleanup(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(deleted, 1);
    assert!(cache.refs.is_empty());
    let events = cache.log.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].namespace, NamespaceId::new("n1"));
    assert_eq!(events[0].bucket, BucketId::new("B"));
    assert_eq!(events[0].key, RefKey::new("K"));
    assert_eq!(events[0].blob, Some(blob));
}

#[tokio::test]
async fn test_disabled_or_unset_namespaces_are_never_touched() {
    let cache = TestCache::new();
    cache.policy("disabled", GcMethod::Disabled);
    cache
        .policies
        .set(NamespaceId::new("unset"), NamespacePolicy::default());
    let blob = BlobId::from_content(b"old");
    let ten_days = 10 * 24 * 60;
    cache.add_ref("disabled", "b", "k", &blob, ten_days);
    cache.add_ref("unset", "b", "k", &blob, ten_days);

    let report = cache
        .ref_collector()
        .cleanup_with_report(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.considered, 0);
    assert_eq!(report.deleted, 0);
    assert_eq!(cache.refs.len(), 2);
    assert!(cache.log.is_empty());
}

#[tokio::test]
async fn test_ttl_correctness_across_policies() {
    let cache = TestCache::new();
    cache.policy("last-access", GcMethod::LastAccess);
    cache.policy("always", GcMethod::Always);
    cache.policy("disabled", GcMethod::Disabled);
    cache
        .policies
        .set(NamespaceId::internal(), NamespacePolicy::new(GcMethod::Always));
    let blob = BlobId::from_content(b"x");

    for ns in ["last-access", "always", "disabled", "__internal", "unknown"] {
        cache.add_ref(ns, "b", "expired", &blob, 61);
        cache.add_ref(ns, "b", "fresh", &blob, 59);
    }

    let report = cache
        .ref_collector()
        .cleanup_with_report(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.deleted, 2);
    assert_eq!(report.considered, 4);
    let expired = RefKey::new("expired");
    let fresh = RefKey::new("fresh");
    let bucket = BucketId::new("b");
    for ns in ["last-access", "always"] {
        let ns = NamespaceId::new(ns);
        assert!(cache.refs.get(&ns, &bucket, &expired).is_none());
        assert!(cache.refs.get(&ns, &bucket, &fresh).is_some());
    }
    for ns in ["disabled", "__internal", "unknown"] {
        let ns = NamespaceId::new(ns);
        assert!(cache.refs.get(&ns, &bucket, &expired).is_some());
        assert!(cache.refs.get(&ns, &bucket, &fresh).is_some());
    }
}

#[tokio::test]
async fn test_touched_ref_survives() {
    let cache = TestCache::new();
    cache.policy("n1", GcMethod::LastAccess);
    let blob = BlobId::from_content(b"x");
    cache.add_ref("n1", "b", "k", &blob, 120);
    assert!(cache.refs.touch(
        &NamespaceId::new("n1"),
        &BucketId::new("b"),
        &RefKey::new("k"),
        chrono::Utc::now(),
    ));

    let deleted = cache
        .ref_collector()
        .cleanup(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(deleted, 0);
    assert_eq!(cache.refs.len(), 1);
}

#[tokio::test]
async fn test_second_run_deletes_nothing() {
    let cache = TestCache::new();
    cache.policy("n1", GcMethod::Always);
    let blob = BlobId::from_content(b"x");
    for i in 0..50 {
        cache.add_ref("n1", "b", &format!("k{}", i), &blob, 31 + i * 2);
    }
    let collector = cache.ref_collector();

    let first = collector.cleanup(CancellationToken::new()).await.unwrap();
    let second = collector.cleanup(CancellationToken::new()).await.unwrap();

    // Ages 31..=129 in steps of 2; 61 and above are past the cutoff.
    assert_eq!(first, 35);
    assert_eq!(second, 0);
    assert_eq!(cache.refs.len(), 15);
    assert_eq!(cache.log.len(), 35);
}

#[tokio::test]
async fn test_streams_tens_of_thousands_of_refs() {
    let cache = TestCache::new();
    cache.policy("big", GcMethod::LastAccess);
    cache.settings.update(|s| s.max_parallel_ref_operations = 32);
    let blob = BlobId::from_content(b"shared");
    for i in 0..25_000 {
        let minutes = if i % 5 == 0 { 10 } else { 24 * 60 };
        cache.add_ref("big", "bucket", &format!("key-{:06}", i), &blob, minutes);
    }

    let report = cache
        .ref_collector()
        .cleanup_with_report(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.considered, 25_000);
    assert_eq!(report.deleted, 20_000);
    assert_eq!(report.errors, 0);
    assert_eq!(cache.refs.len(), 5_000);
    assert_eq!(cache.log.len(), 20_000);
    assert_eq!(cache.counters.snapshot().refs_deleted, 20_000);
}

#[tokio::test]
async fn test_ttl_change_applies_to_next_run() {
    let cache = TestCache::new();
    cache.policy("n1", GcMethod::LastAccess);
    let blob = BlobId::from_content(b"x");
    cache.add_ref("n1", "b", "k", &blob, 30);
    let collector = cache.ref_collector();

    assert_eq!(collector.cleanup(CancellationToken::new()).await.unwrap(), 0);

    cache
        .settings
        .update(|s| s.ref_ttl = std::time::Duration::from_secs(10 * 60));
    assert_eq!(collector.cleanup(CancellationToken::new()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_lost_replication_event_keeps_ref_deleted() {
    let cache = TestCache::new();
    cache.policy("n1", GcMethod::LastAccess);
    let blob = BlobId::from_content(b"x");
    cache.add_ref("n1", "b", "k", &blob, 90);

    let report = cache
        .ref_collector_with(
            Arc::new(cache.refs.clone()),
            Arc::new(UnavailableReplicationLog),
        )
        .cleanup_with_report(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.deleted, 1);
    assert_eq!(report.errors, 1);
    assert!(cache.refs.is_empty());
    let counters = cache.counters.snapshot();
    assert_eq!(counters.refs_deleted, 1);
    assert_eq!(counters.errors, 1);
}

#[tokio::test]
async fn test_failed_delete_does_not_stop_the_pass() {
    let cache = TestCache::new();
    cache.policy("n1", GcMethod::Always);
    let blob = BlobId::from_content(b"x");
    for i in 0..10 {
        cache.add_ref("n1", "b", &format!("k{}", i), &blob, 120);
    }
    let refs = FlakyRefIndex::new(cache.refs.clone());
    refs.failing_deletes.lock().push(RefKey::new("k3"));

    let report = cache
        .ref_collector_with(Arc::new(refs), Arc::new(cache.log.clone()))
        .cleanup_with_report(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.considered, 10);
    assert_eq!(report.deleted, 9);
    assert_eq!(report.errors, 1);
    assert_eq!(cache.refs.len(), 1);
    assert!(cache
        .refs
        .get(&NamespaceId::new("n1"), &BucketId::new("b"), &RefKey::new("k3"))
        .is_some());
    assert_eq!(cache.log.len(), 9);

    // The failed ref goes on the next pass.
    assert_eq!(cache.ref_collector().cleanup(CancellationToken::new()).await.unwrap(), 1);
}
