//! Common test utilities.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cas_gc::metrics::GcCounters;
use cas_gc::models::{
    BlobId, BlobInfo, BlobReference, BucketId, GcMethod, NamespaceId, NamespacePolicy, RefKey,
    RefRecord,
};
use cas_gc::{
    BlobReferenceIndex, BlobStore, ErrorCode, GcSettings, MemoryBlobReferenceIndex,
    MemoryBlobStore, MemoryPolicyResolver, MemoryRefIndex, MemoryReplicationLog,
    OrphanBlobCollector, RefIndex, RefTtlCollector, ReplicationLog, SettingsHandle,
    StaticLeaderElection, StorageError, StorageResult,
};

/// In-memory cache with both collectors wired over it.
pub struct TestCache {
    pub refs: MemoryRefIndex,
    pub blobs: MemoryBlobStore,
    pub references: MemoryBlobReferenceIndex,
    pub policies: MemoryPolicyResolver,
    pub leader: StaticLeaderElection,
    pub log: MemoryReplicationLog,
    pub settings: SettingsHandle,
    pub counters: Arc<GcCounters>,
}

impl TestCache {
    /// Creates an empty cache with a one hour ref TTL.
    pub fn new() -> Self {
        let policies = MemoryPolicyResolver::new();
        Self {
            refs: MemoryRefIndex::new(),
            blobs: MemoryBlobStore::with_pools(policies.clone()),
            references: MemoryBlobReferenceIndex::new(),
            policies,
            leader: StaticLeaderElection::new(true),
            log: MemoryReplicationLog::new(),
            settings: SettingsHandle::new(GcSettings {
                ref_ttl: std::time::Duration::from_secs(60 * 60),
                randomize_start: false,
                ..GcSettings::default()
            }),
            counters: Arc::new(GcCounters::new()),
        }
    }

    pub fn policy(&self, ns: &str, method: GcMethod) -> NamespaceId {
        let namespace = NamespaceId::new(ns);
        self.policies
            .set(namespace.clone(), NamespacePolicy::new(method));
        namespace
    }

    pub fn pooled_policy(&self, ns: &str, method: GcMethod, pool: &str) -> NamespaceId {
        let namespace = NamespaceId::new(ns);
        self.policies
            .set(namespace.clone(), NamespacePolicy::new(method).with_pool(pool));
        namespace
    }

    /// Inserts a ref last read `minutes` ago.
    pub fn add_ref(&self, ns: &str, bucket: &str, key: &str, blob: &BlobId, minutes: i64) {
        self.refs
            .insert(RefRecord::new(ns, bucket, key, blob.clone(), minutes_ago(minutes)));
    }

    /// Uploads a blob through `ns`, written `minutes` ago.
    pub fn add_blob(&self, ns: &NamespaceId, content: &str, minutes: i64) -> BlobId {
        self.blobs.put_at(ns, content, minutes_ago(minutes))
    }

    pub fn ref_edge(&self, ns: &NamespaceId, blob: &BlobId, bucket: &str, key: &str) {
        self.references.add_reference(
            ns,
            blob,
            BlobReference::to_ref(ns.as_str(), bucket, key),
        );
    }

    pub fn ref_collector(&self) -> RefTtlCollector {
        self.ref_collector_with(Arc::new(self.refs.clone()), Arc::new(self.log.clone()))
    }

    /// Ref collector over a wrapped ref index and replication log.
    pub fn ref_collector_with(
        &self,
        refs: Arc<dyn RefIndex>,
        log: Arc<dyn ReplicationLog>,
    ) -> RefTtlCollector {
        RefTtlCollector::new(
            refs,
            Arc::new(self.policies.clone()),
            log,
            self.settings.clone(),
            self.counters.clone(),
        )
    }

    pub fn orphan_collector(&self) -> OrphanBlobCollector {
        self.orphan_collector_with(
            Arc::new(self.blobs.clone()),
            Arc::new(self.references.clone()),
        )
    }

    /// Orphan collector over a wrapped blob store and reference index.
    pub fn orphan_collector_with(
        &self,
        blobs: Arc<dyn BlobStore>,
        references: Arc<dyn BlobReferenceIndex>,
    ) -> OrphanBlobCollector {
        OrphanBlobCollector::new(
            blobs,
            references,
            Arc::new(self.refs.clone()),
            Arc::new(self.policies.clone()),
            Arc::new(self.leader.clone()),
            self.settings.clone(),
            self.counters.clone(),
        )
    }
}

pub fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::minutes(minutes)
}

/// Blob store wrapper that counts listings per namespace and can fail
/// existence checks for selected blobs.
#[derive(Clone)]
pub struct InstrumentedBlobStore {
    pub inner: MemoryBlobStore,
    pub listings: Arc<Mutex<HashMap<NamespaceId, usize>>>,
    pub failing_exists: Arc<Mutex<Vec<BlobId>>>,
    pub fail_deletes: Arc<AtomicBool>,
}

impl InstrumentedBlobStore {
    pub fn new(inner: MemoryBlobStore) -> Self {
        Self {
            inner,
            listings: Arc::new(Mutex::new(HashMap::new())),
            failing_exists: Arc::new(Mutex::new(Vec::new())),
            fail_deletes: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn listings_of(&self, ns: &NamespaceId) -> usize {
        self.listings.lock().get(ns).copied().unwrap_or(0)
    }
}

#[async_trait]
impl BlobStore for InstrumentedBlobStore {
    fn stream_blobs(&self, namespace: &NamespaceId) -> BoxStream<'_, StorageResult<BlobInfo>> {
        *self.listings.lock().entry(namespace.clone()).or_default() += 1;
        self.inner.stream_blobs(namespace)
    }

    async fn blob_exists(&self, namespace: &NamespaceId, id: &BlobId) -> StorageResult<bool> {
        if self.failing_exists.lock().contains(id) {
            return Err(StorageError::new(ErrorCode::ServiceUnavailable));
        }
        self.inner.blob_exists(namespace, id).await
    }

    async fn delete_blob(&self, namespace: &NamespaceId, id: &BlobId) -> StorageResult<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::new(ErrorCode::OperationTimedOut));
        }
        self.inner.delete_blob(namespace, id).await
    }
}

/// Ref index wrapper whose deletes fail for selected keys.
#[derive(Clone)]
pub struct FlakyRefIndex {
    pub inner: MemoryRefIndex,
    pub failing_deletes: Arc<Mutex<Vec<RefKey>>>,
}

impl FlakyRefIndex {
    pub fn new(inner: MemoryRefIndex) -> Self {
        Self {
            inner,
            failing_deletes: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl RefIndex for FlakyRefIndex {
    async fn namespaces(&self) -> StorageResult<Vec<NamespaceId>> {
        self.inner.namespaces().await
    }

    fn stream_refs(&self) -> BoxStream<'_, StorageResult<RefRecord>> {
        self.inner.stream_refs()
    }

    async fn ref_exists(
        &self,
        namespace: &NamespaceId,
        bucket: &BucketId,
        key: &RefKey,
    ) -> StorageResult<bool> {
        self.inner.ref_exists(namespace, bucket, key).await
    }

    async fn delete_ref(
        &self,
        namespace: &NamespaceId,
        bucket: &BucketId,
        key: &RefKey,
    ) -> StorageResult<bool> {
        if self.failing_deletes.lock().contains(key) {
            return Err(StorageError::new(ErrorCode::ServiceUnavailable));
        }
        self.inner.delete_ref(namespace, bucket, key).await
    }
}

/// Replication log that rejects every append.
pub struct UnavailableReplicationLog;

#[async_trait]
impl ReplicationLog for UnavailableReplicationLog {
    async fn append_delete(
        &self,
        _namespace: &NamespaceId,
        _bucket: &BucketId,
        _key: &RefKey,
        _blob_hint: Option<&BlobId>,
    ) -> StorageResult<()> {
        Err(StorageError::new(ErrorCode::ServiceUnavailable))
    }
}

/// Reference index wrapper that can fail listings or removals.
#[derive(Clone)]
pub struct FlakyReferenceIndex {
    pub inner: MemoryBlobReferenceIndex,
    pub fail_listing: Arc<AtomicBool>,
    pub fail_removal: Arc<AtomicBool>,
}

impl FlakyReferenceIndex {
    pub fn new(inner: MemoryBlobReferenceIndex) -> Self {
        Self {
            inner,
            fail_listing: Arc::new(AtomicBool::new(false)),
            fail_removal: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl BlobReferenceIndex for FlakyReferenceIndex {
    fn references(
        &self,
        namespace: &NamespaceId,
        id: &BlobId,
    ) -> BoxStream<'_, StorageResult<BlobReference>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return stream::once(async {
                Err(StorageError::new(ErrorCode::OperationTimedOut))
            })
            .boxed();
        }
        self.inner.references(namespace, id)
    }

    async fn remove_references(
        &self,
        namespace: &NamespaceId,
        id: &BlobId,
        references: &[BlobReference],
    ) -> StorageResult<()> {
        if self.fail_removal.load(Ordering::SeqCst) {
            return Err(StorageError::new(ErrorCode::ServiceUnavailable));
        }
        self.inner
            .remove_references(namespace, id, references)
            .await
    }
}
