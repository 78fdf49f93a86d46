//! Blob store for content-addressed payloads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use super::{paged_stream, LIST_PAGE_SIZE};
use crate::error::StorageResult;
use crate::models::{BlobId, BlobInfo, NamespaceId, StoragePool};
use crate::policy::MemoryPolicyResolver;

/// Trait for blob store operations.
///
/// Namespaces that share a storage pool share their blobs: a blob written
/// through one member is listed, found and deleted through any other.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Lazily enumerates every blob visible to a namespace.
    fn stream_blobs(&self, namespace: &NamespaceId) -> BoxStream<'_, StorageResult<BlobInfo>>;

    async fn blob_exists(&self, namespace: &NamespaceId, id: &BlobId) -> StorageResult<bool>;

    /// Deletes a blob. Returns false if it was already absent.
    async fn delete_blob(&self, namespace: &NamespaceId, id: &BlobId) -> StorageResult<bool>;
}

type BlobMapKey = (StoragePool, BlobId);

/// In-memory implementation of the blob store.
///
/// Blobs are keyed by storage pool. Each namespace is mapped to its pool
/// through the policies on every call, so pool changes apply immediately.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    pools: MemoryPolicyResolver,
    blobs: Arc<RwLock<BTreeMap<BlobMapKey, DateTime<Utc>>>>,
}

impl MemoryBlobStore {
    /// Creates a store where every namespace uses the default pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that maps namespaces to pools with `policies`.
    pub fn with_pools(policies: MemoryPolicyResolver) -> Self {
        Self {
            pools: policies,
            blobs: Arc::default(),
        }
    }

    fn key(&self, namespace: &NamespaceId, id: &BlobId) -> BlobMapKey {
        (self.pools.pool_of(namespace), id.clone())
    }

    /// Stores a payload and returns its content hash.
    pub fn put(&self, namespace: &NamespaceId, data: impl AsRef<[u8]>) -> BlobId {
        self.put_at(namespace, data, Utc::now())
    }

    /// Stores a payload with an explicit modification time.
    pub fn put_at(
        &self,
        namespace: &NamespaceId,
        data: impl AsRef<[u8]>,
        at: DateTime<Utc>,
    ) -> BlobId {
        let id = BlobId::from_content(data.as_ref());
        self.insert(namespace, id.clone(), at);
        id
    }

    /// Registers a blob under a known id.
    pub fn insert(&self, namespace: &NamespaceId, id: BlobId, at: DateTime<Utc>) {
        let key = self.key(namespace, &id);
        self.blobs.write().insert(key, at);
    }

    pub fn contains(&self, namespace: &NamespaceId, id: &BlobId) -> bool {
        self.blobs.read().contains_key(&self.key(namespace, id))
    }

    /// Number of blobs across all pools.
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn stream_blobs(&self, namespace: &NamespaceId) -> BoxStream<'_, StorageResult<BlobInfo>> {
        let blobs = self.blobs.clone();
        let pool = self.pools.pool_of(namespace);
        paged_stream(move |marker: Option<&BlobMapKey>| {
            let start = match marker {
                Some(m) => Bound::Excluded(m.clone()),
                None => Bound::Included((pool.clone(), BlobId::new(""))),
            };
            blobs
                .read()
                .range((start, Bound::Unbounded))
                .take_while(|((p, _), _)| *p == pool)
                .take(LIST_PAGE_SIZE)
                .map(|(k, last_modified)| {
                    (
                        k.clone(),
                        BlobInfo {
                            id: k.1.clone(),
                            last_modified: *last_modified,
                        },
                    )
                })
                .collect()
        })
    }

    async fn blob_exists(&self, namespace: &NamespaceId, id: &BlobId) -> StorageResult<bool> {
        Ok(self.contains(namespace, id))
    }

    async fn delete_blob(&self, namespace: &NamespaceId, id: &BlobId) -> StorageResult<bool> {
        let key = self.key(namespace, id);
        Ok(self.blobs.write().remove(&key).is_some())
    }
}
