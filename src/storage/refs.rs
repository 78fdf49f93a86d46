//! Ref index: the (namespace, bucket, key) -> blob records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;

use super::{paged_stream, LIST_PAGE_SIZE};
use crate::error::StorageResult;
use crate::models::{BucketId, NamespaceId, RefKey, RefRecord};

/// Trait for ref index operations.
#[async_trait]
pub trait RefIndex: Send + Sync {
    /// Returns every namespace that currently holds refs.
    async fn namespaces(&self) -> StorageResult<Vec<NamespaceId>>;

    /// Lazily enumerates every ref record across all namespaces.
    fn stream_refs(&self) -> BoxStream<'_, StorageResult<RefRecord>>;

    async fn ref_exists(
        &self,
        namespace: &NamespaceId,
        bucket: &BucketId,
        key: &RefKey,
    ) -> StorageResult<bool>;

    /// Deletes a ref. Returns false if it was already absent.
    async fn delete_ref(
        &self,
        namespace: &NamespaceId,
        bucket: &BucketId,
        key: &RefKey,
    ) -> StorageResult<bool>;
}

/// Key type for refs, ordered so listings can resume from a marker.
type RefMapKey = (NamespaceId, BucketId, RefKey);

/// In-memory implementation of the ref index.
#[derive(Clone, Default)]
pub struct MemoryRefIndex {
    refs: Arc<RwLock<BTreeMap<RefMapKey, RefRecord>>>,
}

impl MemoryRefIndex {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn ref_key(namespace: &NamespaceId, bucket: &BucketId, key: &RefKey) -> RefMapKey {
        (namespace.clone(), bucket.clone(), key.clone())
    }

    /// Inserts or replaces a ref record.
    pub fn insert(&self, record: RefRecord) {
        let key = Self::ref_key(&record.namespace, &record.bucket, &record.key);
        self.refs.write().insert(key, record);
    }

    /// Bumps the last access time of a ref, as a cache read would.
    pub fn touch(
        &self,
        namespace: &NamespaceId,
        bucket: &BucketId,
        key: &RefKey,
        at: DateTime<Utc>,
    ) -> bool {
        match self
            .refs
            .write()
            .get_mut(&Self::ref_key(namespace, bucket, key))
        {
            Some(record) => {
                record.last_access = at;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, namespace: &NamespaceId, bucket: &BucketId, key: &RefKey) -> Option<RefRecord> {
        self.refs
            .read()
            .get(&Self::ref_key(namespace, bucket, key))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.refs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.read().is_empty()
    }
}

#[async_trait]
impl RefIndex for MemoryRefIndex {
    async fn namespaces(&self) -> StorageResult<Vec<NamespaceId>> {
        let namespaces: BTreeSet<NamespaceId> = self
            .refs
            .read()
            .keys()
            .map(|(namespace, _, _)| namespace.clone())
            .collect();
        Ok(namespaces.into_iter().collect())
    }

    fn stream_refs(&self) -> BoxStream<'_, StorageResult<RefRecord>> {
        let refs = self.refs.clone();
        paged_stream(move |marker: Option<&RefMapKey>| {
            let start = match marker {
                Some(m) => Bound::Excluded(m.clone()),
                None => Bound::Unbounded,
            };
            refs.read()
                .range((start, Bound::Unbounded))
                .take(LIST_PAGE_SIZE)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
    }

    async fn ref_exists(
        &self,
        namespace: &NamespaceId,
        bucket: &BucketId,
        key: &RefKey,
    ) -> StorageResult<bool> {
        Ok(self
            .refs
            .read()
            .contains_key(&Self::ref_key(namespace, bucket, key)))
    }

    async fn delete_ref(
        &self,
        namespace: &NamespaceId,
        bucket: &BucketId,
        key: &RefKey,
    ) -> StorageResult<bool> {
        Ok(self
            .refs
            .write()
            .remove(&Self::ref_key(namespace, bucket, key))
            .is_some())
    }
}
