//! Blob reference index: which refs and blobs keep a blob alive.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;

use crate::error::StorageResult;
use crate::models::{BlobId, BlobReference, NamespaceId};

/// Trait for blob reference index operations.
#[async_trait]
pub trait BlobReferenceIndex: Send + Sync {
    /// Lazily enumerates the edges recorded for a blob in a namespace.
    fn references(
        &self,
        namespace: &NamespaceId,
        id: &BlobId,
    ) -> BoxStream<'_, StorageResult<BlobReference>>;

    /// Removes edges that no longer point at anything.
    async fn remove_references(
        &self,
        namespace: &NamespaceId,
        id: &BlobId,
        references: &[BlobReference],
    ) -> StorageResult<()>;
}

/// In-memory implementation of the blob reference index.
#[derive(Clone, Default)]
pub struct MemoryBlobReferenceIndex {
    edges: Arc<DashMap<(NamespaceId, BlobId), Vec<BlobReference>>>,
}

impl MemoryBlobReferenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an edge. Adding the same edge twice is a no-op.
    pub fn add_reference(&self, namespace: &NamespaceId, id: &BlobId, reference: BlobReference) {
        let mut entry = self
            .edges
            .entry((namespace.clone(), id.clone()))
            .or_default();
        if !entry.contains(&reference) {
            entry.push(reference);
        }
    }

    /// Returns a copy of the edges recorded for a blob.
    pub fn get(&self, namespace: &NamespaceId, id: &BlobId) -> Vec<BlobReference> {
        self.edges
            .get(&(namespace.clone(), id.clone()))
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BlobReferenceIndex for MemoryBlobReferenceIndex {
    fn references(
        &self,
        namespace: &NamespaceId,
        id: &BlobId,
    ) -> BoxStream<'_, StorageResult<BlobReference>> {
        let edges = self.get(namespace, id);
        stream::iter(edges.into_iter().map(Ok)).boxed()
    }

    async fn remove_references(
        &self,
        namespace: &NamespaceId,
        id: &BlobId,
        references: &[BlobReference],
    ) -> StorageResult<()> {
        let key = (namespace.clone(), id.clone());
        if let Some(mut entry) = self.edges.get_mut(&key) {
            entry.retain(|r| !references.contains(r));
        }
        self.edges.remove_if(&key, |_, edges| edges.is_empty());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_add_and_remove_references() {
        let index = MemoryBlobReferenceIndex::new();
        let ns = NamespaceId::new("ns");
        let id = BlobId::new("blob");
        let live = BlobReference::to_ref("ns", "b", "live");
        let stale = BlobReference::to_ref("ns", "b", "stale");

        index.add_reference(&ns, &id, live.clone());
        index.add_reference(&ns, &id, stale.clone());
        index.add_reference(&ns, &id, stale.clone());

        let edges: Vec<_> = index.references(&ns, &id).try_collect().await.unwrap();
        assert_eq!(edges.len(), 2);

        index
            .remove_references(&ns, &id, &[stale])
            .await
            .unwrap();
        assert_eq!(index.get(&ns, &id), vec![live.clone()]);

        index.remove_references(&ns, &id, &[live]).await.unwrap();
        assert!(index.get(&ns, &id).is_empty());
    }
}
