//! Replication log sink for ref deletions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::StorageResult;
use crate::models::{BlobId, BucketId, NamespaceId, RefKey};

/// Append side of the replication log.
#[async_trait]
pub trait ReplicationLog: Send + Sync {
    /// Records that a ref was deleted so other regions can follow.
    async fn append_delete(
        &self,
        namespace: &NamespaceId,
        bucket: &BucketId,
        key: &RefKey,
        blob_hint: Option<&BlobId>,
    ) -> StorageResult<()>;
}

/// A delete event as stored by [`MemoryReplicationLog`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteEvent {
    pub id: Uuid,
    pub namespace: NamespaceId,
    pub bucket: BucketId,
    pub key: RefKey,
    pub blob: Option<BlobId>,
    pub timestamp: DateTime<Utc>,
}

/// In-memory replication log.
#[derive(Clone, Default)]
pub struct MemoryReplicationLog {
    events: Arc<Mutex<Vec<DeleteEvent>>>,
}

impl MemoryReplicationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DeleteEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[async_trait]
impl ReplicationLog for MemoryReplicationLog {
    async fn append_delete(
        &self,
        namespace: &NamespaceId,
        bucket: &BucketId,
        key: &RefKey,
        blob_hint: Option<&BlobId>,
    ) -> StorageResult<()> {
        self.events.lock().push(DeleteEvent {
            id: Uuid::new_v4(),
            namespace: namespace.clone(),
            bucket: bucket.clone(),
            key: key.clone(),
            blob: blob_hint.cloned(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}
