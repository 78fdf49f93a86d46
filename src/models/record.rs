//! Records enumerated from the ref index and the blob store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{BlobId, BucketId, NamespaceId, RefKey};

/// A named pointer from (namespace, bucket, key) to a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefRecord {
    pub namespace: NamespaceId,
    pub bucket: BucketId,
    pub key: RefKey,
    /// Bumped by cache reads; the only mutable field.
    pub last_access: DateTime<Utc>,
    pub blob: BlobId,
}

impl RefRecord {
    pub fn new(
        namespace: impl Into<NamespaceId>,
        bucket: impl Into<BucketId>,
        key: impl Into<RefKey>,
        blob: BlobId,
        last_access: DateTime<Utc>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            bucket: bucket.into(),
            key: key.into(),
            last_access,
            blob,
        }
    }
}

/// A blob as listed by a blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    pub id: BlobId,
    pub last_modified: DateTime<Utc>,
}
