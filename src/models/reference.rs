//! Edges of the reachability graph.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{BlobId, BucketId, NamespaceId, RefKey};

/// Something that keeps a blob alive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BlobReference {
    /// The blob is named by a ref record.
    Ref {
        namespace: NamespaceId,
        bucket: BucketId,
        key: RefKey,
    },
    /// The blob is part of (or derived from) another blob.
    Blob {
        namespace: NamespaceId,
        blob: BlobId,
    },
}

impl BlobReference {
    pub fn to_ref(
        namespace: impl Into<NamespaceId>,
        bucket: impl Into<BucketId>,
        key: impl Into<RefKey>,
    ) -> Self {
        BlobReference::Ref {
            namespace: namespace.into(),
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn to_blob(namespace: impl Into<NamespaceId>, blob: BlobId) -> Self {
        BlobReference::Blob {
            namespace: namespace.into(),
            blob,
        }
    }
}

impl fmt::Display for BlobReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobReference::Ref {
                namespace,
                bucket,
                key,
            } => write!(f, "ref:{}/{}/{}", namespace, bucket, key),
            BlobReference::Blob { namespace, blob } => write!(f, "blob:{}/{}", namespace, blob),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_tagged_json() {
        let edge = BlobReference::to_ref("ns", "bucket", "key");
        let json = serde_json::to_value(&edge).unwrap();
        assert_eq!(json["kind"], "ref");
        assert_eq!(json["namespace"], "ns");

        let edge = BlobReference::to_blob("ns", BlobId::new("abc"));
        assert_eq!(edge.to_string(), "blob:ns/abc");
    }
}
