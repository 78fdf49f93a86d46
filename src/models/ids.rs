//! Identifier newtypes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Logical cache partition.
    NamespaceId
);
string_id!(
    /// Sub-partition of a namespace.
    BucketId
);
string_id!(
    /// Key of a ref record, unique within a (namespace, bucket).
    RefKey
);
string_id!(
    /// Content hash identifying an immutable blob.
    BlobId
);

/// Name of the reserved namespace used for the service's own bookkeeping.
pub const INTERNAL_NAMESPACE: &str = "__internal";

impl NamespaceId {
    /// The reserved internal namespace. Never subject to ref TTL eviction.
    pub fn internal() -> Self {
        Self::new(INTERNAL_NAMESPACE)
    }

    pub fn is_internal(&self) -> bool {
        self.0 == INTERNAL_NAMESPACE
    }
}

impl BlobId {
    /// Computes the identifier of a payload (lowercase hex SHA-256).
    pub fn from_content(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        Self(format!("{:x}", digest))
    }
}
