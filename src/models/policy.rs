//! Namespace policy models.

use serde::{Deserialize, Serialize};

/// How a namespace takes part in ref eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum GcMethod {
    /// Excluded from eviction.
    #[default]
    Disabled,
    /// Refs are evicted once their last access is older than the TTL.
    LastAccess,
    /// Legacy mode; always eligible for the same eviction.
    Always,
}

impl GcMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            GcMethod::Disabled => "Disabled",
            GcMethod::LastAccess => "LastAccess",
            GcMethod::Always => "Always",
        }
    }
}

/// Label of the physical blob storage a namespace writes to.
///
/// The empty label is the implicit default pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct StoragePool(String);

impl StoragePool {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn default_pool() -> Self {
        Self(String::new())
    }

    pub fn is_default(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StoragePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_default() {
            f.write_str("<default>")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Per-namespace GC configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NamespacePolicy {
    /// Unset behaves like [`GcMethod::Disabled`].
    #[serde(default)]
    pub gc_method: Option<GcMethod>,
    #[serde(default)]
    pub storage_pool: StoragePool,
}

impl NamespacePolicy {
    pub fn new(gc_method: GcMethod) -> Self {
        Self {
            gc_method: Some(gc_method),
            storage_pool: StoragePool::default_pool(),
        }
    }

    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.storage_pool = StoragePool::new(pool);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_json() {
        let policy: NamespacePolicy =
            serde_json::from_str(r#"{"gcMethod":"LastAccess","storagePool":"shared"}"#).unwrap();
        assert_eq!(policy.gc_method, Some(GcMethod::LastAccess));
        assert_eq!(policy.storage_pool, StoragePool::new("shared"));

        let unset: NamespacePolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(unset.gc_method, None);
        assert!(unset.storage_pool.is_default());
    }
}
