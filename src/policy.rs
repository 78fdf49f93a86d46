//! Namespace policy resolution and the ref eviction decision.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::{GcMethod, NamespaceId, NamespacePolicy, StoragePool};

/// Source of per-namespace GC policy.
#[async_trait]
pub trait PolicyResolver: Send + Sync {
    /// Resolves the policy of a namespace.
    ///
    /// Fails with [`ErrorCode::NamespaceNotFound`] for unknown namespaces.
    async fn resolve(&self, namespace: &NamespaceId) -> StorageResult<NamespacePolicy>;

    /// Returns every namespace the resolver has a policy for.
    async fn namespaces(&self) -> StorageResult<Vec<NamespaceId>>;
}

/// Decides whether a namespace takes part in ref TTL eviction.
pub struct RefEvictionPolicy;

impl RefEvictionPolicy {
    /// The internal namespace is never eligible; otherwise only
    /// [`GcMethod::LastAccess`] and [`GcMethod::Always`] are.
    pub fn is_eligible(namespace: &NamespaceId, policy: &NamespacePolicy) -> bool {
        if namespace.is_internal() {
            return false;
        }
        matches!(
            policy.gc_method,
            Some(GcMethod::LastAccess) | Some(GcMethod::Always)
        )
    }
}

/// In-memory policy resolver.
#[derive(Clone, Default)]
pub struct MemoryPolicyResolver {
    policies: Arc<DashMap<NamespaceId, NamespacePolicy>>,
}

impl MemoryPolicyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_policies(policies: impl IntoIterator<Item = (NamespaceId, NamespacePolicy)>) -> Self {
        let resolver = Self::new();
        for (namespace, policy) in policies {
            resolver.set(namespace, policy);
        }
        resolver
    }

    /// Loads policies from a JSON object keyed by namespace.
    ///
    /// ```json
    /// { "game-a": { "gcMethod": "LastAccess", "storagePool": "shared" } }
    /// ```
    pub fn from_json_file(path: impl AsRef<Path>) -> StorageResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            StorageError::with_message(
                ErrorCode::InvalidConfiguration,
                format!(
                    "Failed to read policy file {}: {}",
                    path.as_ref().display(),
                    e
                ),
            )
        })?;
        let policies: HashMap<NamespaceId, NamespacePolicy> = serde_json::from_str(&raw)?;
        Ok(Self::from_policies(policies))
    }

    /// Sets or replaces the policy of a namespace.
    pub fn set(&self, namespace: NamespaceId, policy: NamespacePolicy) {
        self.policies.insert(namespace, policy);
    }

    pub fn remove(&self, namespace: &NamespaceId) {
        self.policies.remove(namespace);
    }

    /// Storage pool of a namespace. Unknown namespaces use the default pool.
    pub fn pool_of(&self, namespace: &NamespaceId) -> StoragePool {
        self.policies
            .get(namespace)
            .map(|p| p.storage_pool.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PolicyResolver for MemoryPolicyResolver {
    async fn resolve(&self, namespace: &NamespaceId) -> StorageResult<NamespacePolicy> {
        self.policies
            .get(namespace)
            .map(|p| p.value().clone())
            .ok_or_else(|| {
                StorageError::with_message(
                    ErrorCode::NamespaceNotFound,
                    format!("No policy configured for namespace {}", namespace),
                )
            })
    }

    async fn namespaces(&self) -> StorageResult<Vec<NamespaceId>> {
        let mut namespaces: Vec<NamespaceId> =
            self.policies.iter().map(|e| e.key().clone()).collect();
        namespaces.sort();
        Ok(namespaces)
    }
}

/// Groups namespaces by the storage pool they write blobs to.
///
/// Groups and their members are sorted, so the first member of a group is a
/// stable representative.
pub fn group_by_pool(
    policies: impl IntoIterator<Item = (NamespaceId, NamespacePolicy)>,
) -> Vec<(StoragePool, Vec<NamespaceId>)> {
    let mut groups: HashMap<StoragePool, Vec<NamespaceId>> = HashMap::new();
    for (namespace, policy) in policies {
        groups.entry(policy.storage_pool).or_default().push(namespace);
    }
    let mut groups: Vec<_> = groups
        .into_iter()
        .map(|(pool, mut members)| {
            members.sort();
            members.dedup();
            (pool, members)
        })
        .collect();
    groups.sort_by(|a, b| a.0.cmp(&b.0));
    groups
}
