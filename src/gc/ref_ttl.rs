//! Time-to-live eviction of ref records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::CancellationToken;
use crate::config::{GcSettings, SettingsHandle};
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::metrics::{record_run_duration, GcCounters};
use crate::models::{NamespaceId, NamespacePolicy, RefRecord};
use crate::policy::{PolicyResolver, RefEvictionPolicy};
use crate::replication::ReplicationLog;
use crate::storage::RefIndex;

const PHASE: &str = "ref_ttl";

/// A unit that evicts ref records.
#[async_trait]
pub trait RefCleanup: Send + Sync {
    /// Runs one eviction pass and returns the number of refs deleted.
    async fn cleanup(&self, cancel: CancellationToken) -> StorageResult<u64>;
}

/// Summary of one ref eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefCleanupReport {
    /// Refs in eligible namespaces that were checked against the cutoff.
    pub considered: u64,
    pub deleted: u64,
    /// Refs that vanished between enumeration and delete.
    pub already_gone: u64,
    /// Failed reads and deletes, plus deletes whose replication event was lost.
    pub errors: u64,
    pub duration: Duration,
}

enum RefOutcome {
    Skipped,
    Retained,
    Deleted { replicated: bool },
    AlreadyGone,
    ReadFailed,
    DeleteFailed,
}

impl RefCleanupReport {
    fn record(&mut self, outcome: RefOutcome) {
        match outcome {
            RefOutcome::Skipped => {}
            RefOutcome::Retained => self.considered += 1,
            RefOutcome::Deleted { replicated } => {
                self.considered += 1;
                self.deleted += 1;
                if !replicated {
                    self.errors += 1;
                }
            }
            RefOutcome::AlreadyGone => {
                self.considered += 1;
                self.already_gone += 1;
            }
            RefOutcome::ReadFailed => self.errors += 1,
            RefOutcome::DeleteFailed => {
                self.considered += 1;
                self.errors += 1;
            }
        }
    }
}

/// Namespace policies resolved during one pass.
///
/// Unresolvable namespaces are cached as `None` so they are skipped, and
/// warned about, once per pass instead of once per ref.
#[derive(Default)]
struct PolicyCache {
    policies: Mutex<HashMap<NamespaceId, Option<NamespacePolicy>>>,
}

impl PolicyCache {
    async fn resolve(
        &self,
        resolver: &dyn PolicyResolver,
        namespace: &NamespaceId,
    ) -> Option<NamespacePolicy> {
        let cached = self.policies.lock().get(namespace).cloned();
        if let Some(cached) = cached {
            return cached;
        }

        let resolved = match resolver.resolve(namespace).await {
            Ok(policy) => Some(policy),
            Err(e) => {
                warn!(
                    namespace = %namespace,
                    error = %e,
                    "unable to resolve namespace policy, skipping its refs"
                );
                None
            }
        };
        self.policies
            .lock()
            .insert(namespace.clone(), resolved.clone());
        resolved
    }
}

/// Deletes refs whose last access is older than the configured TTL in
/// namespaces whose policy opts into eviction.
pub struct RefTtlCollector {
    refs: Arc<dyn RefIndex>,
    policies: Arc<dyn PolicyResolver>,
    replication: Arc<dyn ReplicationLog>,
    settings: SettingsHandle,
    counters: Arc<GcCounters>,
}

impl RefTtlCollector {
    pub fn new(
        refs: Arc<dyn RefIndex>,
        policies: Arc<dyn PolicyResolver>,
        replication: Arc<dyn ReplicationLog>,
        settings: SettingsHandle,
        counters: Arc<GcCounters>,
    ) -> Self {
        Self {
            refs,
            policies,
            replication,
            settings,
            counters,
        }
    }

    /// Runs one eviction pass.
    ///
    /// Per-record failures are logged and counted in the report; only an
    /// invalid configuration fails the pass.
    pub async fn cleanup_with_report(
        &self,
        cancel: &CancellationToken,
    ) -> StorageResult<RefCleanupReport> {
        let settings = self.settings.get();
        let ttl = chrono::Duration::from_std(settings.ref_ttl).map_err(|e| {
            StorageError::with_message(
                ErrorCode::InvalidConfiguration,
                format!("Ref TTL out of range: {}", e),
            )
        })?;
        let cutoff = Utc::now() - ttl;
        let start = Instant::now();
        let policies = PolicyCache::default();

        info!(
            cutoff = %cutoff,
            max_parallel = settings.max_parallel_ref_operations,
            "starting ref cleanup"
        );

        let mut report = self
            .refs
            .stream_refs()
            .take_until(cancel.cancelled())
            .map(|item| self.process(item, cutoff, &settings, &policies))
            .buffer_unordered(settings.max_parallel_ref_operations.max(1))
            .fold(RefCleanupReport::default(), |mut report, outcome| async move {
                report.record(outcome);
                report
            })
            .await;

        report.duration = start.elapsed();
        record_run_duration(PHASE, report.duration.as_secs_f64());
        info!(
            considered = report.considered,
            deleted = report.deleted,
            already_gone = report.already_gone,
            errors = report.errors,
            cancelled = cancel.is_cancelled(),
            duration_secs = report.duration.as_secs_f64(),
            "ref cleanup completed"
        );

        Ok(report)
    }

    async fn process(
        &self,
        item: StorageResult<RefRecord>,
        cutoff: DateTime<Utc>,
        settings: &GcSettings,
        policies: &PolicyCache,
    ) -> RefOutcome {
        let record = match item {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "failed to read ref record");
                self.counters.error(PHASE);
                return RefOutcome::ReadFailed;
            }
        };

        if record.namespace.is_internal() {
            return RefOutcome::Skipped;
        }
        let Some(policy) = policies
            .resolve(self.policies.as_ref(), &record.namespace)
            .await
        else {
            return RefOutcome::Skipped;
        };
        if !RefEvictionPolicy::is_eligible(&record.namespace, &policy) {
            return RefOutcome::Skipped;
        }

        self.counters.ref_considered();
        if record.last_access > cutoff {
            return RefOutcome::Retained;
        }

        match self
            .refs
            .delete_ref(&record.namespace, &record.bucket, &record.key)
            .await
        {
            Ok(true) => {}
            Ok(false) => return RefOutcome::AlreadyGone,
            Err(e) if e.is_not_found() => return RefOutcome::AlreadyGone,
            Err(e) => {
                warn!(
                    namespace = %record.namespace,
                    bucket = %record.bucket,
                    key = %record.key,
                    error = %e,
                    "failed to delete ref"
                );
                self.counters.error(PHASE);
                return RefOutcome::DeleteFailed;
            }
        }

        self.counters.ref_deleted();
        debug!(
            namespace = %record.namespace,
            bucket = %record.bucket,
            key = %record.key,
            last_access = %record.last_access,
            "deleted expired ref"
        );

        if !settings.write_delete_to_replication_log {
            return RefOutcome::Deleted { replicated: true };
        }

        // The ref store is the source of truth; a lost event is not rolled back.
        match self
            .replication
            .append_delete(
                &record.namespace,
                &record.bucket,
                &record.key,
                Some(&record.blob),
            )
            .await
        {
            Ok(()) => RefOutcome::Deleted { replicated: true },
            Err(e) => {
                warn!(
                    namespace = %record.namespace,
                    bucket = %record.bucket,
                    key = %record.key,
                    error = %e,
                    "failed to write ref deletion to replication log"
                );
                self.counters.error("replication");
                RefOutcome::Deleted { replicated: false }
            }
        }
    }
}

#[async_trait]
impl RefCleanup for RefTtlCollector {
    async fn cleanup(&self, cancel: CancellationToken) -> StorageResult<u64> {
        Ok(self.cleanup_with_report(&cancel).await?.deleted)
    }
}
