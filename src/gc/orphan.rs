//! Reachability-based collection of orphaned blobs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::CancellationToken;
use crate::config::SettingsHandle;
use crate::error::StorageResult;
use crate::leader::LeaderElection;
use crate::metrics::{record_run_duration, GcCounters};
use crate::models::{BlobId, BlobInfo, BlobReference, NamespaceId, StoragePool};
use crate::policy::{group_by_pool, PolicyResolver};
use crate::storage::{BlobReferenceIndex, BlobStore, RefIndex};

const PHASE: &str = "orphan_blobs";

/// Blobs younger than this are never collected, whatever their references.
///
/// Uploads write the blob before the ref that names it; this margin keeps
/// an in-flight upload from being collected in between.
pub const ORPHAN_BLOB_MIN_AGE: Duration = Duration::from_secs(60 * 60);

/// A unit run by the blob cleanup scheduler.
#[async_trait]
pub trait BlobCleanup: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Whether this unit may run on this process right now.
    async fn should_run(&self) -> bool;

    /// Runs one pass and returns the number of blobs deleted.
    async fn cleanup(&self, cancel: CancellationToken) -> StorageResult<u64>;
}

/// Summary of one orphan collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobCleanupReport {
    pub pools_scanned: u64,
    /// Blobs past the age cutoff that were checked for reachability.
    pub considered: u64,
    pub deleted: u64,
    pub stale_references_pruned: u64,
    pub errors: u64,
    pub duration: Duration,
}

impl BlobCleanupReport {
    fn merge(&mut self, other: Self) {
        self.pools_scanned += other.pools_scanned;
        self.considered += other.considered;
        self.deleted += other.deleted;
        self.stale_references_pruned += other.stale_references_pruned;
        self.errors += other.errors;
    }

    fn record(&mut self, outcome: BlobOutcome) {
        match outcome {
            BlobOutcome::ReadFailed => self.errors += 1,
            BlobOutcome::Reachable(pruned) => {
                self.considered += 1;
                self.record_pruning(pruned);
            }
            BlobOutcome::Uncertain => {
                self.considered += 1;
                self.errors += 1;
            }
            BlobOutcome::Deleted(pruned) => {
                self.considered += 1;
                self.deleted += 1;
                self.record_pruning(pruned);
            }
            BlobOutcome::DeleteFailed => {
                self.considered += 1;
                self.errors += 1;
            }
        }
    }

    fn record_pruning(&mut self, pruned: PruneTally) {
        self.stale_references_pruned += pruned.pruned;
        self.errors += pruned.failed;
    }
}

/// Stale edges removed for one blob, and removals that failed.
#[derive(Debug, Default, Clone, Copy)]
struct PruneTally {
    pruned: u64,
    failed: u64,
}

impl PruneTally {
    fn add(&mut self, result: StorageResult<u64>) {
        match result {
            Ok(count) => self.pruned += count,
            Err(_) => self.failed += 1,
        }
    }
}

enum BlobOutcome {
    ReadFailed,
    Reachable(PruneTally),
    /// Liveness could not be established either way; the blob is kept.
    Uncertain,
    Deleted(PruneTally),
    DeleteFailed,
}

enum Reachability {
    Reachable(PruneTally),
    Uncertain,
    /// Dangling edges seen per namespace, pruned after the blob is deleted.
    Orphan {
        stale: Vec<(NamespaceId, Vec<BlobReference>)>,
    },
}

/// Deletes blobs that no ref or other blob in their storage pool points to.
///
/// Namespaces sharing a storage pool share physical blobs, so the pool is
/// the unit of reachability: a blob is only deleted when no namespace of
/// the pool keeps it alive, and it is then deleted from all of them.
pub struct OrphanBlobCollector {
    blobs: Arc<dyn BlobStore>,
    references: Arc<dyn BlobReferenceIndex>,
    refs: Arc<dyn RefIndex>,
    policies: Arc<dyn PolicyResolver>,
    leader: Arc<dyn LeaderElection>,
    settings: SettingsHandle,
    counters: Arc<GcCounters>,
}

impl OrphanBlobCollector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        references: Arc<dyn BlobReferenceIndex>,
        refs: Arc<dyn RefIndex>,
        policies: Arc<dyn PolicyResolver>,
        leader: Arc<dyn LeaderElection>,
        settings: SettingsHandle,
        counters: Arc<GcCounters>,
    ) -> Self {
        Self {
            blobs,
            references,
            refs,
            policies,
            leader,
            settings,
            counters,
        }
    }

    /// Runs one collection pass over every storage pool.
    ///
    /// Fails only if the set of namespaces cannot be listed; everything
    /// below that is absorbed per pool and per blob.
    pub async fn cleanup_with_report(
        &self,
        cancel: &CancellationToken,
    ) -> StorageResult<BlobCleanupReport> {
        let start = Instant::now();
        let max_parallel = self.settings.get().max_parallel_blob_operations.max(1);

        let namespaces = self.known_namespaces().await?;
        let mut resolved = Vec::with_capacity(namespaces.len());
        for namespace in namespaces {
            match self.policies.resolve(&namespace).await {
                Ok(policy) => resolved.push((namespace, policy)),
                Err(e) => {
                    warn!(
                        namespace = %namespace,
                        error = %e,
                        "unable to resolve namespace policy, skipping its blobs"
                    );
                }
            }
        }

        let groups = group_by_pool(resolved);
        info!(
            pools = groups.len(),
            max_parallel,
            "starting orphan blob cleanup"
        );

        let mut processed: HashSet<NamespaceId> = HashSet::new();
        let mut report = BlobCleanupReport::default();
        for (pool, members) in groups {
            if cancel.is_cancelled() {
                break;
            }
            if !claim_group(&mut processed, &members) {
                continue;
            }

            let pool_report = self
                .collect_pool(&pool, &members, max_parallel, cancel)
                .await;
            report.merge(pool_report);
        }

        report.duration = start.elapsed();
        record_run_duration(PHASE, report.duration.as_secs_f64());
        info!(
            pools_scanned = report.pools_scanned,
            considered = report.considered,
            deleted = report.deleted,
            stale_references_pruned = report.stale_references_pruned,
            errors = report.errors,
            cancelled = cancel.is_cancelled(),
            duration_secs = report.duration.as_secs_f64(),
            "orphan blob cleanup completed"
        );

        Ok(report)
    }

    /// Namespaces holding refs plus namespaces with a configured policy.
    async fn known_namespaces(&self) -> StorageResult<Vec<NamespaceId>> {
        let mut namespaces: BTreeSet<NamespaceId> =
            self.refs.namespaces().await?.into_iter().collect();
        match self.policies.namespaces().await {
            Ok(configured) => namespaces.extend(configured),
            Err(e) => warn!(error = %e, "unable to list configured namespaces"),
        }
        Ok(namespaces.into_iter().collect())
    }

    async fn collect_pool(
        &self,
        pool: &StoragePool,
        members: &[NamespaceId],
        max_parallel: usize,
        cancel: &CancellationToken,
    ) -> BlobCleanupReport {
        let mut report = BlobCleanupReport::default();
        // Blobs are physically shared within the pool, so one listing covers it.
        let Some(representative) = members.first() else {
            return report;
        };
        let cutoff = Utc::now() - chrono::Duration::seconds(ORPHAN_BLOB_MIN_AGE.as_secs() as i64);

        info!(
            pool = %pool,
            namespaces = members.len(),
            representative = %representative,
            "scanning storage pool"
        );

        let pool_report = self
            .blobs
            .stream_blobs(representative)
            .take_until(cancel.cancelled())
            .filter(move |item| futures::future::ready(!is_too_young(item, cutoff)))
            .map(|item| self.process_blob(item, members))
            .buffer_unordered(max_parallel)
            .fold(BlobCleanupReport::default(), |mut report, outcome| async move {
                report.record(outcome);
                report
            })
            .await;

        report.merge(pool_report);
        report.pools_scanned = 1;
        debug!(
            pool = %pool,
            considered = report.considered,
            deleted = report.deleted,
            "finished storage pool"
        );
        report
    }

    async fn process_blob(
        &self,
        item: StorageResult<BlobInfo>,
        members: &[NamespaceId],
    ) -> BlobOutcome {
        let info = match item {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "failed to read blob listing entry");
                self.counters.error(PHASE);
                return BlobOutcome::ReadFailed;
            }
        };

        self.counters.blob_considered();
        match self.check_reachability(&info.id, members).await {
            Reachability::Reachable(pruned) => BlobOutcome::Reachable(pruned),
            Reachability::Uncertain => BlobOutcome::Uncertain,
            Reachability::Orphan { stale } => self.delete_orphan(&info.id, members, stale).await,
        }
    }

    /// Walks the pool's namespaces until one proves the blob alive.
    ///
    /// Any error while listing or checking an edge counts as proof of life:
    /// keeping an orphan for another cycle is harmless, deleting live data
    /// is not.
    async fn check_reachability(&self, id: &BlobId, members: &[NamespaceId]) -> Reachability {
        let mut stale_by_namespace = Vec::new();

        for namespace in members {
            let mut stale = Vec::new();
            let mut live = false;
            let mut edges = self.references.references(namespace, id);

            while let Some(edge) = edges.next().await {
                let edge = match edge {
                    Ok(edge) => edge,
                    Err(e) => {
                        warn!(
                            namespace = %namespace,
                            blob = %id,
                            error = %e,
                            "failed to list blob references, keeping blob"
                        );
                        self.counters.error(PHASE);
                        return Reachability::Uncertain;
                    }
                };

                match self.edge_is_live(&edge).await {
                    Ok(true) => {
                        live = true;
                        break;
                    }
                    Ok(false) => stale.push(edge),
                    Err(e) => {
                        warn!(
                            namespace = %namespace,
                            blob = %id,
                            reference = %edge,
                            error = %e,
                            "failed to check blob reference, keeping blob"
                        );
                        self.counters.error(PHASE);
                        return Reachability::Uncertain;
                    }
                }
            }

            if live {
                let mut pruned = PruneTally::default();
                pruned.add(self.prune(namespace, id, &stale).await);
                return Reachability::Reachable(pruned);
            }
            if !stale.is_empty() {
                stale_by_namespace.push((namespace.clone(), stale));
            }
        }

        Reachability::Orphan {
            stale: stale_by_namespace,
        }
    }

    async fn edge_is_live(&self, edge: &BlobReference) -> StorageResult<bool> {
        let result = match edge {
            BlobReference::Ref {
                namespace,
                bucket,
                key,
            } => self.refs.ref_exists(namespace, bucket, key).await,
            BlobReference::Blob { namespace, blob } => {
                self.blobs.blob_exists(namespace, blob).await
            }
        };
        match result {
            Err(e) if e.is_not_found() => Ok(false),
            other => other,
        }
    }

    async fn delete_orphan(
        &self,
        id: &BlobId,
        members: &[NamespaceId],
        stale: Vec<(NamespaceId, Vec<BlobReference>)>,
    ) -> BlobOutcome {
        let mut failed = false;
        for namespace in members {
            match self.blobs.delete_blob(namespace, id).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(
                        namespace = %namespace,
                        blob = %id,
                        error = %e,
                        "failed to delete orphaned blob"
                    );
                    self.counters.error(PHASE);
                    failed = true;
                }
            }
        }
        if failed {
            return BlobOutcome::DeleteFailed;
        }

        self.counters.blob_deleted();
        debug!(blob = %id, namespaces = members.len(), "deleted orphaned blob");

        let mut pruned = PruneTally::default();
        for (namespace, edges) in &stale {
            pruned.add(self.prune(namespace, id, edges).await);
        }
        BlobOutcome::Deleted(pruned)
    }

    /// Removes dangling edges from the reference index. A failure is logged
    /// and leaves the edges for a later pass.
    async fn prune(
        &self,
        namespace: &NamespaceId,
        id: &BlobId,
        stale: &[BlobReference],
    ) -> StorageResult<u64> {
        if stale.is_empty() {
            return Ok(0);
        }
        match self.references.remove_references(namespace, id, stale).await {
            Ok(()) => {
                let count = stale.len() as u64;
                self.counters.stale_references_pruned(count);
                debug!(namespace = %namespace, blob = %id, count, "pruned stale blob references");
                Ok(count)
            }
            Err(e) => {
                warn!(
                    namespace = %namespace,
                    blob = %id,
                    error = %e,
                    "failed to prune stale blob references"
                );
                self.counters.error(PHASE);
                Err(e)
            }
        }
    }
}

/// Marks a pool group as processed. Returns false, leaving `processed`
/// untouched, if any member was already covered by an earlier group.
fn claim_group(processed: &mut HashSet<NamespaceId>, members: &[NamespaceId]) -> bool {
    if members.iter().any(|ns| processed.contains(ns)) {
        return false;
    }
    processed.extend(members.iter().cloned());
    true
}

fn is_too_young(item: &StorageResult<BlobInfo>, cutoff: DateTime<Utc>) -> bool {
    matches!(item, Ok(info) if info.last_modified > cutoff)
}

#[async_trait]
impl BlobCleanup for OrphanBlobCollector {
    fn name(&self) -> &'static str {
        "orphan_blobs"
    }

    async fn should_run(&self) -> bool {
        self.leader.is_leader().await
    }

    async fn cleanup(&self, cancel: CancellationToken) -> StorageResult<u64> {
        Ok(self.cleanup_with_report(&cancel).await?.deleted)
    }
}
