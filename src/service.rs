//! GC service: wires the collectors, schedulers and polling runners together.

use std::sync::Arc;
use tracing::info;

use crate::config::{GcSettings, SettingsHandle};
use crate::gc::{
    BlobCleanup, BlobCleanupScheduler, OrphanBlobCollector, PollInterval, PollingRunner,
    RefCleanupScheduler, RefTtlCollector,
};
use crate::leader::{LeaderElection, StaticLeaderElection};
use crate::metrics::{GcCounters, GcCountersSnapshot};
use crate::policy::{MemoryPolicyResolver, PolicyResolver};
use crate::replication::{MemoryReplicationLog, ReplicationLog};
use crate::storage::{
    BlobReferenceIndex, BlobStore, MemoryBlobReferenceIndex, MemoryBlobStore, MemoryRefIndex,
    RefIndex,
};

/// Running GC engine.
///
/// Owns one polling runner per phase. Settings are shared through a
/// [`SettingsHandle`]; enable flags and run parameters are re-read on every
/// tick.
pub struct GcService {
    settings: SettingsHandle,
    counters: Arc<GcCounters>,
    ref_scheduler: Arc<RefCleanupScheduler>,
    blob_scheduler: Arc<BlobCleanupScheduler>,
    ref_runner: PollingRunner,
    blob_runner: PollingRunner,
}

impl GcService {
    /// Creates a service over in-memory collaborators.
    pub fn new(settings: GcSettings) -> Self {
        GcServiceBuilder::new().settings(settings).build()
    }

    /// Starts both polling runners. Must be called within a tokio runtime.
    pub fn start(&self) {
        info!("starting GC service");
        self.ref_runner.start();
        self.blob_runner.start();
    }

    /// Stops both runners, cancelling in-flight runs and waiting for them.
    pub async fn stop(&self) {
        self.ref_runner.stop().await;
        self.blob_runner.stop().await;
        info!(counters = ?self.counters.snapshot(), "GC service stopped");
    }

    pub fn is_running(&self) -> bool {
        self.ref_runner.is_running() || self.blob_runner.is_running()
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    pub fn counters(&self) -> GcCountersSnapshot {
        self.counters.snapshot()
    }

    pub fn ref_scheduler(&self) -> &Arc<RefCleanupScheduler> {
        &self.ref_scheduler
    }

    pub fn blob_scheduler(&self) -> &Arc<BlobCleanupScheduler> {
        &self.blob_scheduler
    }
}

/// Builder for creating a GC service.
pub struct GcServiceBuilder {
    settings: Option<SettingsHandle>,
    refs: Option<Arc<dyn RefIndex>>,
    blobs: Option<Arc<dyn BlobStore>>,
    references: Option<Arc<dyn BlobReferenceIndex>>,
    policies: Option<Arc<dyn PolicyResolver>>,
    pools: Option<MemoryPolicyResolver>,
    leader: Option<Arc<dyn LeaderElection>>,
    replication: Option<Arc<dyn ReplicationLog>>,
    counters: Option<Arc<GcCounters>>,
    blob_units: Vec<Arc<dyn BlobCleanup>>,
}

impl GcServiceBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            settings: None,
            refs: None,
            blobs: None,
            references: None,
            policies: None,
            pools: None,
            leader: None,
            replication: None,
            counters: None,
            blob_units: Vec::new(),
        }
    }

    /// Sets the settings.
    pub fn settings(mut self, settings: GcSettings) -> Self {
        self.settings = Some(SettingsHandle::new(settings));
        self
    }

    /// Shares an existing settings handle, so the caller can update it live.
    pub fn settings_handle(mut self, settings: SettingsHandle) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Sets the ref index.
    pub fn ref_index(mut self, refs: Arc<dyn RefIndex>) -> Self {
        self.refs = Some(refs);
        self
    }

    /// Sets the blob store.
    pub fn blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Sets the blob reference index.
    pub fn references(mut self, references: Arc<dyn BlobReferenceIndex>) -> Self {
        self.references = Some(references);
        self
    }

    /// Sets the namespace policy resolver.
    ///
    /// Pair a custom resolver with a custom blob store: the default
    /// in-memory store maps namespaces to pools only through
    /// [`GcServiceBuilder::memory_policies`].
    pub fn policies(mut self, policies: Arc<dyn PolicyResolver>) -> Self {
        self.policies = Some(policies);
        self
    }

    /// Sets an in-memory policy resolver, also used by the default blob
    /// store to map namespaces to storage pools.
    pub fn memory_policies(mut self, policies: MemoryPolicyResolver) -> Self {
        self.policies = Some(Arc::new(policies.clone()));
        self.pools = Some(policies);
        self
    }

    /// Sets the leader election source.
    pub fn leader(mut self, leader: Arc<dyn LeaderElection>) -> Self {
        self.leader = Some(leader);
        self
    }

    /// Sets the replication log.
    pub fn replication(mut self, replication: Arc<dyn ReplicationLog>) -> Self {
        self.replication = Some(replication);
        self
    }

    /// Sets the counters the collectors report to.
    pub fn counters(mut self, counters: Arc<GcCounters>) -> Self {
        self.counters = Some(counters);
        self
    }

    /// Registers an additional blob cleanup unit, run after orphan collection.
    pub fn blob_unit(mut self, unit: Arc<dyn BlobCleanup>) -> Self {
        self.blob_units.push(unit);
        self
    }

    /// Builds the service.
    pub fn build(self) -> GcService {
        let settings = self.settings.unwrap_or_default();
        let refs = self
            .refs
            .unwrap_or_else(|| Arc::new(MemoryRefIndex::new()));
        let pools = self.pools.unwrap_or_default();
        let blobs = self
            .blobs
            .unwrap_or_else(|| Arc::new(MemoryBlobStore::with_pools(pools.clone())));
        let references = self
            .references
            .unwrap_or_else(|| Arc::new(MemoryBlobReferenceIndex::new()));
        let policies = self.policies.unwrap_or_else(|| Arc::new(pools));
        let leader = self
            .leader
            .unwrap_or_else(|| Arc::new(StaticLeaderElection::default()));
        let replication = self
            .replication
            .unwrap_or_else(|| Arc::new(MemoryReplicationLog::new()));
        let counters = self.counters.unwrap_or_default();

        let ref_collector = Arc::new(RefTtlCollector::new(
            refs.clone(),
            policies.clone(),
            replication,
            settings.clone(),
            counters.clone(),
        ));
        let ref_scheduler = Arc::new(RefCleanupScheduler::new(
            ref_collector,
            leader.clone(),
            settings.clone(),
        ));

        let orphan_collector = Arc::new(OrphanBlobCollector::new(
            blobs,
            references,
            refs,
            policies,
            leader,
            settings.clone(),
            counters.clone(),
        ));
        let mut blob_scheduler =
            BlobCleanupScheduler::new(settings.clone()).with_unit(orphan_collector);
        for unit in self.blob_units {
            blob_scheduler.register(unit);
        }
        let blob_scheduler = Arc::new(blob_scheduler);

        let randomize_start = settings.get().randomize_start;
        let ref_runner = PollingRunner::new(
            "ref-cleanup",
            PollInterval::Settings {
                settings: settings.clone(),
                pick: |s: &GcSettings| s.ref_poll_interval,
            },
            ref_scheduler.clone(),
        )
        .with_randomized_start(randomize_start);
        let blob_runner = PollingRunner::new(
            "blob-cleanup",
            PollInterval::Settings {
                settings: settings.clone(),
                pick: |s: &GcSettings| s.blob_poll_interval,
            },
            blob_scheduler.clone(),
        )
        .with_randomized_start(randomize_start);

        GcService {
            settings,
            counters,
            ref_scheduler,
            blob_scheduler,
            ref_runner,
            blob_runner,
        }
    }
}

impl Default for GcServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
