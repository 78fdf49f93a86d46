//! Tick scheduling for the ref and blob cleanup phases.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{BlobCleanup, CancellationToken, PollingTask, RefCleanup};
use crate::config::SettingsHandle;
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::leader::LeaderElection;

/// What a single scheduler tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick of the same scheduler was still in progress.
    AlreadyRunning,
    /// This process is not the leader.
    NotLeader,
    Completed { deleted: u64 },
    Failed,
}

/// Clears the polling flag when dropped, including when the tick future is
/// dropped mid-flight.
struct PollingGuard<'a>(&'a AtomicBool);

impl<'a> PollingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for PollingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Schedules ref eviction runs.
///
/// At most one run exists at a time. A run outlives the tick that started
/// it: if that tick is abandoned, the next tick waits for the run in flight
/// instead of starting another.
pub struct RefCleanupScheduler {
    collector: Arc<dyn RefCleanup>,
    leader: Arc<dyn LeaderElection>,
    settings: SettingsHandle,
    polling: AtomicBool,
    current: Mutex<Option<JoinHandle<StorageResult<u64>>>>,
}

impl RefCleanupScheduler {
    pub fn new(
        collector: Arc<dyn RefCleanup>,
        leader: Arc<dyn LeaderElection>,
        settings: SettingsHandle,
    ) -> Self {
        Self {
            collector,
            leader,
            settings,
            polling: AtomicBool::new(false),
            current: Mutex::new(None),
        }
    }

    /// Whether a tick is currently in progress.
    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::Acquire)
    }

    /// Runs one scheduling step.
    pub async fn tick(&self, cancel: CancellationToken) -> TickOutcome {
        let Some(_guard) = PollingGuard::acquire(&self.polling) else {
            debug!("ref cleanup already in progress, skipping tick");
            return TickOutcome::AlreadyRunning;
        };

        if !self.leader.is_leader().await {
            debug!("not the leader, skipping ref cleanup");
            return TickOutcome::NotLeader;
        }

        let mut current = self.current.lock().await;
        if current.as_ref().is_some_and(|h| !h.is_finished()) {
            info!("waiting for the previous ref cleanup run to finish");
        }
        let handle = current.get_or_insert_with(|| {
            let collector = self.collector.clone();
            tokio::spawn(async move { collector.cleanup(cancel).await })
        });

        let result = handle.await;
        *current = None;

        match result {
            Ok(Ok(deleted)) => {
                info!(deleted, "ref cleanup run finished");
                TickOutcome::Completed { deleted }
            }
            Ok(Err(e)) => {
                error!(error = %e, "ref cleanup run failed");
                TickOutcome::Failed
            }
            Err(e) => {
                error!(error = %e, "ref cleanup run panicked");
                TickOutcome::Failed
            }
        }
    }
}

#[async_trait]
impl PollingTask for RefCleanupScheduler {
    async fn should_run(&self) -> bool {
        self.settings.get().ref_cleanup_enabled
    }

    async fn poll(&self, cancel: CancellationToken) -> StorageResult<()> {
        match self.tick(cancel).await {
            TickOutcome::Failed => Err(StorageError::with_message(
                ErrorCode::InternalError,
                "ref cleanup run failed",
            )),
            _ => Ok(()),
        }
    }
}

/// Runs every registered blob cleanup unit in turn.
///
/// A failing unit is logged and does not keep the others from running.
pub struct BlobCleanupScheduler {
    units: Vec<Arc<dyn BlobCleanup>>,
    settings: SettingsHandle,
    polling: AtomicBool,
}

impl BlobCleanupScheduler {
    pub fn new(settings: SettingsHandle) -> Self {
        Self {
            units: Vec::new(),
            settings,
            polling: AtomicBool::new(false),
        }
    }

    pub fn with_unit(mut self, unit: Arc<dyn BlobCleanup>) -> Self {
        self.register(unit);
        self
    }

    pub fn register(&mut self, unit: Arc<dyn BlobCleanup>) {
        self.units.push(unit);
    }

    pub fn units(&self) -> usize {
        self.units.len()
    }

    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::Acquire)
    }

    /// Runs one scheduling step over all units.
    pub async fn tick(&self, cancel: CancellationToken) -> TickOutcome {
        let Some(_guard) = PollingGuard::acquire(&self.polling) else {
            debug!("blob cleanup already in progress, skipping tick");
            return TickOutcome::AlreadyRunning;
        };

        let mut deleted = 0;
        let mut ran = 0;
        for unit in &self.units {
            if cancel.is_cancelled() {
                break;
            }
            if !unit.should_run().await {
                debug!(unit = unit.name(), "blob cleanup unit not runnable, skipping");
                continue;
            }
            ran += 1;
            match unit.cleanup(cancel.clone()).await {
                Ok(count) => {
                    info!(unit = unit.name(), deleted = count, "blob cleanup unit finished");
                    deleted += count;
                }
                Err(e) => {
                    warn!(unit = unit.name(), error = %e, "blob cleanup unit failed");
                }
            }
        }

        info!(units = ran, deleted, "blob cleanup tick finished");
        TickOutcome::Completed { deleted }
    }
}

#[async_trait]
impl PollingTask for BlobCleanupScheduler {
    async fn should_run(&self) -> bool {
        self.settings.get().blob_cleanup_enabled
    }

    async fn poll(&self, cancel: CancellationToken) -> StorageResult<()> {
        self.tick(cancel).await;
        Ok(())
    }
}
