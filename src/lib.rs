//! cas-gc: garbage collection for a content-addressable cache.
//!
//! Two independent phases keep the cache bounded:
//!
//! - ref TTL eviction deletes refs that have not been read for longer than
//!   the configured TTL, in namespaces whose policy opts into it;
//! - orphan blob collection deletes blobs that no live ref or blob points
//!   to any more, once per storage pool, on the leader only.
//!
//! # Example
//!
//! ```no_run
//! use cas_gc::{GcServiceBuilder, GcSettings};
//!
//! #[tokio::main]
//! async fn main() {
//!     let service = GcServiceBuilder::new()
//!         .settings(GcSettings::default())
//!         .build();
//!     service.start();
//!     tokio::signal::ctrl_c().await.unwrap();
//!     service.stop().await;
//! }
//! ```

pub mod config;
pub mod error;
pub mod gc;
pub mod leader;
pub mod metrics;
pub mod models;
pub mod policy;
pub mod replication;
pub mod service;
pub mod storage;

// Re-exports for convenience
pub use config::{Args, GcSettings, SettingsHandle};
pub use error::{ErrorCode, StorageError, StorageResult};
pub use gc::{
    BlobCleanup, BlobCleanupScheduler, CancellationToken, OrphanBlobCollector, PollInterval,
    PollingRunner, PollingTask, RefCleanup, RefCleanupScheduler, RefTtlCollector, TickOutcome,
};
pub use leader::{LeaderElection, StaticLeaderElection};
pub use policy::{MemoryPolicyResolver, PolicyResolver, RefEvictionPolicy};
pub use replication::{MemoryReplicationLog, ReplicationLog};
pub use service::{GcService, GcServiceBuilder};
pub use storage::{
    BlobReferenceIndex, BlobStore, MemoryBlobReferenceIndex, MemoryBlobStore, MemoryRefIndex,
    RefIndex,
};
