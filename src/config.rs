//! GC configuration.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Default ref TTL: refs not read for this long are evicted.
pub const DEFAULT_REF_TTL: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Default interval between ref cleanup passes.
pub const DEFAULT_REF_POLL_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default interval between blob cleanup passes.
pub const DEFAULT_BLOB_POLL_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default bound on concurrent store operations within one run.
pub const DEFAULT_MAX_PARALLEL_OPERATIONS: usize = 8;

/// Command-line arguments for the GC service.
#[derive(Parser, Debug, Clone)]
#[command(name = "cas-gc")]
#[command(about = "Garbage collection engine for a content-addressable cache")]
#[command(version)]
pub struct Args {
    /// JSON file with namespace policies keyed by namespace.
    #[arg(long, short = 'p')]
    pub policies: Option<PathBuf>,

    /// Disable ref TTL eviction.
    #[arg(long)]
    pub disable_ref_cleanup: bool,

    /// Disable orphan blob collection.
    #[arg(long)]
    pub disable_blob_cleanup: bool,

    /// Seconds between ref cleanup passes.
    #[arg(long, default_value_t = DEFAULT_REF_POLL_INTERVAL.as_secs())]
    pub ref_poll_interval_secs: u64,

    /// Seconds between blob cleanup passes.
    #[arg(long, default_value_t = DEFAULT_BLOB_POLL_INTERVAL.as_secs())]
    pub blob_poll_interval_secs: u64,

    /// Refs not accessed for this many seconds are evicted.
    #[arg(long, default_value_t = DEFAULT_REF_TTL.as_secs())]
    pub ref_ttl_secs: u64,

    /// Maximum concurrent operations during ref cleanup.
    #[arg(long, default_value_t = DEFAULT_MAX_PARALLEL_OPERATIONS)]
    pub max_parallel_ref_operations: usize,

    /// Maximum concurrent operations during blob cleanup.
    #[arg(long, default_value_t = DEFAULT_MAX_PARALLEL_OPERATIONS)]
    pub max_parallel_blob_operations: usize,

    /// Do not write ref deletions to the replication log.
    #[arg(long)]
    pub no_replication_events: bool,

    /// Start polling immediately instead of at a random offset.
    #[arg(long)]
    pub no_randomize_start: bool,

    /// Run as a follower (destructive cleanup only runs on the leader).
    #[arg(long)]
    pub follower: bool,

    /// Enable debug logging.
    #[arg(long, short = 'd')]
    pub debug: bool,

    /// Enable silent mode (minimal logging).
    #[arg(long, short = 's')]
    pub silent: bool,
}

/// GC settings. Run parameters are read at the start of every tick, so
/// updates through [`SettingsHandle`] apply to the next run. Poll interval
/// changes also cut a pending wait short.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcSettings {
    /// Whether ref TTL eviction runs.
    pub ref_cleanup_enabled: bool,
    /// Whether the blob cleanup units run.
    pub blob_cleanup_enabled: bool,
    pub ref_poll_interval: Duration,
    pub blob_poll_interval: Duration,
    /// Minimum time since last access before a ref is evicted.
    pub ref_ttl: Duration,
    pub max_parallel_ref_operations: usize,
    pub max_parallel_blob_operations: usize,
    /// Append a delete event to the replication log for every evicted ref.
    pub write_delete_to_replication_log: bool,
    /// Delay the first tick by a random fraction of the interval.
    pub randomize_start: bool,
}

impl Default for GcSettings {
    fn default() -> Self {
        Self {
            ref_cleanup_enabled: true,
            blob_cleanup_enabled: true,
            ref_poll_interval: DEFAULT_REF_POLL_INTERVAL,
            blob_poll_interval: DEFAULT_BLOB_POLL_INTERVAL,
            ref_ttl: DEFAULT_REF_TTL,
            max_parallel_ref_operations: DEFAULT_MAX_PARALLEL_OPERATIONS,
            max_parallel_blob_operations: DEFAULT_MAX_PARALLEL_OPERATIONS,
            write_delete_to_replication_log: true,
            randomize_start: true,
        }
    }
}

impl From<&Args> for GcSettings {
    fn from(args: &Args) -> Self {
        Self {
            ref_cleanup_enabled: !args.disable_ref_cleanup,
            blob_cleanup_enabled: !args.disable_blob_cleanup,
            ref_poll_interval: Duration::from_secs(args.ref_poll_interval_secs.max(1)),
            blob_poll_interval: Duration::from_secs(args.blob_poll_interval_secs.max(1)),
            ref_ttl: Duration::from_secs(args.ref_ttl_secs),
            max_parallel_ref_operations: args.max_parallel_ref_operations.max(1),
            max_parallel_blob_operations: args.max_parallel_blob_operations.max(1),
            write_delete_to_replication_log: !args.no_replication_events,
            randomize_start: !args.no_randomize_start,
        }
    }
}

/// Shared, hot-reloadable view of [`GcSettings`].
///
/// Clones share the same settings. Changes are published to subscribers,
/// which lets polling runners pick up a new interval mid-wait.
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    inner: Arc<watch::Sender<GcSettings>>,
}

impl SettingsHandle {
    pub fn new(settings: GcSettings) -> Self {
        let (tx, _) = watch::channel(settings);
        Self { inner: Arc::new(tx) }
    }

    /// Returns a copy of the current settings.
    pub fn get(&self) -> GcSettings {
        self.inner.borrow().clone()
    }

    /// Replaces the settings.
    pub fn replace(&self, settings: GcSettings) {
        self.inner.send_replace(settings);
    }

    /// Applies an in-place change to the settings.
    pub fn update(&self, f: impl FnOnce(&mut GcSettings)) {
        self.inner.send_modify(f);
    }

    /// Returns a receiver notified on every change.
    pub fn subscribe(&self) -> watch::Receiver<GcSettings> {
        self.inner.subscribe()
    }
}

impl Default for SettingsHandle {
    fn default() -> Self {
        Self::new(GcSettings::default())
    }
}
