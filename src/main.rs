//! cas-gc: garbage collection service for a content-addressable cache.
//!
//! Runs ref TTL eviction and orphan blob collection until interrupted.

use clap::Parser;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use cas_gc::metrics::register_metrics;
use cas_gc::{Args, GcServiceBuilder, GcSettings, MemoryPolicyResolver, StaticLeaderElection};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Parse command-line arguments
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug {
        Level::DEBUG
    } else if args.silent {
        Level::ERROR
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    register_metrics();

    let settings = GcSettings::from(&args);
    let policies = match &args.policies {
        Some(path) => MemoryPolicyResolver::from_json_file(path)?,
        None => MemoryPolicyResolver::new(),
    };
    let leader = StaticLeaderElection::new(!args.follower);

    info!(
        ref_cleanup = settings.ref_cleanup_enabled,
        blob_cleanup = settings.blob_cleanup_enabled,
        ref_ttl_secs = settings.ref_ttl.as_secs(),
        leader = !args.follower,
        "GC configuration loaded"
    );

    let service = GcServiceBuilder::new()
        .settings(settings)
        .memory_policies(policies)
        .leader(Arc::new(leader))
        .build();

    service.start();
    println!("cas-gc is running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    service.stop().await;

    Ok(())
}
