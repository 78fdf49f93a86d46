//! Leadership as consumed by the GC engine.
//!
//! Destructive pool-wide deletes must only run on one instance of a fleet.
//! The election protocol lives elsewhere; the engine only asks whether this
//! process currently holds leadership.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[async_trait]
pub trait LeaderElection: Send + Sync {
    /// Returns true while this process holds cluster leadership.
    async fn is_leader(&self) -> bool;
}

/// Leadership flag set by the host, e.g. from an external election callback.
///
/// Cloning shares the flag.
#[derive(Debug, Clone)]
pub struct StaticLeaderElection {
    leader: Arc<AtomicBool>,
}

impl StaticLeaderElection {
    pub fn new(is_leader: bool) -> Self {
        Self {
            leader: Arc::new(AtomicBool::new(is_leader)),
        }
    }

    pub fn set_leader(&self, is_leader: bool) {
        self.leader.store(is_leader, Ordering::SeqCst);
    }
}

impl Default for StaticLeaderElection {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl LeaderElection for StaticLeaderElection {
    async fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_leadership_is_shared_between_clones() {
        let election = StaticLeaderElection::new(false);
        let handle = election.clone();
        assert!(!election.is_leader().await);
        handle.set_leader(true);
        assert!(election.is_leader().await);
    }
}
