//! The GC engine: ref TTL eviction, orphan blob collection and the
//! schedulers that drive them.

mod cancel;
mod orphan;
mod ref_ttl;
mod runner;
mod scheduler;

pub use cancel::*;
pub use orphan::*;
pub use ref_ttl::*;
pub use runner::*;
pub use scheduler::*;
