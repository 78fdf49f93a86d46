//! Data model for the cache's reference graph.

mod ids;
mod policy;
mod record;
mod reference;

pub use ids::*;
pub use policy::*;
pub use record::*;
pub use reference::*;
