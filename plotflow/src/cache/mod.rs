//! Process-lifetime cache of expensive shared resources.
//!
//! Two tables live behind one [`ResourceCache`]: remote-service handles keyed
//! by [`Tier`](crate::core::Tier), and stage executors keyed by
//! [`StageId`](crate::core::StageId). Both construct lazily and at most once
//! per key, even when many callers ask for the same key concurrently.

mod resource_cache;
mod single_flight;

pub use resource_cache::{CacheStats, HandleFactory, ResourceCache, TableStats};
