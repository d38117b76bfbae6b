//! In-memory tier of the process-memory hierarchy.
//!
//! A byte-budgeted, TTL-swept map keyed by process id. Eviction is
//! two-stage: a live buffer is first spilled to disk through the injected
//! [`SpillTarget`] and the entry becomes file-backed (weighing nothing
//! against the budget); a file-backed entry evicted a second time is
//! dropped outright, leaving the file for the checkpoint index to find.

mod memory_cache;
mod ttl;

pub use memory_cache::{CacheUsage, MemoryCache, SpillTarget};
pub use ttl::{long_sleep, spawn_ttl_sweeper};
