//! Tenant-scoped cache coherence layer (spec component B).

pub mod cache;
pub mod entry;
pub mod flight;
pub mod keys;
pub mod ttl;

pub use cache::Cache;
pub use entry::{classify, CacheState, ConsistencyMode, EntryMeta, StoredEntry};
pub use keys::{entity_key, index_key, query_key};
