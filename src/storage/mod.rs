//! Storage backends: the shared cache and the record store of record

pub mod cache;
pub mod memory;
pub mod token_revocation;
pub mod traits;

// Re-export main components
pub use cache::{CacheStore, MemoryCache, SharedCacheStore};
pub use memory::MemoryRecordStore;
pub use token_revocation::{RevocationReason, RevocationStore, RevokedToken};
pub use traits::{RecordStore, SharedRecordStore};
