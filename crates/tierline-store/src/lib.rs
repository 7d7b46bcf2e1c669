//! Cache entry storage, in memory or in SQLite alongside relevance, backend,
//! and dispatch state

mod entry;
mod memory;
mod sqlite;

pub use entry::{CacheEntry, CacheStore, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
