//! Module implement the document revision cache.
//!
//! Document snapshots are serialized as [Record]s and appended into
//! [RevisionChunk]s. Each collection owns a [RevisionsCache] that maps a
//! revision-id either to a write-ahead-log position or to an offset inside
//! a chunk. Chunks come from a process wide [ChunkAllocator], shared by
//! all collections, that recycles them under a memory budget.
//!
//! A chunk's life-cycle:
//!
//! ```text
//! ordered -> writable -> sealed -> invalidated -> drained -> returned
//! ```
//!
//! Invalidation bumps the chunk's version, entries still pointing to the
//! old version become stale and are resolved from the storage engine on
//! next read. A chunk is returned to the allocator only after all leases
//! taken on it before invalidation are released.

mod allocator;
mod cache;
mod chunk;
mod config;
mod record;

pub use allocator::{ChunkAllocator, Stats as AllocatorStats};
pub use cache::{Position, Resolver, RevisionsCache, Stats as CacheStats};
pub use chunk::{ChunkLease, RevisionChunk};
pub use config::{
    Config, TomlConfig, CHUNK_SIZE, COMPACT_RATIO, FREELIST_LIMIT, MAX_CHUNK_SIZE,
    MIN_CHUNK_SIZE, MIN_TARGET_SIZE, TARGET_SIZE,
};
pub use record::Record;
