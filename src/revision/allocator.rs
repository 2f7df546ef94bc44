use log::{debug, info};

use std::{fmt, result, sync::Arc};

use crate::{
    revision::{Config, RevisionChunk},
    util::{self, Spinlock},
    Result,
};

/// Chunks are sized in multiples of this.
const PAGE_SIZE: usize = 4096;

/// Hand out and recycle [RevisionChunk]s for all collections, while
/// trying to hold total chunk memory within `target_size`.
///
/// Allocation of a fresh chunk happens outside the lock.
pub struct ChunkAllocator {
    config: Config,
    inner: Spinlock<Inner>,
}

struct Inner {
    freelist: Vec<Arc<RevisionChunk>>,
    total_allocated: usize,
    n_ordered: usize,
    n_reused: usize,
    n_freed: usize,
}

impl ChunkAllocator {
    /// Create a new chunk allocator. Only structural sanity of `config`
    /// is checked here, refer to [Config::validate] for startup limits.
    pub fn new(config: Config) -> Result<ChunkAllocator> {
        config.check()?;

        let inner = Inner {
            freelist: Vec::with_capacity(config.freelist_limit),
            total_allocated: 0,
            n_ordered: 0,
            n_reused: 0,
            n_freed: 0,
        };
        let val = ChunkAllocator {
            config,
            inner: Spinlock::new(inner),
        };

        Ok(val)
    }

    /// Return a writable chunk with room for at least `size` bytes.
    /// Error out with [OutOfMemory][crate::Error::OutOfMemory] if system
    /// could not give us the memory.
    pub fn order_chunk(&self, size: usize) -> Result<Arc<RevisionChunk>> {
        if let Some(chunk) = self.reuse(size) {
            return Ok(chunk);
        }

        let size = usize::max(self.config.chunk_size, util::align_up(size, PAGE_SIZE));
        let chunk = Arc::new(RevisionChunk::new(size)?);

        let mut inner = self.inner.write();
        inner.n_ordered += 1;
        match Self::pop_freelist(&mut inner, size) {
            Some(reused) => {
                // some other thread returned a chunk in the meantime.
                if inner.freelist.len() < self.config.freelist_limit
                    && (inner.total_allocated + size) <= self.config.target_size
                {
                    inner.total_allocated += size;
                    inner.freelist.push(chunk);
                }
                Ok(reused)
            }
            None => {
                inner.total_allocated += size;
                debug!(
                    target: "revalloc", "new chunk size:{} total:{}", size, inner.total_allocated
                );
                Ok(chunk)
            }
        }
    }

    /// Hand back a chunk. Caller must make sure no lease is held on the
    /// chunk and that it has been invalidated.
    pub fn return_chunk(&self, chunk: Arc<RevisionChunk>) {
        let mut inner = self.inner.write();
        if inner.freelist.len() < self.config.freelist_limit
            && inner.total_allocated <= self.config.target_size
        {
            inner.freelist.push(chunk);
        } else {
            inner.total_allocated = inner.total_allocated.saturating_sub(chunk.size());
            inner.n_freed += 1;
            debug!(
                target: "revalloc", "free chunk size:{} total:{}",
                chunk.size(), inner.total_allocated
            );
        }
    }

    /// Total bytes held in chunks, leased or in freelist.
    pub fn total_allocated(&self) -> usize {
        self.inner.read().total_allocated
    }

    pub fn freelist_len(&self) -> usize {
        self.inner.read().freelist.len()
    }

    pub fn to_config(&self) -> Config {
        self.config.clone()
    }

    pub fn to_stats(&self) -> Stats {
        let inner = self.inner.read();
        Stats {
            chunk_size: self.config.chunk_size,
            target_size: self.config.target_size,
            total_allocated: inner.total_allocated,
            n_freelist: inner.freelist.len(),
            n_ordered: inner.n_ordered,
            n_reused: inner.n_reused,
            n_freed: inner.n_freed,
        }
    }

    fn reuse(&self, size: usize) -> Option<Arc<RevisionChunk>> {
        let mut inner = self.inner.write();
        Self::pop_freelist(&mut inner, size)
    }

    fn pop_freelist(inner: &mut Inner, size: usize) -> Option<Arc<RevisionChunk>> {
        let off = inner.freelist.iter().position(|c| c.size() >= size)?;
        let chunk = inner.freelist.swap_remove(off);
        chunk.reset();
        inner.n_reused += 1;
        Some(chunk)
    }
}

impl Drop for ChunkAllocator {
    fn drop(&mut self) {
        let inner = self.inner.read();
        info!(
            target: "revalloc", "closing allocator, {} chunks {} bytes in freelist",
            inner.freelist.len(),
            inner.freelist.iter().map(|c| c.size()).sum::<usize>()
        );
    }
}

/// Statistic type, for [ChunkAllocator].
#[derive(Clone, Debug)]
pub struct Stats {
    pub chunk_size: usize,
    pub target_size: usize,
    pub total_allocated: usize,
    pub n_freelist: usize,
    pub n_ordered: usize,
    pub n_reused: usize,
    pub n_freed: usize,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(
            f,
            concat!(
                "{{ chunk_size = {}, target_size = {}, total_allocated = {}, ",
                "n_freelist = {}, n_ordered = {}, n_reused = {}, n_freed = {} }}"
            ),
            self.chunk_size,
            self.target_size,
            self.total_allocated,
            self.n_freelist,
            self.n_ordered,
            self.n_reused,
            self.n_freed,
        )
    }
}

#[cfg(test)]
#[path = "allocator_test.rs"]
mod allocator_test;
