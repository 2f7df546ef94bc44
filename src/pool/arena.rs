use log::{info, warn};

use std::{
    collections::HashMap,
    fmt,
    ptr::NonNull,
    result,
    sync::Mutex,
};

use crate::{
    pool::{Brick, Chunk, BRICK_SIZE},
    Result,
};

/// Pool of chunks, leases and takes back whole bricks. Thread safe.
///
/// Chunks are allocated lazily when no chunk has a free brick slot, and
/// freed as soon as their last brick is returned.
pub struct Arena {
    bricks_per_chunk: usize,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    // keyed by the chunk's address, which is what bricks point back to.
    not_full: HashMap<usize, Box<Chunk>>,
    full: HashMap<usize, Box<Chunk>>,
}

impl Drop for Arena {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner,
            Err(err) => err.into_inner(),
        };
        let n_leased: usize = {
            let iter = inner.not_full.values().chain(inner.full.values());
            iter.map(|chunk| chunk.n_leased()).sum()
        };
        if n_leased > 0 {
            warn!(target: "pool", "arena dropped with {} bricks leased", n_leased);
        }
        inner.not_full.clear();
        inner.full.clear();
    }
}

impl Arena {
    /// Create a new arena, chunks shall be allocated with
    /// `bricks_per_chunk` bricks.
    pub fn new(bricks_per_chunk: usize) -> Arena {
        Arena {
            bricks_per_chunk,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Lease a fresh brick carved into `block_size` blocks.
    pub fn lease_brick(&self, block_size: usize) -> Result<NonNull<Brick>> {
        let block_size = Brick::check_block_size(block_size)?;

        let mut inner = err_at!(Fatal, self.inner.lock())?;

        let key = match inner.not_full.keys().next().copied() {
            Some(key) => key,
            None => {
                let chunk = Chunk::new(self.bricks_per_chunk)?;
                let key = chunk.as_ref() as *const Chunk as usize;
                inner.not_full.insert(key, chunk);
                info!(
                    target: "pool",
                    "new chunk of {} bytes, {} chunks in arena",
                    self.bricks_per_chunk * BRICK_SIZE,
                    inner.not_full.len() + inner.full.len()
                );
                key
            }
        };

        let (brick, full) = match inner.not_full.get_mut(&key) {
            Some(chunk) => match chunk.lease_brick(block_size) {
                Some(brick) => (brick, chunk.is_full()),
                None => err_at!(Fatal, msg: "chunk in not-full set is full")?,
            },
            None => unreachable!(),
        };
        if full {
            if let Some(chunk) = inner.not_full.remove(&key) {
                inner.full.insert(key, chunk);
            }
        }

        Ok(brick)
    }

    /// Take back a brick leased from this arena. Chunk that becomes empty
    /// as a result is freed.
    pub fn return_brick(&self, brick: NonNull<Brick>) -> Result<()> {
        let key = unsafe { brick.as_ref() }.to_chunk() as usize;

        let mut inner = err_at!(Fatal, self.inner.lock())?;

        if let Some(chunk) = inner.full.remove(&key) {
            inner.not_full.insert(key, chunk);
        }
        let empty = match inner.not_full.get_mut(&key) {
            Some(chunk) => {
                chunk.return_brick(brick);
                chunk.is_empty()
            }
            None => err_at!(Fatal, msg: "brick returned to foreign arena")?,
        };
        if empty {
            inner.not_full.remove(&key);
            info!(
                target: "pool",
                "freed chunk, {} chunks in arena",
                inner.not_full.len() + inner.full.len()
            );
        }

        Ok(())
    }

    pub fn to_bricks_per_chunk(&self) -> usize {
        self.bricks_per_chunk
    }

    pub fn to_stats(&self) -> Result<Stats> {
        let inner = err_at!(Fatal, self.inner.lock())?;
        let n_bricks: usize = {
            let iter = inner.not_full.values().chain(inner.full.values());
            iter.map(|chunk| chunk.n_leased()).sum()
        };
        Ok(Stats {
            n_full_chunks: inner.full.len(),
            n_not_full_chunks: inner.not_full.len(),
            n_bricks,
        })
    }
}

/// Statistic type, to capture [Arena] metrics.
#[derive(Clone, Default, Debug)]
pub struct Stats {
    /// Chunks with every brick leased.
    pub n_full_chunks: usize,
    /// Chunks with at least one free brick slot.
    pub n_not_full_chunks: usize,
    /// Bricks leased out of this arena.
    pub n_bricks: usize,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(
            f,
            "{{ n_full_chunks = {}, n_not_full_chunks = {}, n_bricks = {} }}",
            self.n_full_chunks, self.n_not_full_chunks, self.n_bricks
        )
    }
}

#[cfg(test)]
#[path = "arena_test.rs"]
mod arena_test;
