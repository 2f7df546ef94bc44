use log::{debug, warn};

use std::{
    collections::HashMap,
    fmt, mem, result,
    sync::{
        atomic::{AtomicUsize, Ordering::SeqCst},
        Arc, Mutex, Weak,
    },
};

use crate::{
    hash::CityHasher,
    revision::{ChunkAllocator, ChunkLease, Config, Record, RevisionChunk},
    util::Spinlock,
    Result,
};

/// Collaborators that own the authoritative copy of a document.
pub trait Resolver {
    /// Read the document body stored at `offset` in write-ahead-log file
    /// `logfile`. Return None if log does not have it.
    fn read_wal(&self, logfile: u64, offset: u64) -> Result<Option<Vec<u8>>>;

    /// Read the document body for `revision` from the storage engine.
    fn read_engine(&self, revision: u64) -> Result<Option<Vec<u8>>>;
}

/// Where a revision's document body can be found.
#[derive(Clone, Debug)]
pub enum Position {
    /// Document is in the write-ahead-log.
    Wal { logfile: u64, offset: u64 },
    /// Document is in a [RevisionChunk], valid as long as the chunk is
    /// still at `version`.
    Chunk {
        chunk: Weak<RevisionChunk>,
        offset: usize,
        version: u32,
    },
}

impl Position {
    pub fn new_chunk(chunk: &Arc<RevisionChunk>, offset: usize, version: u32) -> Position {
        Position::Chunk {
            chunk: Arc::downgrade(chunk),
            offset,
            version,
        }
    }

    /// Chunk positions refer to the same chunk, not an equal one.
    fn is_same(&self, other: &Position) -> bool {
        match (self, other) {
            (Position::Wal { logfile: a, offset: x }, Position::Wal { logfile: b, offset: y }) => {
                a == b && x == y
            }
            (
                Position::Chunk { chunk: a, offset: x, version: u },
                Position::Chunk { chunk: b, offset: y, version: v },
            ) => Weak::ptr_eq(a, b) && x == y && u == v,
            (_, _) => false,
        }
    }

    fn is_in(&self, chunk: &Arc<RevisionChunk>, offset: usize) -> bool {
        match self {
            Position::Chunk { chunk: c, offset: o, version } => {
                Weak::as_ptr(c) == Arc::as_ptr(chunk)
                    && *o == offset
                    && *version == chunk.version()
            }
            Position::Wal { .. } => false,
        }
    }
}

#[derive(Default)]
struct Chunks {
    writable: Option<Arc<RevisionChunk>>,
    sealed: Vec<Arc<RevisionChunk>>,
    draining: Vec<Arc<RevisionChunk>>,
}

/// Per collection map of revision-id to document position.
///
/// Readers snapshot an entry under the map's read lock and lease the chunk
/// after releasing it. An entry whose chunk was invalidated is resolved
/// through [Resolver::read_engine] and cached again, so a revision is never
/// reported missing because its chunk got recycled.
pub struct RevisionsCache<R>
where
    R: Resolver,
{
    name: String,
    config: Config,
    allocator: Arc<ChunkAllocator>,
    resolver: R,

    map: Spinlock<HashMap<u64, Position, CityHasher>>,
    chunks: Mutex<Chunks>,
    // held by compact and invalidate_all while retiring chunks.
    retire: Mutex<()>,

    n_hits: AtomicUsize,
    n_wal_reads: AtomicUsize,
    n_stale: AtomicUsize,
    n_misses: AtomicUsize,
    n_promotes: AtomicUsize,
    n_compacts: AtomicUsize,
}

impl<R> Drop for RevisionsCache<R>
where
    R: Resolver,
{
    fn drop(&mut self) {
        let chunks = match self.chunks.get_mut() {
            Ok(chunks) => mem::take(chunks),
            Err(err) => mem::take(err.into_inner()),
        };
        let Chunks {
            writable,
            sealed,
            draining,
        } = chunks;
        for chunk in writable.into_iter().chain(sealed).chain(draining) {
            chunk.seal();
            chunk.invalidate();
            if Arc::strong_count(&chunk) == 1 && chunk.is_quiescent() {
                self.allocator.return_chunk(chunk)
            } else {
                warn!(target: "revcache", "{} dropping leased chunk {:?}", self.name, chunk);
            }
        }
    }
}

impl<R> RevisionsCache<R>
where
    R: Resolver,
{
    /// Create a cache for collection `name`, chunks are ordered from
    /// `allocator` and misses are resolved via `resolver`.
    pub fn new(name: &str, allocator: Arc<ChunkAllocator>, resolver: R) -> RevisionsCache<R> {
        RevisionsCache {
            name: name.to_string(),
            config: allocator.to_config(),
            allocator,
            resolver,

            map: Spinlock::new(HashMap::with_hasher(CityHasher::new())),
            chunks: Mutex::new(Chunks::default()),
            retire: Mutex::new(()),

            n_hits: AtomicUsize::new(0),
            n_wal_reads: AtomicUsize::new(0),
            n_stale: AtomicUsize::new(0),
            n_misses: AtomicUsize::new(0),
            n_promotes: AtomicUsize::new(0),
            n_compacts: AtomicUsize::new(0),
        }
    }

    /// Map `revision` to a write-ahead-log position, replacing any older
    /// entry.
    pub fn insert_wal(&self, revision: u64, logfile: u64, offset: u64) {
        let pos = Position::Wal { logfile, offset };
        self.map.write().insert(revision, pos);
    }

    /// Map `revision` to `offset` in `chunk` at `version`, replacing any
    /// older entry.
    pub fn insert_chunk(
        &self,
        revision: u64,
        chunk: &Arc<RevisionChunk>,
        offset: usize,
        version: u32,
    ) {
        let pos = Position::new_chunk(chunk, offset, version);
        self.map.write().insert(revision, pos);
    }

    /// Forget `revision`, no-op if it is not there.
    pub fn remove_revision(&self, revision: u64) -> Option<Position> {
        self.map.write().remove(&revision)
    }

    /// Copy `body` into the cache and map `revision` to it. Errors with
    /// [OutOfMemory][crate::Error::OutOfMemory] when no chunk could be had, in
    /// which case caller should keep the write-ahead-log position.
    pub fn store(&self, revision: u64, body: &[u8]) -> Result<()> {
        let (chunk, offset, version) = self.append(revision, body)?;
        self.insert_chunk(revision, &chunk, offset, version);
        Ok(())
    }

    /// Return the current position for `revision`.
    pub fn to_position(&self, revision: u64) -> Option<Position> {
        self.map.read().get(&revision).cloned()
    }

    /// Resolve `revision` to its document body.
    pub fn lookup_revision(&self, revision: u64) -> Result<Option<Vec<u8>>> {
        let pos = match self.to_position(revision) {
            Some(pos) => pos,
            None => {
                self.n_misses.fetch_add(1, SeqCst);
                return Ok(None);
            }
        };

        match &pos {
            Position::Wal { logfile, offset } => {
                self.n_wal_reads.fetch_add(1, SeqCst);
                let body = self.resolver.read_wal(*logfile, *offset)?;
                match &body {
                    Some(body) if self.config.promote_wal_reads => {
                        if self.recache(revision, &pos, body)? {
                            self.n_promotes.fetch_add(1, SeqCst);
                        }
                    }
                    _ => (),
                }
                Ok(body)
            }
            Position::Chunk {
                chunk,
                offset,
                version,
            } => match Self::lease_at(chunk, *offset, *version) {
                Some(lease) => {
                    self.n_hits.fetch_add(1, SeqCst);
                    Ok(Some(lease.to_body()?))
                }
                None => {
                    self.n_stale.fetch_add(1, SeqCst);
                    debug!(target: "revcache", "{} stale entry for {}", self.name, revision);
                    let body = self.resolver.read_engine(revision)?;
                    if let Some(body) = &body {
                        self.recache(revision, &pos, body)?;
                    }
                    Ok(body)
                }
            },
        }
    }

    /// Lease the chunk holding `revision`. Return None if revision is not
    /// cached in a chunk or its chunk has been invalidated.
    pub fn lease(&self, revision: u64) -> Option<ChunkLease> {
        match self.to_position(revision)? {
            Position::Chunk {
                chunk,
                offset,
                version,
            } => Self::lease_at(&chunk, offset, version),
            Position::Wal { .. } => None,
        }
    }

    /// Relocate live records out of sparse sealed chunks, and invalidate
    /// them. Return the number of chunks compacted.
    pub fn compact(&self) -> Result<usize> {
        let _retire = err_at!(Fatal, self.retire.lock())?;

        let sealed: Vec<Arc<RevisionChunk>> = {
            let chunks = err_at!(Fatal, self.chunks.lock())?;
            chunks.sealed.iter().map(Arc::clone).collect()
        };

        let mut n = 0;
        for chunk in sealed.into_iter() {
            // wait for writers that reserved space before seal.
            if chunk.committed() != chunk.write_offset() {
                continue;
            }

            let items = chunk.find_revisions()?;
            let live: Vec<(u64, Position, usize)> = {
                let map = self.map.read();
                items
                    .into_iter()
                    .filter_map(|(revision, offset, len)| match map.get(&revision) {
                        Some(pos) if pos.is_in(&chunk, offset) => {
                            Some((revision, pos.clone(), len))
                        }
                        _ => None,
                    })
                    .collect()
            };
            let live_bytes: usize = live.iter().map(|(_, _, len)| len).sum();
            let ratio = (live_bytes as f64) / (chunk.write_offset() as f64);
            if live_bytes > 0 && ratio >= self.config.compact_ratio {
                continue;
            }

            for (revision, pos, _) in live.iter() {
                let record = match pos {
                    Position::Chunk {
                        offset, version, ..
                    } => match ChunkLease::new(Arc::clone(&chunk), *offset, *version) {
                        Some(lease) => lease.to_record()?,
                        None => continue,
                    },
                    Position::Wal { .. } => continue,
                };
                self.recache(*revision, pos, &record.body)?;
            }

            chunk.invalidate();
            {
                let mut chunks = err_at!(Fatal, self.chunks.lock())?;
                chunks.sealed.retain(|c| !Arc::ptr_eq(c, &chunk));
                chunks.draining.push(Arc::clone(&chunk));
            }
            debug!(
                target: "revcache", "{} compacted chunk live:{} bytes:{}",
                self.name, live.len(), live_bytes
            );
            n += 1;
        }

        self.n_compacts.fetch_add(n, SeqCst);
        self.drain()?;
        Ok(n)
    }

    /// Return invalidated chunks, that are no longer leased nor being
    /// written into, to the allocator. Return the number of chunks
    /// returned.
    pub fn drain(&self) -> Result<usize> {
        let drained: Vec<Arc<RevisionChunk>> = {
            let mut chunks = err_at!(Fatal, self.chunks.lock())?;
            // a writer holds its own reference until the copy lands.
            let (drained, draining): (Vec<_>, Vec<_>) = chunks
                .draining
                .drain(..)
                .partition(|c| Arc::strong_count(c) == 1 && c.is_quiescent());
            chunks.draining = draining;
            drained
        };

        let n = drained.len();
        drained
            .into_iter()
            .for_each(|c| self.allocator.return_chunk(c));
        Ok(n)
    }

    /// Seal and invalidate every chunk held by this cache, entries are
    /// kept and shall be resolved via the storage engine.
    pub fn invalidate_all(&self) -> Result<usize> {
        let _retire = err_at!(Fatal, self.retire.lock())?;
        {
            let mut chunks = err_at!(Fatal, self.chunks.lock())?;
            let mut retired: Vec<Arc<RevisionChunk>> = chunks.sealed.drain(..).collect();
            retired.extend(chunks.writable.take());
            for chunk in retired.into_iter() {
                chunk.seal();
                chunk.invalidate();
                chunks.draining.push(chunk);
            }
        }
        self.drain()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_name(&self) -> String {
        self.name.clone()
    }

    pub fn to_stats(&self) -> Result<Stats> {
        let (n_wal, n_chunk) = {
            let map = self.map.read();
            let n_wal = map
                .values()
                .filter(|p| matches!(p, Position::Wal { .. }))
                .count();
            (n_wal, map.len() - n_wal)
        };
        let (n_sealed, n_draining) = {
            let chunks = err_at!(Fatal, self.chunks.lock())?;
            (chunks.sealed.len(), chunks.draining.len())
        };

        let stats = Stats {
            name: self.name.clone(),
            n_wal,
            n_chunk,
            n_sealed,
            n_draining,
            n_hits: self.n_hits.load(SeqCst),
            n_wal_reads: self.n_wal_reads.load(SeqCst),
            n_stale: self.n_stale.load(SeqCst),
            n_misses: self.n_misses.load(SeqCst),
            n_promotes: self.n_promotes.load(SeqCst),
            n_compacts: self.n_compacts.load(SeqCst),
        };

        Ok(stats)
    }
}

impl<R> RevisionsCache<R>
where
    R: Resolver,
{
    fn lease_at(chunk: &Weak<RevisionChunk>, offset: usize, version: u32) -> Option<ChunkLease> {
        ChunkLease::new(chunk.upgrade()?, offset, version)
    }

    // Copy body into the cache, and point revision at it provided the
    // entry is still `expected`. Running out of memory is not an error
    // here, the entry stays as is.
    fn recache(&self, revision: u64, expected: &Position, body: &[u8]) -> Result<bool> {
        let (chunk, offset, version) = match self.append(revision, body) {
            Ok(res) => res,
            Err(err) if err.is_out_of_memory() => {
                debug!(target: "revcache", "{} recache {}: {}", self.name, revision, err);
                return Ok(false);
            }
            Err(err) => return Err(err),
        };

        let mut map = self.map.write();
        match map.get_mut(&revision) {
            Some(pos) if pos.is_same(expected) => {
                *pos = Position::new_chunk(&chunk, offset, version);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    // Append a record into the writable chunk, retire it and order a new
    // one when it is full.
    fn append(&self, revision: u64, body: &[u8]) -> Result<(Arc<RevisionChunk>, usize, u32)> {
        let data = Record::new(revision, body).encode()?;

        loop {
            let writable = {
                let chunks = err_at!(Fatal, self.chunks.lock())?;
                chunks.writable.as_ref().map(Arc::clone)
            };

            if let Some(chunk) = writable {
                // version is read before the append, an invalidation in
                // between makes the entry stale, never wrong.
                let version = chunk.version();
                if let Some(offset) = chunk.append(&data) {
                    break Ok((chunk, offset, version));
                }

                let mut chunks = err_at!(Fatal, self.chunks.lock())?;
                let retire = match &chunks.writable {
                    Some(c) => Arc::ptr_eq(c, &chunk),
                    None => false,
                };
                if retire {
                    chunk.seal();
                    chunks.writable = None;
                    chunks.sealed.push(chunk);
                }
            }

            let chunk = self.allocator.order_chunk(data.len())?;
            let mut chunks = err_at!(Fatal, self.chunks.lock())?;
            if chunks.writable.is_none() {
                chunks.writable = Some(chunk);
            } else {
                // lost the race to another writer.
                mem::drop(chunks);
                self.allocator.return_chunk(chunk);
            }
        }
    }
}

/// Statistic type, for [RevisionsCache].
#[derive(Clone, Debug)]
pub struct Stats {
    pub name: String,
    pub n_wal: usize,
    pub n_chunk: usize,
    pub n_sealed: usize,
    pub n_draining: usize,
    pub n_hits: usize,
    pub n_wal_reads: usize,
    pub n_stale: usize,
    pub n_misses: usize,
    pub n_promotes: usize,
    pub n_compacts: usize,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(
            f,
            concat!(
                "{{ name = {:?}, n_wal = {}, n_chunk = {}, n_sealed = {}, ",
                "n_draining = {}, n_hits = {}, n_wal_reads = {}, n_stale = {}, ",
                "n_misses = {}, n_promotes = {}, n_compacts = {} }}"
            ),
            self.name,
            self.n_wal,
            self.n_chunk,
            self.n_sealed,
            self.n_draining,
            self.n_hits,
            self.n_wal_reads,
            self.n_stale,
            self.n_misses,
            self.n_promotes,
            self.n_compacts,
        )
    }
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod cache_test;
