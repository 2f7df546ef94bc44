use std::{
    alloc::{self, Layout},
    fmt,
    ptr::{self, NonNull},
    result, slice,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering::SeqCst},
        Arc,
    },
};

use crate::{revision::Record, util::Spinlock, Result};

const REF_MASK: u64 = 0xFFFFFFFF;
const VERSION_SHIFT: u64 = 32;

/// Append-only buffer of serialized document snapshots.
///
/// Life of a chunk is `writable -> sealed -> invalidated`. While writable,
/// writers reserve byte ranges with [advance_write_position] and copy their
/// record into it. Once sealed no more ranges are handed out. A chunk is
/// invalidated when its contents are compacted away, after which it can
/// go back to the allocator once readers drain.
///
/// Version and reference count are packed into a single 64-bit atomic,
/// version in the upper 32 bits, reference count in the lower 32 bits.
/// Version ZERO is never used for a chunk, it denotes data sitting in the
/// write-ahead-log.
///
/// [advance_write_position]: RevisionChunk::advance_write_position
pub struct RevisionChunk {
    data: NonNull<u8>,
    layout: Layout,

    versionref: AtomicU64,
    write_offset: Spinlock<usize>,
    committed: AtomicUsize,
    sealed: AtomicBool,
}

// Writers copy into disjoint reserved ranges, readers only look at ranges
// whose record was committed before being published.
unsafe impl Send for RevisionChunk {}
unsafe impl Sync for RevisionChunk {}

impl Drop for RevisionChunk {
    fn drop(&mut self) {
        debug_assert_eq!(self.ref_count(), 0, "chunk dropped while leased");
        unsafe { alloc::dealloc(self.data.as_ptr(), self.layout) };
    }
}

impl RevisionChunk {
    /// Allocate a chunk of `size` bytes.
    pub fn new(size: usize) -> Result<RevisionChunk> {
        if size == 0 || size > (u32::MAX as usize) {
            err_at!(InvalidInput, msg: "chunk size {}", size)?
        }
        let layout = err_at!(InvalidInput, Layout::from_size_align(size, 8))?;
        let data = match NonNull::new(unsafe { alloc::alloc(layout) }) {
            Some(data) => data,
            None => err_at!(OutOfMemory, msg: "revision chunk of {} bytes", size)?,
        };

        let val = RevisionChunk {
            data,
            layout,

            versionref: AtomicU64::new(1 << VERSION_SHIFT),
            write_offset: Spinlock::new(0),
            committed: AtomicUsize::new(0),
            sealed: AtomicBool::new(false),
        };

        Ok(val)
    }

    /// Reserve `size` bytes for writing. Return the offset of the reserved
    /// range, or None if chunk is sealed or does not have room.
    pub fn advance_write_position(&self, size: usize) -> Option<usize> {
        let mut offset = self.write_offset.write();
        if self.sealed.load(SeqCst) || (*offset + size) > self.layout.size() {
            None
        } else {
            let old = *offset;
            *offset += size;
            Some(old)
        }
    }

    /// Copy `data` into a range reserved by [advance_write_position].
    ///
    /// # Safety
    ///
    /// The range `offset..offset+data.len()` must have been reserved by
    /// this caller, and written only once.
    ///
    /// [advance_write_position]: RevisionChunk::advance_write_position
    pub unsafe fn write_at(&self, offset: usize, data: &[u8]) {
        debug_assert!((offset + data.len()) <= *self.write_offset.read());
        let dst = self.data.as_ptr().add(offset);
        ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        self.committed.fetch_add(data.len(), SeqCst);
    }

    /// Reserve room and copy `data` into the chunk, return its offset.
    pub fn append(&self, data: &[u8]) -> Option<usize> {
        let offset = self.advance_write_position(data.len())?;
        unsafe { self.write_at(offset, data) };
        Some(offset)
    }

    /// Stop handing out ranges, chunk becomes read-only once in-flight
    /// writes complete.
    pub fn seal(&self) {
        let _w = self.write_offset.write();
        self.sealed.store(true, SeqCst);
    }

    /// Acquire a lease on this chunk, provided its version is still
    /// `version`. Return true on success, in which case caller must call
    /// [release][RevisionChunk::release] exactly once.
    pub fn try_use(&self, version: u32) -> bool {
        let old = self.versionref.fetch_add(1, SeqCst);
        if ((old >> VERSION_SHIFT) as u32) == version {
            true
        } else {
            self.versionref.fetch_sub(1, SeqCst);
            false
        }
    }

    /// Release a lease acquired with [try_use][RevisionChunk::try_use].
    pub fn release(&self) {
        let old = self.versionref.fetch_sub(1, SeqCst);
        debug_assert!((old & REF_MASK) > 0, "release without use");
    }

    /// Bump the version, future leases against older versions shall fail.
    /// Leases already held stay valid. Return the new version.
    pub fn invalidate(&self) -> u32 {
        let mut old = self.versionref.load(SeqCst);
        loop {
            let version = match ((old >> VERSION_SHIFT) as u32).wrapping_add(1) {
                0 => 1,
                version => version,
            };
            let new = ((version as u64) << VERSION_SHIFT) | (old & REF_MASK);
            match self.versionref.compare_exchange(old, new, SeqCst, SeqCst) {
                Ok(_) => break version,
                Err(cur) => old = cur,
            }
        }
    }

    /// Rewind a drained chunk so it can be written afresh. Version is left
    /// as is, entries pointing into the old contents stay stale. Caller
    /// must make sure the chunk was invalidated and no lease is held.
    pub(crate) fn reset(&self) {
        let mut offset = self.write_offset.write();
        *offset = 0;
        self.committed.store(0, SeqCst);
        self.sealed.store(false, SeqCst);
    }
}

impl RevisionChunk {
    #[inline]
    pub fn version(&self) -> u32 {
        (self.versionref.load(SeqCst) >> VERSION_SHIFT) as u32
    }

    #[inline]
    pub fn ref_count(&self) -> u32 {
        (self.versionref.load(SeqCst) & REF_MASK) as u32
    }

    /// Capacity of this chunk, in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// Bytes reserved so far.
    pub fn write_offset(&self) -> usize {
        *self.write_offset.read()
    }

    /// Bytes copied in so far. Equals write_offset when no write is in
    /// flight.
    #[inline]
    pub fn committed(&self) -> usize {
        self.committed.load(SeqCst)
    }

    #[inline]
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(SeqCst)
    }

    /// No lease held and every reserved range copied in. A sealed chunk
    /// that is quiescent can be rewound and reused.
    pub fn is_quiescent(&self) -> bool {
        self.ref_count() == 0 && self.committed() == self.write_offset()
    }

    /// Read the record at `offset`. Caller must hold a lease, and `offset`
    /// must have come from a committed write.
    pub fn read_record(&self, offset: usize) -> Result<Record> {
        let data = self.as_written();
        if offset >= data.len() {
            err_at!(InvalidInput, msg: "offset {} beyond {}", offset, data.len())
        } else {
            Ok(Record::decode(&data[offset..])?.0)
        }
    }

    /// Walk a sealed chunk, return `(revision, offset, length)` for every
    /// record in it, in write order.
    pub fn find_revisions(&self) -> Result<Vec<(u64, usize, usize)>> {
        if !self.is_sealed() {
            err_at!(InvalidInput, msg: "find_revisions on writable chunk")?
        }
        let data = self.as_written();
        if self.committed() != data.len() {
            err_at!(
                InvalidInput, msg: "writes in flight {}/{}", self.committed(), data.len()
            )?
        }

        let mut items = vec![];
        let mut offset = 0;
        while offset < data.len() {
            let (record, n) = err_at!(InvalidFormat, Record::decode(&data[offset..]))?;
            if n == 0 {
                err_at!(InvalidFormat, msg: "empty record at {}", offset)?
            }
            items.push((record.revision, offset, n));
            offset += n;
        }

        Ok(items)
    }

    fn as_written(&self) -> &[u8] {
        let n = self.write_offset();
        unsafe { slice::from_raw_parts(self.data.as_ptr(), n) }
    }
}

impl fmt::Debug for RevisionChunk {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(
            f,
            "RevisionChunk<{:p} size:{} version:{} refs:{} written:{} sealed:{}>",
            self.data.as_ptr(),
            self.size(),
            self.version(),
            self.ref_count(),
            self.write_offset(),
            self.is_sealed(),
        )
    }
}

/// RAII lease over a record in a [RevisionChunk]. Releases the chunk on
/// drop.
pub struct ChunkLease {
    chunk: Arc<RevisionChunk>,
    offset: usize,
}

impl Drop for ChunkLease {
    fn drop(&mut self) {
        self.chunk.release()
    }
}

impl ChunkLease {
    /// Lease `chunk`, if it is still at `version`.
    pub fn new(chunk: Arc<RevisionChunk>, offset: usize, version: u32) -> Option<ChunkLease> {
        if chunk.try_use(version) {
            Some(ChunkLease { chunk, offset })
        } else {
            None
        }
    }

    pub fn to_record(&self) -> Result<Record> {
        self.chunk.read_record(self.offset)
    }

    /// Return the document body for this lease.
    pub fn to_body(&self) -> Result<Vec<u8>> {
        Ok(self.to_record()?.body)
    }

    pub fn as_chunk(&self) -> &Arc<RevisionChunk> {
        &self.chunk
    }

    pub fn to_offset(&self) -> usize {
        self.offset
    }
}

#[cfg(test)]
#[path = "chunk_test.rs"]
mod chunk_test;
