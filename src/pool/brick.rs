use std::{
    mem,
    ptr::{self, NonNull},
    sync::atomic::{
        AtomicU32,
        Ordering::{AcqRel, Acquire, Relaxed, SeqCst},
    },
};

use crate::{
    pool::{Chunk, BRICK_SIZE},
    Result,
};

const EMPTY: u32 = u32::MAX;

/// Header of a 256KB brick, placed at the start of the brick's region.
///
/// Blocks are handed out by bumping `next_unused` until the never touched
/// tail is exhausted, after which freed blocks are popped from a lock-free
/// free-list. Free-list links are block indices, stored in the first four
/// bytes of the freed block.
///
/// Only one thread shall call [Brick::allocate] at a time, [Allocator]
/// makes sure of that by handing a brick to a single thread as its
/// current brick. [Brick::free] can be called from any thread.
///
/// Invariant: `n_free` equals the free-list length plus the number of
/// never used blocks.
///
/// [Allocator]: crate::pool::Allocator
#[repr(C)]
pub struct Brick {
    chunk: *mut Chunk,
    block_size: u32,
    n_blocks: u32,
    start: u32,
    next_unused: AtomicU32,
    n_free: AtomicU32,
    free_head: AtomicU32,
}

impl Brick {
    /// Bytes reserved for the header, blocks start at this offset.
    pub const HEADER_SIZE: usize = 64;

    /// Validate `block_size` for carving blocks out of a brick.
    pub fn check_block_size(block_size: usize) -> Result<u32> {
        if block_size < 4 || (block_size % 4) != 0 {
            err_at!(InvalidInput, msg: "block size {} not a multiple of 4", block_size)
        } else if block_size > (BRICK_SIZE - Self::HEADER_SIZE) {
            err_at!(InvalidInput, msg: "block size {} too large for brick", block_size)
        } else {
            Ok(block_size as u32)
        }
    }

    /// Construct a brick header in place at `base`, which must be a
    /// BRICK_SIZE aligned region of BRICK_SIZE bytes, owned by `chunk`.
    pub(crate) unsafe fn init(
        base: NonNull<u8>,
        chunk: *mut Chunk,
        block_size: u32,
    ) -> NonNull<Brick> {
        debug_assert!(mem::size_of::<Brick>() <= Self::HEADER_SIZE);
        debug_assert_eq!(base.as_ptr() as usize % BRICK_SIZE, 0);

        let start = Self::HEADER_SIZE;
        let n_blocks = ((BRICK_SIZE - start) / (block_size as usize)) as u32;
        let brick = Brick {
            chunk,
            block_size,
            n_blocks,
            start: start as u32,
            next_unused: AtomicU32::new(0),
            n_free: AtomicU32::new(n_blocks),
            free_head: AtomicU32::new(EMPTY),
        };

        let ptr = base.as_ptr() as *mut Brick;
        ptr::write(ptr, brick);
        NonNull::new_unchecked(ptr)
    }

    /// Locate the brick owning `block`, by masking its address.
    ///
    /// # Safety
    ///
    /// `block` must have been handed out by a live brick.
    #[inline]
    pub unsafe fn from_block<'a>(block: *const u8) -> &'a Brick {
        let base = (block as usize) & !(BRICK_SIZE - 1);
        &*(base as *const Brick)
    }

    /// Return an unused block, or None if the brick is full.
    pub fn allocate(&self) -> Option<NonNull<u8>> {
        let next = self.next_unused.load(Relaxed);
        if next < self.n_blocks {
            self.next_unused.store(next + 1, Relaxed);
            self.n_free.fetch_sub(1, SeqCst);
            return Some(self.to_block(next));
        }

        loop {
            let head = self.free_head.load(Acquire);
            if head == EMPTY {
                break None;
            }
            let block = self.to_block(head);
            let next = unsafe { ptr::read(block.as_ptr() as *const u32) };
            if self
                .free_head
                .compare_exchange(head, next, AcqRel, Acquire)
                .is_ok()
            {
                self.n_free.fetch_sub(1, SeqCst);
                break Some(block);
            }
        }
    }

    /// Return `block` to its owning brick. Return true if the brick became
    /// fully free as a result, the caller is expected to hand the brick
    /// back to its chunk.
    ///
    /// # Safety
    ///
    /// `block` must have been allocated from a live brick and not freed
    /// since.
    pub unsafe fn free(block: NonNull<u8>) -> bool {
        let brick = Self::from_block(block.as_ptr());
        let index = brick.to_index(block);
        // brick may be handed back to the arena by another freer as soon as
        // our count lands, header is not touched after that.
        let n_blocks = brick.n_blocks;

        loop {
            let head = brick.free_head.load(Acquire);
            ptr::write(block.as_ptr() as *mut u32, head);
            if brick
                .free_head
                .compare_exchange(head, index, AcqRel, Acquire)
                .is_ok()
            {
                break;
            }
        }

        let n_free = brick.n_free.fetch_add(1, SeqCst).wrapping_add(1);
        debug_assert!(n_free <= n_blocks, "double free into brick");
        n_free == n_blocks
    }
}

impl Brick {
    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size as usize
    }

    /// Total number of blocks in this brick.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.n_blocks as usize
    }

    #[inline]
    pub fn n_free(&self) -> usize {
        self.n_free.load(SeqCst) as usize
    }

    /// Number of blocks handed out and not yet freed. Owner can pop a
    /// block pushed by a concurrent free before that free bumps `n_free`,
    /// so `n_free` may dip below zero for an instant.
    #[inline]
    pub fn n_used(&self) -> usize {
        self.capacity().saturating_sub(self.n_free())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.n_free.load(SeqCst) == self.n_blocks
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.n_free.load(SeqCst) == 0
    }

    pub(crate) fn to_chunk(&self) -> *mut Chunk {
        self.chunk
    }

    #[inline]
    fn to_block(&self, index: u32) -> NonNull<u8> {
        let base = self as *const Brick as usize;
        let off = (self.start as usize) + (index as usize) * (self.block_size as usize);
        unsafe { NonNull::new_unchecked((base + off) as *mut u8) }
    }

    #[inline]
    fn to_index(&self, block: NonNull<u8>) -> u32 {
        let base = self as *const Brick as usize;
        let off = (block.as_ptr() as usize) - base - (self.start as usize);
        debug_assert_eq!(off % (self.block_size as usize), 0, "misaligned block");
        (off / (self.block_size as usize)) as u32
    }
}

#[cfg(test)]
#[path = "brick_test.rs"]
mod brick_test;
