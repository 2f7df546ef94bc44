use std::{
    alloc::{self, Layout},
    ptr::{self, NonNull},
};

use crate::{
    pool::{Brick, BRICK_SIZE},
    Result,
};

const EMPTY: u32 = u32::MAX;

/// A single large allocation divided into BRICK_SIZE aligned brick slots.
///
/// Mirrors the brick design one level up, slots are handed out by bumping
/// `next_unused` and returned slots are threaded into a free-list whose
/// links live in the first four bytes of the slot. Chunk is not
/// thread-safe, [Arena][crate::pool::Arena] calls into it only while
/// holding its mutex.
pub struct Chunk {
    base: NonNull<u8>,
    layout: Layout,
    n_bricks: u32,
    n_free: u32,
    next_unused: u32,
    free_head: u32,
}

// Chunk is only touched under the arena's mutex.
unsafe impl Send for Chunk {}

impl Drop for Chunk {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) };
    }
}

impl Chunk {
    /// Allocate a new chunk of `n_bricks` brick slots.
    pub fn new(n_bricks: usize) -> Result<Box<Chunk>> {
        if n_bricks == 0 || n_bricks >= (EMPTY as usize) {
            err_at!(InvalidInput, msg: "bricks per chunk {}", n_bricks)?
        }

        let size = match n_bricks.checked_mul(BRICK_SIZE) {
            Some(size) => size,
            None => err_at!(InvalidInput, msg: "chunk of {} bricks", n_bricks)?,
        };
        let layout = err_at!(InvalidInput, Layout::from_size_align(size, BRICK_SIZE))?;
        let base = match NonNull::new(unsafe { alloc::alloc(layout) }) {
            Some(base) => base,
            None => err_at!(OutOfMemory, msg: "chunk of {} bytes", size)?,
        };

        let val = Chunk {
            base,
            layout,
            n_bricks: n_bricks as u32,
            n_free: n_bricks as u32,
            next_unused: 0,
            free_head: EMPTY,
        };

        Ok(Box::new(val))
    }

    /// Lease a brick slot and construct a brick for `block_size` in it.
    /// Return None if all slots are leased.
    pub fn lease_brick(&mut self, block_size: u32) -> Option<NonNull<Brick>> {
        let slot = if self.next_unused < self.n_bricks {
            self.next_unused += 1;
            self.next_unused - 1
        } else if self.free_head != EMPTY {
            let slot = self.free_head;
            self.free_head = unsafe { ptr::read(self.to_slot(slot).as_ptr() as *const u32) };
            slot
        } else {
            return None;
        };
        self.n_free -= 1;

        let chunk = self as *mut Chunk;
        Some(unsafe { Brick::init(self.to_slot(slot), chunk, block_size) })
    }

    /// Take back a brick leased from this chunk. Brick's header is dropped
    /// and the slot goes into the free-list.
    pub fn return_brick(&mut self, brick: NonNull<Brick>) {
        let base = brick.as_ptr() as *mut u8;
        let slot = ((base as usize) - (self.base.as_ptr() as usize)) / BRICK_SIZE;
        debug_assert!(slot < (self.n_bricks as usize), "brick from other chunk");

        unsafe {
            ptr::drop_in_place(brick.as_ptr());
            ptr::write(base as *mut u32, self.free_head);
        }
        self.free_head = slot as u32;
        self.n_free += 1;
    }

    /// Return true if every brick slot is leased.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.n_free == 0
    }

    /// Return true if no brick slot is leased.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.n_free == self.n_bricks
    }

    #[inline]
    pub fn n_leased(&self) -> usize {
        (self.n_bricks - self.n_free) as usize
    }

    #[inline]
    fn to_slot(&self, slot: u32) -> NonNull<u8> {
        let off = (slot as usize) * BRICK_SIZE;
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(off)) }
    }
}
