//! Module `spinlock` implement a read-write spinlock for short critical
//! sections over pointer bookkeeping.
//!
//! Revision lookups copy an entry descriptor out of a map and drop the
//! lock before touching the chunk, and chunk writers hold the lock only
//! to bump an offset. Both sections are a handful of loads and stores.
//!
//! Writers first set the _latch_ bit, no reader can enter after that,
//! and then wait for readers already inside to leave before setting the
//! _lock_ bit. Readers are counted in the low 30 bits of the same word.

use std::{
    cell::UnsafeCell,
    hint,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicU32, Ordering::SeqCst},
};

const LATCH: u32 = 0x4000_0000;
const LOCK: u32 = 0x8000_0000;
const LATCH_LOCK: u32 = LATCH | LOCK;
const READERS: u32 = 0x3FFF_FFFF;

/// Read-write lock guarding `T`, waiting threads busy loop.
pub struct Spinlock<T> {
    latchlock: AtomicU32,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Spinlock<T> {}
unsafe impl<T: Send + Sync> Sync for Spinlock<T> {}

impl<T> Spinlock<T> {
    pub fn new(value: T) -> Spinlock<T> {
        Spinlock {
            latchlock: AtomicU32::new(0),
            value: UnsafeCell::new(value),
        }
    }

    /// Shared access, many readers may hold it together.
    pub fn read(&self) -> ReadGuard<T> {
        loop {
            let old = self.latchlock.load(SeqCst);
            if (old & LATCH_LOCK) == 0 {
                let new = old + 1;
                if self.latchlock.compare_exchange(old, new, SeqCst, SeqCst).is_ok() {
                    break ReadGuard { door: self };
                }
            }
            hint::spin_loop();
        }
    }

    /// Exclusive access.
    pub fn write(&self) -> WriteGuard<T> {
        loop {
            let old = self.latchlock.load(SeqCst);
            if (old & LATCH_LOCK) == 0 {
                let new = old | LATCH;
                if self.latchlock.compare_exchange(old, new, SeqCst, SeqCst).is_ok() {
                    break;
                }
            }
            hint::spin_loop();
        }
        // latched, reader count can only go down from here.
        while (self.latchlock.load(SeqCst) & READERS) != 0 {
            hint::spin_loop();
        }
        self.latchlock.fetch_or(LOCK, SeqCst);

        WriteGuard { door: self }
    }
}

/// Shared guard, decrements the reader count when dropped.
pub struct ReadGuard<'a, T> {
    door: &'a Spinlock<T>,
}

impl<'a, T> Deref for ReadGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.door.value.get() }
    }
}

impl<'a, T> Drop for ReadGuard<'a, T> {
    fn drop(&mut self) {
        self.door.latchlock.fetch_sub(1, SeqCst);
    }
}

/// Exclusive guard, clears both latch and lock when dropped.
pub struct WriteGuard<'a, T> {
    door: &'a Spinlock<T>,
}

impl<'a, T> Deref for WriteGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.door.value.get() }
    }
}

impl<'a, T> DerefMut for WriteGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.door.value.get() }
    }
}

impl<'a, T> Drop for WriteGuard<'a, T> {
    fn drop(&mut self) {
        let old = self.door.latchlock.swap(0, SeqCst);
        debug_assert_eq!(old, LATCH_LOCK, "readers inside a write lock");
    }
}

#[cfg(test)]
#[path = "spinlock_test.rs"]
mod spinlock_test;
