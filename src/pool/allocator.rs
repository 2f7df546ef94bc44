use lazy_static::lazy_static;
use log::{debug, warn};

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    fmt,
    ptr::NonNull,
    result,
    sync::{
        atomic::{AtomicU64, Ordering::SeqCst},
        Arc, Mutex,
    },
};

use crate::{
    pool::{Arena, Brick},
    Result,
};

static ALLOCATOR_ID: AtomicU64 = AtomicU64::new(1);
// bumped every time an allocator is dropped.
static N_DROPPED: AtomicU64 = AtomicU64::new(0);

lazy_static! {
    static ref LIVE: Mutex<HashSet<u64>> = Mutex::new(HashSet::new());
}

thread_local! {
    // allocator-id -> address of this thread's current brick, along with
    // the N_DROPPED value the map was last pruned at.
    static CURRENT: RefCell<(u64, HashMap<u64, usize>)> = RefCell::new((0, HashMap::new()));
}

/// Allocator for blocks of a single size, backed by a shared [Arena].
///
/// Every brick owned by an allocator is in exactly one of three sets:
/// `is_current`, bricks that some thread is allocating from, `not_full`
/// and `is_full`. The sets are guarded by a mutex, while the allocation
/// itself runs lock-free on the calling thread's current brick.
pub struct Allocator {
    id: u64,
    block_size: usize,
    arena: Arc<Arena>,
    bricks: Mutex<Bricks>,
}

#[derive(Default)]
struct Bricks {
    is_current: HashSet<usize>,
    not_full: HashSet<usize>,
    is_full: HashSet<usize>,
}

impl Drop for Allocator {
    fn drop(&mut self) {
        self.set_current(None);
        match LIVE.lock() {
            Ok(mut live) => live.remove(&self.id),
            Err(err) => err.into_inner().remove(&self.id),
        };
        N_DROPPED.fetch_add(1, SeqCst);

        let bricks = match self.bricks.get_mut() {
            Ok(bricks) => bricks,
            Err(err) => err.into_inner(),
        };
        let addrs: Vec<usize> = {
            let iter = bricks.is_current.drain();
            let iter = iter.chain(bricks.not_full.drain());
            iter.chain(bricks.is_full.drain()).collect()
        };

        let mut n_used = 0;
        for addr in addrs.into_iter() {
            let brick = to_brick(addr);
            n_used += unsafe { brick.as_ref() }.n_used();
            if let Err(err) = self.arena.return_brick(brick) {
                warn!(target: "pool", "return brick on drop, {}", err);
            }
        }
        if n_used > 0 {
            warn!(
                target: "pool",
                "allocator<{}> dropped with {} live blocks", self.block_size, n_used
            );
        }
    }
}

impl Allocator {
    /// Create a new allocator handing out blocks of `block_size` bytes,
    /// `block_size` must be a multiple of 4.
    pub fn new(arena: Arc<Arena>, block_size: usize) -> Result<Allocator> {
        Brick::check_block_size(block_size)?;

        let val = Allocator {
            id: ALLOCATOR_ID.fetch_add(1, SeqCst),
            block_size,
            arena,
            bricks: Mutex::new(Bricks::default()),
        };
        err_at!(Fatal, LIVE.lock())?.insert(val.id);

        Ok(val)
    }

    /// Allocate a block. Fails only if the arena can't get memory from the
    /// system.
    pub fn allocate(&self) -> Result<NonNull<u8>> {
        loop {
            let brick = match self.to_current() {
                Some(brick) => brick,
                None => {
                    let brick = self.acquire_brick()?;
                    self.set_current(Some(brick));
                    brick
                }
            };

            // lock-free, this thread is the only one allocating from brick.
            match unsafe { brick.as_ref() }.allocate() {
                Some(block) => break Ok(block),
                None => {
                    let addr = brick.as_ptr() as usize;
                    let mut bricks = err_at!(Fatal, self.bricks.lock())?;
                    bricks.is_current.remove(&addr);
                    if unsafe { brick.as_ref() }.is_full() {
                        bricks.is_full.insert(addr);
                    } else {
                        bricks.not_full.insert(addr);
                    }
                    self.set_current(None);
                }
            }
        }
    }

    /// Free a block allocated by this allocator, can be called from any
    /// thread. If its brick became completely free, the brick is returned
    /// to the arena unless another thread is allocating from it.
    ///
    /// # Safety
    ///
    /// `block` must have come from [Allocator::allocate] on this allocator
    /// and must not be used after this call.
    pub unsafe fn free(&self, block: NonNull<u8>) -> Result<()> {
        let addr = {
            let brick = Brick::from_block(block.as_ptr());
            debug_assert_eq!(brick.block_size(), self.block_size, "foreign block");
            brick as *const Brick as usize
        };

        Brick::free(block);

        // brick memory is touched only while it is still in one of our sets,
        // a concurrent free may already have handed it back to the arena.
        let mut bricks = err_at!(Fatal, self.bricks.lock())?;
        if bricks.is_full.remove(&addr) {
            bricks.not_full.insert(addr);
        }

        let brick = to_brick(addr);
        let giveup = if bricks.not_full.contains(&addr) {
            if brick.as_ref().is_empty() {
                bricks.not_full.remove(&addr);
                true
            } else {
                false
            }
        } else if self.to_current() == Some(brick) && brick.as_ref().is_empty() {
            bricks.is_current.remove(&addr);
            self.set_current(None);
            true
        } else {
            false
        };

        if giveup {
            debug!(target: "pool", "allocator<{}> returns brick", self.block_size);
            self.arena.return_brick(brick)?;
        }

        Ok(())
    }

    #[inline]
    pub fn to_block_size(&self) -> usize {
        self.block_size
    }

    pub fn to_stats(&self) -> Result<Stats> {
        let bricks = err_at!(Fatal, self.bricks.lock())?;
        let n_used: usize = {
            let iter = bricks.is_current.iter();
            let iter = iter.chain(bricks.not_full.iter());
            let iter = iter.chain(bricks.is_full.iter());
            iter.map(|addr| unsafe { to_brick(*addr).as_ref() }.n_used()).sum()
        };

        Ok(Stats {
            block_size: self.block_size,
            n_current: bricks.is_current.len(),
            n_not_full: bricks.not_full.len(),
            n_full: bricks.is_full.len(),
            n_used,
        })
    }

    // get a brick from not-full set, or lease a fresh one from arena.
    fn acquire_brick(&self) -> Result<NonNull<Brick>> {
        let mut bricks = err_at!(Fatal, self.bricks.lock())?;

        let addr = match bricks.not_full.iter().next().copied() {
            Some(addr) => {
                bricks.not_full.remove(&addr);
                addr
            }
            None => self.arena.lease_brick(self.block_size)?.as_ptr() as usize,
        };
        bricks.is_current.insert(addr);

        Ok(to_brick(addr))
    }

    fn to_current(&self) -> Option<NonNull<Brick>> {
        CURRENT.with(|m| m.borrow().1.get(&self.id).copied().map(to_brick))
    }

    fn set_current(&self, brick: Option<NonNull<Brick>>) {
        CURRENT.with(|m| {
            let mut m = m.borrow_mut();
            match brick {
                Some(brick) => {
                    m.1.insert(self.id, brick.as_ptr() as usize);
                    prune_current(&mut m);
                }
                None => {
                    m.1.remove(&self.id);
                }
            }
        })
    }
}

// drop entries of allocators that went away since the last prune, their
// bricks were returned to the arena on drop.
fn prune_current(current: &mut (u64, HashMap<u64, usize>)) {
    let n_dropped = N_DROPPED.load(SeqCst);
    if current.0 == n_dropped {
        return;
    }
    let live = match LIVE.lock() {
        Ok(live) => live,
        Err(err) => err.into_inner(),
    };
    current.1.retain(|id, _| live.contains(id));
    current.0 = n_dropped;
}

/// Number of current-brick entries held by the calling thread.
#[cfg(test)]
fn n_current_entries() -> usize {
    CURRENT.with(|m| m.borrow().1.len())
}

#[inline]
fn to_brick(addr: usize) -> NonNull<Brick> {
    debug_assert!(addr != 0);
    unsafe { NonNull::new_unchecked(addr as *mut Brick) }
}

/// Statistic type, to capture [Allocator] metrics.
#[derive(Clone, Default, Debug)]
pub struct Stats {
    pub block_size: usize,
    /// Bricks that threads are currently allocating from.
    pub n_current: usize,
    /// Bricks with free blocks, waiting to become some thread's current.
    pub n_not_full: usize,
    /// Bricks without a free block.
    pub n_full: usize,
    /// Live blocks across all bricks.
    pub n_used: usize,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(
            f,
            concat!(
                "{{ block_size = {}, n_current = {}, n_not_full = {}, ",
                "n_full = {}, n_used = {} }}"
            ),
            self.block_size, self.n_current, self.n_not_full, self.n_full, self.n_used
        )
    }
}

#[cfg(test)]
#[path = "allocator_test.rs"]
mod allocator_test;
