//! Module implement a fixed-size block allocator.
//!
//! Memory is organised in three levels:
//!
//! * [Brick], a 256KB region aligned to its own size, divided into equal
//!   sized blocks. The brick header sits at the start of the region, so
//!   the owning brick of any block is found by masking the block's address
//!   with `!(BRICK_SIZE - 1)`.
//! * [Chunk], one large allocation holding `bricks_per_chunk` brick slots.
//! * [Arena], a pool of chunks, split into full and not-full chunks,
//!   guarded by a single mutex. Leases and takes back whole bricks.
//!
//! An [Allocator] serves one block size on top of a shared [Arena]. Each
//! thread allocates from its own _current_ brick without any lock, only
//! the hand-off of bricks between threads goes through the allocator's
//! mutex. Blocks can be freed from any thread, through a lock-free
//! free-list inside the brick.
//!
//! ```ignore
//! let arena = Arc::new(Arena::new(BRICKS_PER_CHUNK));
//! let allocator = Allocator::new(Arc::clone(&arena), 64)?;
//! let block = allocator.allocate()?;
//! allocator.free(block)?;
//! ```

mod allocator;
mod arena;
mod brick;
mod chunk;

pub use allocator::{Allocator, Stats as AllocatorStats};
pub use arena::{Arena, Stats as ArenaStats};
pub use brick::Brick;
pub use chunk::Chunk;

/// log2 of [BRICK_SIZE].
pub const BRICK_SHIFT: usize = 18;
/// Size of a brick, bricks are also aligned to this size, 256KB.
pub const BRICK_SIZE: usize = 1 << BRICK_SHIFT;
/// Default number of bricks in a chunk, makes for 128MB chunks.
pub const BRICKS_PER_CHUNK: usize = 512;
