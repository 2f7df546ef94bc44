//! Module implement a multi-valued hash table.
//!
//! [AssocMulti] is an open-addressing table that holds many elements under
//! the same key. Elements sharing a key are threaded into a doubly linked
//! list through slot indices. The list's head sits at the key's hash
//! position, other members sit at the hash position of their full
//! identity. Deleted slots are healed by moving later entries back, no
//! tombstones are used.
//!
//! Hashing and equality are supplied by the caller through [ElementOps].
//! Table does not lock, callers must serialize mutations against every
//! other operation on the same table.

mod multi;

pub use multi::{AssocMulti, ElementOps, SlotIndex, Stats, DEFAULT_SIZE};
