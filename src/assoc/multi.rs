use log::debug;

use std::{
    fmt, marker, mem, result,
    sync::atomic::{AtomicUsize, Ordering::Relaxed},
};

use crate::{util, Result};

/// Default number of elements a new table is sized for.
pub const DEFAULT_SIZE: usize = 64;

/// Hashing and comparison functions for elements of type `E` under key
/// type `K`.
///
/// `hash_key(key)` must equal `hash_element(e, true)` for every element
/// `e` with that key.
pub trait ElementOps<K, E> {
    fn hash_key(&self, key: &K) -> u64;

    /// Hash element by its key when `by_key` is true, else by its full
    /// identity.
    fn hash_element(&self, element: &E, by_key: bool) -> u64;

    fn is_equal_key_element(&self, key: &K, element: &E) -> bool;

    /// Compare elements by their key when `by_key` is true, else by their
    /// full identity.
    fn is_equal_element_element(&self, a: &E, b: &E, by_key: bool) -> bool;
}

/// Integer type used to link slots, implemented for u32 and u64.
pub trait SlotIndex: Copy + Eq + fmt::Debug {
    /// Marks end of list, and the `prev` of a list head.
    const INVALID: Self;

    fn from_usize(n: usize) -> Self;

    fn to_usize(self) -> usize;
}

impl SlotIndex for u32 {
    const INVALID: u32 = u32::MAX;

    #[inline]
    fn from_usize(n: usize) -> u32 {
        n as u32
    }

    #[inline]
    fn to_usize(self) -> usize {
        self as usize
    }
}

impl SlotIndex for u64 {
    const INVALID: u64 = u64::MAX;

    #[inline]
    fn from_usize(n: usize) -> u64 {
        n as u64
    }

    #[inline]
    fn to_usize(self) -> usize {
        self as usize
    }
}

struct Slot<E, I> {
    elem: Option<E>,
    next: I,
    prev: I,
}

impl<E, I> Slot<E, I>
where
    I: SlotIndex,
{
    fn empty() -> Slot<E, I> {
        Slot {
            elem: None,
            next: I::INVALID,
            prev: I::INVALID,
        }
    }

    #[inline]
    fn is_head(&self) -> bool {
        self.prev == I::INVALID
    }
}

/// Multi-valued hash table, refer to [module][crate::assoc] documentation.
///
/// Table never goes beyond half full, an insert that would cross that
/// doubles the table first.
pub struct AssocMulti<K, E, O, I = u32>
where
    O: ElementOps<K, E>,
    I: SlotIndex,
{
    name: String,
    ops: O,
    slots: Vec<Slot<E, I>>,
    n_used: usize,

    n_finds: AtomicUsize,
    n_adds: usize,
    n_removes: usize,
    n_resizes: usize,
    n_probes_f: AtomicUsize,
    n_probes_a: usize,
    n_probes_d: usize,

    _key: marker::PhantomData<K>,
}

impl<K, E, O, I> AssocMulti<K, E, O, I>
where
    O: ElementOps<K, E>,
    I: SlotIndex,
{
    /// Create a table sized for [DEFAULT_SIZE] elements.
    pub fn new(name: &str, ops: O) -> Result<AssocMulti<K, E, O, I>> {
        Self::with_size(name, ops, DEFAULT_SIZE)
    }

    /// Create a table sized for `size` elements.
    pub fn with_size(name: &str, ops: O, size: usize) -> Result<AssocMulti<K, E, O, I>> {
        let val = AssocMulti {
            name: name.to_string(),
            ops,
            slots: Self::new_slots(size)?,
            n_used: 0,

            n_finds: AtomicUsize::new(0),
            n_adds: 0,
            n_removes: 0,
            n_resizes: 0,
            n_probes_f: AtomicUsize::new(0),
            n_probes_a: 0,
            n_probes_d: 0,

            _key: marker::PhantomData,
        };

        Ok(val)
    }

    /// Insert `element`. If an element equal by identity is already in the
    /// table, it is returned and `element` is dropped, unless `overwrite`
    /// is true, in which case `element` takes its place.
    pub fn insert(&mut self, element: E, overwrite: bool) -> Result<Option<E>>
    where
        E: Clone,
    {
        if 2 * (self.n_used + 1) > self.slots.len() {
            self.resize(self.slots.len())?;
        }
        self.n_adds += 1;
        Ok(self.do_insert(element, true, overwrite))
    }

    /// Remove the element equal by identity to `element`, and return it.
    pub fn remove(&mut self, element: &E) -> Option<E> {
        self.n_removes += 1;

        let j = self.find_element(element, false)?;
        let (next, prev) = (self.slots[j].next, self.slots[j].prev);
        let old = match (prev == I::INVALID, next == I::INVALID) {
            (true, true) => {
                let old = self.slots[j].elem.take();
                self.heal_hole(j);
                old
            }
            (true, false) => {
                // second element takes over the head slot.
                let k = next.to_usize();
                let second = mem::replace(&mut self.slots[k], Slot::empty());
                let old = mem::replace(&mut self.slots[j].elem, second.elem);
                self.slots[j].next = second.next;
                if second.next != I::INVALID {
                    self.slots[second.next.to_usize()].prev = I::from_usize(j);
                }
                self.heal_hole(k);
                old
            }
            (false, _) => {
                self.slots[prev.to_usize()].next = next;
                if next != I::INVALID {
                    self.slots[next.to_usize()].prev = prev;
                }
                let old = mem::replace(&mut self.slots[j], Slot::empty()).elem;
                self.heal_hole(j);
                old
            }
        };

        self.n_used -= 1;
        old
    }

    /// Resize table to hold `size` elements at half load. Fails if `size`
    /// is less than the number of elements in the table.
    pub fn resize(&mut self, size: usize) -> Result<()>
    where
        E: Clone,
    {
        if size < self.n_used {
            err_at!(InvalidInput, msg: "{} resize {} below {}", self.name, size, self.n_used)?
        }

        let old = mem::replace(&mut self.slots, Self::new_slots(size)?);
        self.n_used = 0;
        self.n_resizes += 1;
        for slot in old.into_iter() {
            if let Some(elem) = slot.elem {
                self.do_insert(elem, false, false);
            }
        }
        debug!(
            target: "assoc", "{} resized to {} slots for {} elements",
            self.name, self.slots.len(), self.n_used
        );

        Ok(())
    }

    /// Drop all elements, table keeps its capacity.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = Slot::empty());
        self.n_used = 0;
    }
}

impl<K, E, O, I> AssocMulti<K, E, O, I>
where
    O: ElementOps<K, E>,
    I: SlotIndex,
{
    /// Return every element under `key`, list head first.
    pub fn lookup_by_key(&self, key: &K) -> Vec<&E> {
        self.n_finds.fetch_add(1, Relaxed);

        let n = self.slots.len();
        let mut i = self.index_of(self.ops.hash_key(key));
        loop {
            match &self.slots[i] {
                Slot { elem: None, .. } => break vec![],
                Slot { elem: Some(e), prev, .. }
                    if *prev == I::INVALID && self.ops.is_equal_key_element(key, e) =>
                {
                    break self.collect(i, 0);
                }
                _ => i = (i + 1) % n,
            }
            self.n_probes_f.fetch_add(1, Relaxed);
        }
    }

    /// Return the element equal by identity to `element`.
    pub fn lookup(&self, element: &E) -> Option<&E> {
        self.n_finds.fetch_add(1, Relaxed);
        let i = self.find_element(element, true)?;
        self.slots[i].elem.as_ref()
    }

    /// Return every element sharing `element`'s key, list head first.
    pub fn lookup_with_element_by_key(&self, element: &E) -> Vec<&E> {
        self.n_finds.fetch_add(1, Relaxed);
        match self.find_head(element, true) {
            Some(i) => self.collect(i, 0),
            None => vec![],
        }
    }

    /// Page through the list holding `element`, returning up to `limit`
    /// elements that follow it. A `limit` of ZERO means no limit.
    pub fn lookup_by_key_continue(&self, element: &E, limit: usize) -> Vec<&E> {
        self.n_finds.fetch_add(1, Relaxed);
        match self.find_element(element, true) {
            Some(i) if self.slots[i].next != I::INVALID => {
                self.collect(self.slots[i].next.to_usize(), limit)
            }
            _ => vec![],
        }
    }

    pub fn len(&self) -> usize {
        self.n_used
    }

    pub fn is_empty(&self) -> bool {
        self.n_used == 0
    }

    /// Number of slots in the table.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Memory held by the table's slots, excluding anything the elements
    /// point to.
    pub fn memory_usage(&self) -> usize {
        self.slots.capacity() * mem::size_of::<Slot<E, I>>()
    }

    pub fn to_name(&self) -> String {
        self.name.clone()
    }

    pub fn to_stats(&self) -> Stats {
        Stats {
            n_count: self.n_used,
            capacity: self.slots.len(),
            memory: self.memory_usage(),
            n_finds: self.n_finds.load(Relaxed),
            n_adds: self.n_adds,
            n_removes: self.n_removes,
            n_resizes: self.n_resizes,
            n_probes_f: self.n_probes_f.load(Relaxed),
            n_probes_a: self.n_probes_a,
            n_probes_d: self.n_probes_d,
        }
    }

    /// Check table invariants, for debugging.
    pub fn validate(&self) -> Result<()> {
        let n = self.slots.len();
        let mut n_used = 0;
        let mut n_linked = 0;

        for (i, slot) in self.slots.iter().enumerate() {
            let elem = match &slot.elem {
                Some(elem) => elem,
                None => continue,
            };
            n_used += 1;

            // every slot between ideal position and this one is occupied.
            let mut k = self.index_of(self.ops.hash_element(elem, slot.is_head()));
            while k != i {
                if self.slots[k].elem.is_none() {
                    err_at!(Fatal, msg: "{} slot {} unreachable from {}", self.name, i, k)?
                }
                k = (k + 1) % n;
            }

            if slot.next != I::INVALID && self.slots[slot.next.to_usize()].prev.to_usize() != i {
                err_at!(Fatal, msg: "{} slot {} broken next link", self.name, i)?
            }
            if !slot.is_head() {
                if self.slots[slot.prev.to_usize()].next.to_usize() != i {
                    err_at!(Fatal, msg: "{} slot {} broken prev link", self.name, i)?
                }
                continue;
            }

            let mut j = i;
            loop {
                n_linked += 1;
                let other = match &self.slots[j].elem {
                    Some(other) => other,
                    None => err_at!(Fatal, msg: "{} empty slot {} in list", self.name, j)?,
                };
                if !self.ops.is_equal_element_element(elem, other, true) {
                    err_at!(Fatal, msg: "{} slot {} key differs from head {}", self.name, j, i)?
                }
                match self.slots[j].next {
                    next if next == I::INVALID => break,
                    next => j = next.to_usize(),
                }
                if n_linked > self.n_used {
                    err_at!(Fatal, msg: "{} cycle in list at {}", self.name, i)?
                }
            }
        }

        if n_used != self.n_used {
            err_at!(Fatal, msg: "{} n_used {} != {}", self.name, n_used, self.n_used)
        } else if n_linked != self.n_used {
            err_at!(Fatal, msg: "{} n_linked {} != {}", self.name, n_linked, self.n_used)
        } else if 2 * self.n_used > n {
            err_at!(Fatal, msg: "{} overloaded {}/{}", self.name, self.n_used, n)
        } else {
            Ok(())
        }
    }
}

impl<K, E, O, I> AssocMulti<K, E, O, I>
where
    O: ElementOps<K, E>,
    I: SlotIndex,
{
    fn new_slots(size: usize) -> Result<Vec<Slot<E, I>>> {
        let n = util::next_prime(2 * (size as u64) + 1) as usize;
        if n >= I::INVALID.to_usize() {
            err_at!(InvalidInput, msg: "table size {} beyond slot index", n)?
        }

        let mut slots = vec![];
        err_at!(OutOfMemory, slots.try_reserve_exact(n))?;
        slots.extend((0..n).map(|_| Slot::empty()));
        Ok(slots)
    }

    #[inline]
    fn index_of(&self, hash: u64) -> usize {
        (hash % (self.slots.len() as u64)) as usize
    }

    // Place element, caller makes sure there is room. With `check` false
    // element is known to be unique and the table is not searched for a
    // duplicate.
    fn do_insert(&mut self, element: E, check: bool, overwrite: bool) -> Option<E>
    where
        E: Clone,
    {
        let n = self.slots.len();

        let mut i = self.index_of(self.ops.hash_element(&element, true));
        loop {
            match &self.slots[i] {
                Slot { elem: None, .. } => break,
                Slot { elem: Some(e), prev, .. }
                    if *prev == I::INVALID
                        && self.ops.is_equal_element_element(&element, e, true) =>
                {
                    break
                }
                _ => i = (i + 1) % n,
            }
            self.n_probes_a += 1;
        }

        let dup = match &self.slots[i].elem {
            None => None,
            Some(e) => Some(check && self.ops.is_equal_element_element(&element, e, false)),
        };
        match dup {
            None => {
                self.slots[i] = Slot {
                    elem: Some(element),
                    next: I::INVALID,
                    prev: I::INVALID,
                };
                self.n_used += 1;
                return None;
            }
            Some(true) => return Self::replace(&mut self.slots[i], element, overwrite),
            Some(false) => (),
        }

        let mut j = self.index_of(self.ops.hash_element(&element, false));
        loop {
            let dup = match &self.slots[j].elem {
                None => break,
                Some(e) => check && self.ops.is_equal_element_element(&element, e, false),
            };
            if dup {
                return Self::replace(&mut self.slots[j], element, overwrite);
            }
            j = (j + 1) % n;
            self.n_probes_a += 1;
        }

        // splice in as second element of the list.
        let next = self.slots[i].next;
        self.slots[j] = Slot {
            elem: Some(element),
            next,
            prev: I::from_usize(i),
        };
        self.slots[i].next = I::from_usize(j);
        if next != I::INVALID {
            self.slots[next.to_usize()].prev = I::from_usize(j);
        }
        self.n_used += 1;

        None
    }

    fn replace(slot: &mut Slot<E, I>, element: E, overwrite: bool) -> Option<E>
    where
        E: Clone,
    {
        if overwrite {
            slot.elem.replace(element)
        } else {
            slot.elem.clone()
        }
    }

    // Return slot of the list head for element's key.
    fn find_head(&self, element: &E, count: bool) -> Option<usize> {
        let n = self.slots.len();
        let mut i = self.index_of(self.ops.hash_element(element, true));
        loop {
            match &self.slots[i] {
                Slot { elem: None, .. } => break None,
                Slot { elem: Some(e), prev, .. }
                    if *prev == I::INVALID
                        && self.ops.is_equal_element_element(element, e, true) =>
                {
                    break Some(i)
                }
                _ => i = (i + 1) % n,
            }
            if count {
                self.n_probes_f.fetch_add(1, Relaxed);
            }
        }
    }

    // Return slot holding the element equal by identity to `element`.
    fn find_element(&self, element: &E, count: bool) -> Option<usize> {
        let i = self.find_head(element, count)?;
        match &self.slots[i].elem {
            Some(e) if self.ops.is_equal_element_element(element, e, false) => {
                return Some(i);
            }
            _ => (),
        }

        let n = self.slots.len();
        let mut j = self.index_of(self.ops.hash_element(element, false));
        loop {
            match &self.slots[j].elem {
                None => break None,
                Some(e) if self.ops.is_equal_element_element(element, e, false) => {
                    break Some(j)
                }
                _ => j = (j + 1) % n,
            }
            if count {
                self.n_probes_f.fetch_add(1, Relaxed);
            }
        }
    }

    fn collect(&self, mut i: usize, limit: usize) -> Vec<&E> {
        let mut items = vec![];
        loop {
            if let Some(e) = self.slots[i].elem.as_ref() {
                items.push(e)
            }
            match self.slots[i].next {
                _ if limit > 0 && items.len() >= limit => break items,
                next if next == I::INVALID => break items,
                next => i = next.to_usize(),
            }
        }
    }

    // Slot `i` just got emptied, move back later entries that can no
    // longer be reached from their ideal position.
    fn heal_hole(&mut self, mut i: usize) {
        let n = self.slots.len();
        let mut j = (i + 1) % n;
        loop {
            let k = match &self.slots[j] {
                Slot { elem: None, .. } => break,
                Slot { elem: Some(e), prev, .. } => {
                    self.index_of(self.ops.hash_element(e, *prev == I::INVALID))
                }
            };
            self.n_probes_d += 1;

            if (j > i && (k <= i || k > j)) || (j < i && (k <= i && k > j)) {
                let slot = mem::replace(&mut self.slots[j], Slot::empty());
                if slot.prev != I::INVALID {
                    self.slots[slot.prev.to_usize()].next = I::from_usize(i);
                }
                if slot.next != I::INVALID {
                    self.slots[slot.next.to_usize()].prev = I::from_usize(i);
                }
                self.slots[i] = slot;
                i = j;
            }
            j = (j + 1) % n;
        }
    }
}

/// Statistic type, for [AssocMulti].
#[derive(Clone, Debug, Default)]
pub struct Stats {
    pub n_count: usize,
    pub capacity: usize,
    pub memory: usize,
    pub n_finds: usize,
    pub n_adds: usize,
    pub n_removes: usize,
    pub n_resizes: usize,
    /// Probes made by lookups.
    pub n_probes_f: usize,
    /// Probes made by inserts.
    pub n_probes_a: usize,
    /// Probes made while healing holes after removal.
    pub n_probes_d: usize,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(
            f,
            concat!(
                "{{ n_count = {}, capacity = {}, memory = {}, n_finds = {}, ",
                "n_adds = {}, n_removes = {}, n_resizes = {}, ",
                "n_probes_f = {}, n_probes_a = {}, n_probes_d = {} }}"
            ),
            self.n_count,
            self.capacity,
            self.memory,
            self.n_finds,
            self.n_adds,
            self.n_removes,
            self.n_resizes,
            self.n_probes_f,
            self.n_probes_a,
            self.n_probes_d,
        )
    }
}

#[cfg(test)]
#[path = "multi_test.rs"]
mod multi_test;
