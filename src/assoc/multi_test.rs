use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::collections::{BTreeMap, BTreeSet};

use super::*;
use crate::{hash::city_hash, Error};

#[derive(Clone, Debug, PartialEq)]
struct Item {
    key: u64,
    id: u64,
    val: u64,
}

impl Item {
    fn new(key: u64, id: u64) -> Item {
        Item { key, id, val: 0 }
    }
}

// well spread hash.
struct Ops;

impl ElementOps<u64, Item> for Ops {
    fn hash_key(&self, key: &u64) -> u64 {
        city_hash(key)
    }

    fn hash_element(&self, e: &Item, by_key: bool) -> u64 {
        match by_key {
            true => city_hash(&e.key),
            false => city_hash(&(e.key, e.id)),
        }
    }

    fn is_equal_key_element(&self, key: &u64, e: &Item) -> bool {
        *key == e.key
    }

    fn is_equal_element_element(&self, a: &Item, b: &Item, by_key: bool) -> bool {
        match by_key {
            true => a.key == b.key,
            false => a.key == b.key && a.id == b.id,
        }
    }
}

// few hash values, long probe runs that wrap around.
struct CollideOps;

impl ElementOps<u64, Item> for CollideOps {
    fn hash_key(&self, key: &u64) -> u64 {
        u64::MAX - (key % 3)
    }

    fn hash_element(&self, e: &Item, by_key: bool) -> u64 {
        match by_key {
            true => self.hash_key(&e.key),
            false => u64::MAX - (e.id % 5),
        }
    }

    fn is_equal_key_element(&self, key: &u64, e: &Item) -> bool {
        *key == e.key
    }

    fn is_equal_element_element(&self, a: &Item, b: &Item, by_key: bool) -> bool {
        Ops.is_equal_element_element(a, b, by_key)
    }
}

fn to_ids(items: Vec<&Item>) -> Vec<u64> {
    let mut ids: Vec<u64> = items.into_iter().map(|e| e.id).collect();
    ids.sort_unstable();
    ids
}

#[test]
fn test_assoc_multiplicity() {
    let mut table: AssocMulti<u64, Item, Ops> = AssocMulti::new("test", Ops).unwrap();
    assert!(table.is_empty());

    for id in 0..50 {
        assert_eq!(table.insert(Item::new(7, id), false).unwrap(), None);
        assert_eq!(table.insert(Item::new(id + 100, id), false).unwrap(), None);
    }
    assert_eq!(table.len(), 100);
    table.validate().unwrap();

    let ids = to_ids(table.lookup_by_key(&7));
    assert_eq!(ids, (0..50).collect::<Vec<u64>>());
    for id in 0..50 {
        assert_eq!(to_ids(table.lookup_by_key(&(id + 100))), vec![id]);
    }
    assert!(table.lookup_by_key(&8).is_empty());

    let items = table.lookup_with_element_by_key(&Item::new(7, 1000));
    assert_eq!(to_ids(items), (0..50).collect::<Vec<u64>>());
    assert!(table.lookup_with_element_by_key(&Item::new(8, 0)).is_empty());

    assert_eq!(table.lookup(&Item::new(7, 10)), Some(&Item::new(7, 10)));
    assert_eq!(table.lookup(&Item::new(7, 50)), None);
}

#[test]
fn test_assoc_duplicate() {
    let mut table: AssocMulti<u64, Item, Ops> = AssocMulti::new("test", Ops).unwrap();

    for id in 0..5 {
        table.insert(Item::new(1, id), false).unwrap();
    }

    // duplicate of head and of a list member.
    for id in [0, 3].iter() {
        let mut item = Item::new(1, *id);
        item.val = 10;
        let old = table.insert(item.clone(), false).unwrap();
        assert_eq!(old, Some(Item::new(1, *id)));
        assert_eq!(table.lookup(&item).unwrap().val, 0);

        item.val = 20;
        let old = table.insert(item.clone(), true).unwrap();
        assert_eq!(old, Some(Item::new(1, *id)));
        assert_eq!(table.lookup(&item).unwrap().val, 20);
    }

    assert_eq!(table.len(), 5);
    assert_eq!(table.lookup_by_key(&1).len(), 5);
    table.validate().unwrap();
}

#[test]
fn test_assoc_remove_reinsert() {
    let mut table: AssocMulti<u64, Item, Ops> = AssocMulti::new("test", Ops).unwrap();

    for id in 0..30 {
        table.insert(Item::new(id % 3, id), false).unwrap();
    }

    // remove heads, middle members and tails.
    for id in 0..30 {
        let item = Item::new(id % 3, id);
        assert_eq!(table.remove(&item), Some(item.clone()));
        assert_eq!(table.lookup(&item), None);
        assert_eq!(table.remove(&item), None);
        table.validate().unwrap();

        let want: Vec<u64> = ((id + 1)..30).filter(|x| x % 3 == id % 3).collect();
        assert_eq!(to_ids(table.lookup_by_key(&(id % 3))), want);

        assert_eq!(table.insert(item.clone(), false).unwrap(), None);
        assert_eq!(table.lookup(&item), Some(&item));
        assert_eq!(table.remove(&item), Some(item.clone()));
    }
    assert!(table.is_empty());
    table.validate().unwrap();
}

#[test]
fn test_assoc_lookup_continue() {
    let mut table: AssocMulti<u64, Item, Ops> = AssocMulti::new("test", Ops).unwrap();
    for id in 0..20 {
        table.insert(Item::new(5, id), false).unwrap();
    }

    let all: Vec<Item> = table.lookup_by_key(&5).into_iter().cloned().collect();
    assert_eq!(all.len(), 20);

    let page = table.lookup_by_key_continue(&all[0], 5);
    assert_eq!(page, all[1..6].iter().collect::<Vec<&Item>>());
    let page = table.lookup_by_key_continue(&all[5], 0);
    assert_eq!(page, all[6..].iter().collect::<Vec<&Item>>());
    assert!(table.lookup_by_key_continue(&all[19], 5).is_empty());
    assert!(table.lookup_by_key_continue(&Item::new(5, 100), 5).is_empty());
}

fn random_ops<O, I>(name: &str, seed: u64, n_ops: usize, mut table: AssocMulti<u64, Item, O, I>)
where
    O: ElementOps<u64, Item>,
    I: SlotIndex,
{
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut refm: BTreeMap<u64, BTreeSet<u64>> = BTreeMap::new();
    let mut n_count = 0;

    for i in 0..n_ops {
        let item = Item::new(rng.gen::<u64>() % 20, rng.gen::<u64>() % ((n_ops / 40) as u64));
        match rng.gen::<u8>() % 3 {
            0 | 1 => {
                let old = table.insert(item.clone(), false).unwrap();
                let fresh = refm.entry(item.key).or_default().insert(item.id);
                assert_eq!(old.is_none(), fresh, "{} insert {:?}", name, item);
                n_count += fresh as usize;
            }
            _ => {
                let old = table.remove(&item);
                let found = refm.entry(item.key).or_default().remove(&item.id);
                assert_eq!(old.is_some(), found, "{} remove {:?}", name, item);
                n_count -= found as usize;
            }
        }
        assert_eq!(table.len(), n_count);
        if i % 1000 == 0 {
            table.validate().unwrap();
        }
    }

    table.validate().unwrap();
    for (key, ids) in refm.iter() {
        let want: Vec<u64> = ids.iter().copied().collect();
        assert_eq!(to_ids(table.lookup_by_key(key)), want, "{} key {}", name, key);
        for id in ids.iter() {
            assert!(table.lookup(&Item::new(*key, *id)).is_some());
        }
    }
    println!("test_assoc_random {} {}", name, table.to_stats());
}

#[test]
fn test_assoc_random() {
    let seed: u64 = random();
    println!("test_assoc_random seed:{}", seed);

    let table: AssocMulti<u64, Item, Ops> = AssocMulti::with_size("ops", Ops, 4).unwrap();
    random_ops("ops", seed, 20_000, table);

    let table: AssocMulti<u64, Item, CollideOps, u64> =
        AssocMulti::with_size("collide", CollideOps, 4).unwrap();
    random_ops("collide", seed, 4_000, table);
}

// 10,000 elements keyed by id mod 10, resize keeps every lookup intact.
#[test]
fn test_assoc_resize() {
    let mut table: AssocMulti<u64, Item, Ops> = AssocMulti::new("test", Ops).unwrap();
    for id in 0..10_000 {
        table.insert(Item::new(id % 10, id), false).unwrap();
    }
    assert_eq!(table.len(), 10_000);
    assert!(table.capacity() >= 20_000);
    table.validate().unwrap();

    let before: Vec<Vec<u64>> = (0..10).map(|k| to_ids(table.lookup_by_key(&k))).collect();
    for (k, ids) in before.iter().enumerate() {
        let want: Vec<u64> = (0..10_000).filter(|id| id % 10 == (k as u64)).collect();
        assert_eq!(ids, &want);
    }

    let capacity = table.capacity();
    table.resize(capacity).unwrap();
    assert!(table.capacity() > capacity);
    table.validate().unwrap();

    let after: Vec<Vec<u64>> = (0..10).map(|k| to_ids(table.lookup_by_key(&k))).collect();
    assert_eq!(before, after);

    match table.resize(9_999) {
        Err(Error::InvalidInput(_, _)) => (),
        res => panic!("unexpected {:?}", res),
    }
    assert_eq!(table.len(), 10_000);

    let stats = table.to_stats();
    println!("test_assoc_resize {}", stats);
    assert_eq!(stats.n_count, 10_000);
    assert_eq!(stats.n_adds, 10_000);
    assert!(stats.n_resizes > 1);
    assert_eq!(stats.memory, table.memory_usage());
}

#[test]
fn test_assoc_clear() {
    let mut table: AssocMulti<u64, Item, Ops, u64> = AssocMulti::new("test", Ops).unwrap();
    for id in 0..1000 {
        table.insert(Item::new(id % 7, id), false).unwrap();
    }
    let capacity = table.capacity();
    table.clear();
    assert!(table.is_empty());
    assert_eq!(table.capacity(), capacity);
    assert!(table.lookup_by_key(&3).is_empty());
    table.validate().unwrap();

    table.insert(Item::new(3, 3), false).unwrap();
    assert_eq!(to_ids(table.lookup_by_key(&3)), vec![3]);
    assert_eq!(table.to_name(), "test".to_string());
}
