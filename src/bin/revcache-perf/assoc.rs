use rand::{rngs::SmallRng, Rng, SeedableRng};

use std::{result, time};

use revcache::{
    assoc::{AssocMulti, ElementOps, DEFAULT_SIZE},
    hash::city_hash,
};

use crate::{get_property, load_profile, Opt};

#[derive(Clone)]
pub struct Profile {
    size: usize,
    // number of distinct keys, edges spread evenly across them.
    keys: u64,
    loads: usize,
    lookups: usize,
    removes: usize,
    validate: bool,
}

impl Default for Profile {
    fn default() -> Profile {
        Profile {
            size: DEFAULT_SIZE,
            keys: 10_000,
            loads: 1_000_000,
            lookups: 1_000_000,
            removes: 100_000,
            validate: true,
        }
    }
}

impl Profile {
    fn from_toml(v: toml::Value) -> result::Result<Profile, String> {
        let p: Profile = Default::default();

        let p = Profile {
            size: get_property!(v, "assoc", "size", as_integer, p.size as i64) as usize,
            keys: get_property!(v, "assoc", "keys", as_integer, p.keys as i64) as u64,
            loads: get_property!(v, "assoc", "loads", as_integer, p.loads as i64) as usize,
            lookups: get_property!(v, "assoc", "lookups", as_integer, p.lookups as i64) as usize,
            removes: get_property!(v, "assoc", "removes", as_integer, p.removes as i64) as usize,
            validate: get_property!(v, "assoc", "validate", as_bool, p.validate),
        };

        match p.keys {
            0 => Err("keys must be > 0".to_string()),
            _ => Ok(p),
        }
    }
}

/// Edge from vertex `from` to vertex `to`, indexed by `from`.
#[derive(Clone)]
struct Edge {
    from: u64,
    to: u64,
}

struct EdgeOps;

impl ElementOps<u64, Edge> for EdgeOps {
    fn hash_key(&self, key: &u64) -> u64 {
        city_hash(key)
    }

    fn hash_element(&self, e: &Edge, by_key: bool) -> u64 {
        match by_key {
            true => city_hash(&e.from),
            false => city_hash(&(e.from, e.to)),
        }
    }

    fn is_equal_key_element(&self, key: &u64, e: &Edge) -> bool {
        *key == e.from
    }

    fn is_equal_element_element(&self, a: &Edge, b: &Edge, by_key: bool) -> bool {
        match by_key {
            true => a.from == b.from,
            false => a.from == b.from && a.to == b.to,
        }
    }
}

pub fn perf(opts: Opt) -> result::Result<(), String> {
    let p = Profile::from_toml(load_profile(&opts)?)?;
    let mut rng = SmallRng::from_seed(opts.seed.to_le_bytes());

    let mut table: AssocMulti<u64, Edge, EdgeOps> = {
        let val = AssocMulti::with_size("revcache-perf", EdgeOps, p.size);
        val.map_err(|e| e.to_string())?
    };

    let start = time::Instant::now();
    let mut n_dups = 0;
    for _i in 0..p.loads {
        let edge = Edge {
            from: rng.gen::<u64>() % p.keys,
            to: rng.gen::<u64>(),
        };
        if table.insert(edge, false).map_err(|e| e.to_string())?.is_some() {
            n_dups += 1;
        }
    }
    println!(
        "revcache-assoc: loaded {} edges, {} duplicates, in {:?}",
        p.loads,
        n_dups,
        start.elapsed()
    );

    let start = time::Instant::now();
    let mut n_edges = 0;
    for _i in 0..p.lookups {
        let from = rng.gen::<u64>() % p.keys;
        n_edges += table.lookup_by_key(&from).len();
    }
    println!(
        "revcache-assoc: {} lookups, {} edges, took {:?}",
        p.lookups,
        n_edges,
        start.elapsed()
    );

    let start = time::Instant::now();
    let mut n_removed = 0;
    for _i in 0..p.removes {
        let from = rng.gen::<u64>() % p.keys;
        let edge = table.lookup_by_key(&from).first().map(|e| (*e).clone());
        if let Some(edge) = edge {
            n_removed += table.remove(&edge).map(|_| 1).unwrap_or(0);
        }
    }
    println!(
        "revcache-assoc: removed {} edges in {:?}",
        n_removed,
        start.elapsed()
    );

    println!("revcache-assoc: stats {}", table.to_stats());

    if p.validate {
        print!("revcache-assoc: validating {} edges ... ", table.len());
        table.validate().map_err(|e| e.to_string())?;
        println!("ok");
    }

    Ok(())
}
