use rand::{rngs::SmallRng, Rng, SeedableRng};

use std::{ptr::NonNull, result, sync::Arc, thread, time};

use revcache::pool::{Allocator, Arena, BRICKS_PER_CHUNK};

use crate::{get_property, load_profile, Opt};

#[derive(Clone)]
pub struct Profile {
    bricks_per_chunk: usize,
    block_size: usize,
    threads: usize,
    allocs: usize,
    // live blocks held by a thread before it frees half of them.
    batch: usize,
}

impl Default for Profile {
    fn default() -> Profile {
        Profile {
            bricks_per_chunk: BRICKS_PER_CHUNK,
            block_size: 64,
            threads: num_cpus::get(),
            allocs: 1_000_000,
            batch: 10_000,
        }
    }
}

impl Profile {
    fn from_toml(v: toml::Value) -> result::Result<Profile, String> {
        let p: Profile = Default::default();

        let p = Profile {
            bricks_per_chunk: get_property!(
                v,
                "pool",
                "bricks_per_chunk",
                as_integer,
                p.bricks_per_chunk as i64
            ) as usize,
            block_size: get_property!(v, "pool", "block_size", as_integer, p.block_size as i64)
                as usize,
            threads: get_property!(v, "pool", "threads", as_integer, p.threads as i64) as usize,
            allocs: get_property!(v, "pool", "allocs", as_integer, p.allocs as i64) as usize,
            batch: get_property!(v, "pool", "batch", as_integer, p.batch as i64) as usize,
        };

        match p.bricks_per_chunk {
            0 => Err("bricks_per_chunk must be > 0".to_string()),
            _ if p.batch < 2 => Err("batch must be >= 2".to_string()),
            _ => Ok(p),
        }
    }
}

pub fn perf(opts: Opt) -> result::Result<(), String> {
    let p = Profile::from_toml(load_profile(&opts)?)?;

    let arena = Arc::new(Arena::new(p.bricks_per_chunk));
    let allocator = {
        let val = Allocator::new(Arc::clone(&arena), p.block_size);
        Arc::new(val.map_err(|e| e.to_string())?)
    };

    let start = time::Instant::now();
    let mut handles = vec![];
    for j in 0..p.threads {
        let (p, allocator) = (p.clone(), Arc::clone(&allocator));
        let seed = opts.seed + ((j as u128) * 100);
        handles.push(thread::spawn(move || do_allocs(j, seed, p, allocator)));
    }
    let mut n_allocs = 0;
    for handle in handles.into_iter() {
        n_allocs += handle.join().map_err(|_| "thread panic".to_string())??;
    }
    println!(
        "revcache-pool: {} allocs/frees across {} threads took {:?}",
        n_allocs,
        p.threads,
        start.elapsed()
    );

    println!("revcache-pool: allocator {}", allocator.to_stats().map_err(|e| e.to_string())?);
    println!("revcache-pool: arena {}", arena.to_stats().map_err(|e| e.to_string())?);

    Ok(())
}

fn do_allocs(
    j: usize,
    seed: u128,
    p: Profile,
    allocator: Arc<Allocator>,
) -> result::Result<usize, String> {
    let mut rng = SmallRng::from_seed(seed.to_le_bytes());
    let mut live: Vec<NonNull<u8>> = Vec::with_capacity(p.batch);

    let start = time::Instant::now();
    for i in 0..p.allocs {
        let block = allocator.allocate().map_err(|e| e.to_string())?;
        unsafe { block.as_ptr().write((i % 256) as u8) };
        live.push(block);

        if live.len() >= p.batch {
            for _ in 0..(p.batch / 2) {
                let block = live.swap_remove(rng.gen::<usize>() % live.len());
                unsafe { allocator.free(block) }.map_err(|e| e.to_string())?;
            }
        }
    }
    for block in live.into_iter() {
        unsafe { allocator.free(block) }.map_err(|e| e.to_string())?;
    }

    println!("revcache-pool-{} {} allocs took {:?}", j, p.allocs, start.elapsed());
    Ok(p.allocs)
}
