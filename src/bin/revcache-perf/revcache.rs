use rand::{rngs::SmallRng, Rng, SeedableRng};

use std::{
    collections::HashMap,
    convert::TryInto,
    result,
    sync::{
        atomic::{AtomicBool, Ordering::SeqCst},
        Arc, RwLock,
    },
    thread, time,
};

use revcache::{
    revision::{ChunkAllocator, Config, Resolver, RevisionsCache, TomlConfig},
    Result,
};

use crate::{get_property, load_profile, Opt};

#[derive(Clone)]
pub struct Profile {
    config: Config,
    revisions: u64,
    body_size: usize,
    loads: usize,
    writers: usize,
    readers: usize,
    stores: usize,
    lookups: usize,
    // milliseconds between compaction rounds, zero disables it.
    compact_interval: u64,
}

impl Default for Profile {
    fn default() -> Profile {
        Profile {
            config: Config::new(),
            revisions: 100_000,
            body_size: 512,
            loads: 100_000,
            writers: 1,
            readers: num_cpus::get(),
            stores: 100_000,
            lookups: 1_000_000,
            compact_interval: 100,
        }
    }
}

impl Profile {
    fn from_toml(v: toml::Value) -> result::Result<Profile, String> {
        let p: Profile = Default::default();

        let config: Config = match v.get("revcache").and_then(|s| s.get("config")) {
            Some(c) => {
                let cfg: TomlConfig = c.clone().try_into().map_err(|e| format!("{}", e))?;
                cfg.into()
            }
            None => p.config.clone(),
        };
        // invalid startup configuration is fatal.
        if let Err(err) = config.validate() {
            panic!("revcache-perf: {}", err)
        }

        let p = Profile {
            config,
            revisions: get_property!(v, "revcache", "revisions", as_integer, p.revisions as i64)
                as u64,
            body_size: get_property!(v, "revcache", "body_size", as_integer, p.body_size as i64)
                as usize,
            loads: get_property!(v, "revcache", "loads", as_integer, p.loads as i64) as usize,
            writers: get_property!(v, "revcache", "writers", as_integer, p.writers as i64)
                as usize,
            readers: get_property!(v, "revcache", "readers", as_integer, p.readers as i64)
                as usize,
            stores: get_property!(v, "revcache", "stores", as_integer, p.stores as i64) as usize,
            lookups: get_property!(v, "revcache", "lookups", as_integer, p.lookups as i64)
                as usize,
            compact_interval: get_property!(
                v,
                "revcache",
                "compact_interval",
                as_integer,
                p.compact_interval as i64
            ) as u64,
        };

        match p.revisions {
            0 => Err("revisions must be > 0".to_string()),
            _ => Ok(p),
        }
    }
}

/// Storage engine stand-in, documents are synthesized from the revision.
struct Engine {
    body_size: usize,
    wal: Arc<RwLock<Wal>>,
}

type Wal = HashMap<(u64, u64), Vec<u8>>;

fn make_body(revision: u64, body_size: usize) -> Vec<u8> {
    let mut body = revision.to_le_bytes().to_vec();
    body.resize(body_size.max(8), (revision % 251) as u8);
    body
}

impl Resolver for Engine {
    fn read_wal(&self, logfile: u64, offset: u64) -> Result<Option<Vec<u8>>> {
        match self.wal.read() {
            Ok(wal) => Ok(wal.get(&(logfile, offset)).cloned()),
            Err(err) => revcache::err_at!(Fatal, msg: "{}", err),
        }
    }

    fn read_engine(&self, revision: u64) -> Result<Option<Vec<u8>>> {
        Ok(Some(make_body(revision, self.body_size)))
    }
}

pub fn perf(opts: Opt) -> result::Result<(), String> {
    let p = Profile::from_toml(load_profile(&opts)?)?;

    let allocator = {
        let val = ChunkAllocator::new(p.config.clone()).map_err(|e| e.to_string())?;
        Arc::new(val)
    };
    let wal = Arc::new(RwLock::new(Wal::new()));
    let engine = Engine {
        body_size: p.body_size,
        wal: Arc::clone(&wal),
    };
    let cache = Arc::new(RevisionsCache::new(
        "revcache-perf",
        Arc::clone(&allocator),
        engine,
    ));

    initial_load(&opts, &p, &wal, &cache)?;

    let done = Arc::new(AtomicBool::new(false));
    let compactor = {
        let (cache, done) = (Arc::clone(&cache), Arc::clone(&done));
        let interval = p.compact_interval;
        thread::spawn(move || do_compact(interval, cache, done))
    };

    let mut handles = vec![];
    for j in 0..(p.writers + p.readers) {
        let (p, cache) = (p.clone(), Arc::clone(&cache));
        let seed = opts.seed + ((j as u128) * 100);
        let writer = j < p.writers;
        handles.push(thread::spawn(move || incr_load(j, seed, writer, p, cache)));
    }
    for handle in handles.into_iter() {
        handle.join().map_err(|_| "thread panic".to_string())??;
    }

    done.store(true, SeqCst);
    let n_compacts = compactor.join().map_err(|_| "thread panic".to_string())??;
    println!("revcache-perf: {} compaction rounds", n_compacts);

    let stats = cache.to_stats().map_err(|e| e.to_string())?;
    println!("revcache-perf: cache {}", stats);
    println!("revcache-perf: allocator {}", allocator.to_stats());

    Ok(())
}

// every fourth revision starts out in the write-ahead-log.
fn initial_load(
    opts: &Opt,
    p: &Profile,
    wal: &RwLock<Wal>,
    cache: &RevisionsCache<Engine>,
) -> result::Result<(), String> {
    let mut rng = SmallRng::from_seed(opts.seed.to_le_bytes());

    let start = time::Instant::now();
    for i in 0..p.loads {
        let revision = rng.gen::<u64>() % p.revisions;
        let body = make_body(revision, p.body_size);
        if i % 4 == 0 {
            let (logfile, offset) = (revision % 8, revision);
            match wal.write() {
                Ok(mut wal) => wal.insert((logfile, offset), body),
                Err(err) => return Err(err.to_string()),
            };
            cache.insert_wal(revision, logfile, offset);
        } else {
            cache.store(revision, &body).map_err(|e| e.to_string())?;
        }
    }

    println!("revcache-perf: loaded {} revisions in {:?}", p.loads, start.elapsed());
    Ok(())
}

fn incr_load(
    j: usize,
    seed: u128,
    writer: bool,
    p: Profile,
    cache: Arc<RevisionsCache<Engine>>,
) -> result::Result<(), String> {
    let mut rng = SmallRng::from_seed(seed.to_le_bytes());

    let start = time::Instant::now();
    let (mut n_ops, mut n_found, mut n_oom) = (0, 0, 0);
    match writer {
        true => {
            for _i in 0..p.stores {
                let revision = rng.gen::<u64>() % p.revisions;
                match cache.store(revision, &make_body(revision, p.body_size)) {
                    Ok(()) => (),
                    Err(err) if err.is_out_of_memory() => n_oom += 1,
                    Err(err) => return Err(err.to_string()),
                }
                n_ops += 1;
            }
        }
        false => {
            for _i in 0..p.lookups {
                let revision = rng.gen::<u64>() % p.revisions;
                let body = cache.lookup_revision(revision).map_err(|e| e.to_string())?;
                if let Some(body) = body {
                    let want = u64::from_le_bytes(body[..8].try_into().unwrap_or([0; 8]));
                    assert_eq!(want, revision, "corrupt body for {}", revision);
                    n_found += 1;
                }
                n_ops += 1;
            }
        }
    }

    let elapsed = start.elapsed();
    match writer {
        true => println!("revcache-perf-{} stores:{} oom:{} took {:?}", j, n_ops, n_oom, elapsed),
        false => println!(
            "revcache-perf-{} lookups:{} found:{} took {:?}",
            j, n_ops, n_found, elapsed
        ),
    }
    Ok(())
}

fn do_compact(
    interval: u64,
    cache: Arc<RevisionsCache<Engine>>,
    done: Arc<AtomicBool>,
) -> result::Result<usize, String> {
    let mut n = 0;
    while interval > 0 && !done.load(SeqCst) {
        thread::sleep(time::Duration::from_millis(interval));
        let start = time::Instant::now();
        let n_chunks = cache.compact().map_err(|e| e.to_string())?;
        if n_chunks > 0 {
            println!("revcache-perf: compacted {} chunks in {:?}", n_chunks, start.elapsed());
        }
        n += 1;
    }
    Ok(n)
}
