use arbitrary::Unstructured;
use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::thread;

use super::*;

const MB: usize = 1024 * 1024;

#[test]
fn test_allocator_budget() {
    let mut config = Config::new();
    config.set_chunk_size(MB).set_target_size(4 * MB);
    let allocator = ChunkAllocator::new(config).unwrap();

    let chunks: Vec<_> = (0..5).map(|_| allocator.order_chunk(MB).unwrap()).collect();
    assert_eq!(allocator.total_allocated(), 5 * MB);
    assert_eq!(allocator.freelist_len(), 0);

    for chunk in chunks.into_iter() {
        chunk.seal();
        chunk.invalidate();
        allocator.return_chunk(chunk);
    }
    let total = allocator.total_allocated();
    assert!(total <= 4 * MB, "{}", total);
    assert_eq!(allocator.freelist_len(), 4);

    let chunk = allocator.order_chunk(MB).unwrap();
    assert_eq!(allocator.total_allocated(), total);
    assert_eq!(allocator.freelist_len(), 3);
    assert!(!chunk.is_sealed());
    assert_eq!(chunk.write_offset(), 0);

    let stats = allocator.to_stats();
    println!("test_allocator_budget {}", stats);
    assert_eq!(stats.n_ordered, 5);
    assert_eq!(stats.n_reused, 1);
    assert_eq!(stats.n_freed, 1);
}

#[test]
fn test_allocator_large_order() {
    let mut config = Config::new();
    config.set_chunk_size(64 * 1024).set_target_size(MB);
    let allocator = ChunkAllocator::new(config).unwrap();

    let small = allocator.order_chunk(100).unwrap();
    assert_eq!(small.size(), 64 * 1024);

    let large = allocator.order_chunk(100 * 1024 + 1).unwrap();
    assert_eq!(large.size(), util::align_up(100 * 1024 + 1, PAGE_SIZE));
    assert_eq!(allocator.total_allocated(), small.size() + large.size());

    // a small chunk in freelist does not satisfy a large order.
    allocator.return_chunk(small);
    let large2 = allocator.order_chunk(100 * 1024).unwrap();
    assert!(large2.size() >= 100 * 1024);
    assert_eq!(allocator.freelist_len(), 1);

    allocator.return_chunk(large);
    allocator.return_chunk(large2);
    assert_eq!(allocator.freelist_len(), 3);
}

#[test]
fn test_allocator_freelist_limit() {
    let mut config = Config::new();
    config
        .set_chunk_size(16 * 1024)
        .set_target_size(16 * MB)
        .set_freelist_limit(2);
    let allocator = ChunkAllocator::new(config).unwrap();

    let chunks: Vec<_> = (0..5).map(|_| allocator.order_chunk(1).unwrap()).collect();
    for chunk in chunks.into_iter() {
        allocator.return_chunk(chunk);
    }
    assert_eq!(allocator.freelist_len(), 2);
    assert_eq!(allocator.total_allocated(), 2 * 16 * 1024);
}

#[test]
fn test_allocator_bad_config() {
    let mut config = Config::new();
    config.set_chunk_size(MB).set_target_size(MB / 2);
    assert!(ChunkAllocator::new(config).is_err());
}

#[test]
fn test_allocator_concurrent() {
    let seed: u64 = random();
    println!("test_allocator_concurrent seed:{}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let config: Config = {
        let bytes = rng.gen::<[u8; 32]>();
        let mut uns = Unstructured::new(&bytes);
        uns.arbitrary().unwrap()
    };
    println!("test_allocator_concurrent {:?}", config);
    let allocator = Arc::new(ChunkAllocator::new(config.clone()).unwrap());
    let chunk_size = config.chunk_size;

    let mut handles = vec![];
    for id in 0..4 {
        let allocator = Arc::clone(&allocator);
        let seed = seed + id;
        handles.push(thread::spawn(move || {
            let mut rng = SmallRng::seed_from_u64(seed);
            let mut held = vec![];
            for _i in 0..1000 {
                match rng.gen::<u8>() % 2 {
                    0 if held.len() < 4 => {
                        let size = rng.gen::<usize>() % (chunk_size * 2);
                        let chunk = allocator.order_chunk(size).unwrap();
                        assert!(chunk.size() >= size);
                        assert_eq!(chunk.write_offset(), 0);
                        held.push(chunk);
                    }
                    _ if !held.is_empty() => {
                        let chunk = held.swap_remove(rng.gen::<usize>() % held.len());
                        chunk.seal();
                        chunk.invalidate();
                        allocator.return_chunk(chunk);
                    }
                    _ => (),
                }
            }
            held.into_iter().for_each(|c| allocator.return_chunk(c));
        }));
    }
    for handle in handles.into_iter() {
        handle.join().unwrap();
    }

    let stats = allocator.to_stats();
    println!("test_allocator_concurrent {}", stats);
    assert!(stats.n_freelist <= config.freelist_limit);
    let held: usize = {
        let inner = allocator.inner.read();
        inner.freelist.iter().map(|c| c.size()).sum()
    };
    assert_eq!(held, allocator.total_allocated());
}
