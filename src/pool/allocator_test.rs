use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::{
    collections::HashSet,
    sync::{mpsc, Arc, Barrier, Mutex},
    thread,
};

use super::*;
use crate::pool::BRICK_SIZE;

#[test]
fn test_allocator_single_thread() {
    let seed: u64 = random();
    println!("test_allocator_single_thread seed:{}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let arena = Arc::new(Arena::new(2));
    let allocator = Allocator::new(Arc::clone(&arena), 1024).unwrap();

    let mut live: Vec<usize> = vec![];
    for _i in 0..20_000 {
        match rng.gen::<u8>() % 5 {
            0..=2 => {
                let block = allocator.allocate().unwrap();
                unsafe { std::ptr::write_bytes(block.as_ptr(), 0xAB, 1024) };
                live.push(block.as_ptr() as usize);
            }
            _ if !live.is_empty() => {
                let block = live.swap_remove(rng.gen::<usize>() % live.len());
                let block = std::ptr::NonNull::new(block as *mut u8).unwrap();
                unsafe { allocator.free(block).unwrap() };
            }
            _ => (),
        }
    }

    let uniq: HashSet<usize> = live.iter().copied().collect();
    assert_eq!(uniq.len(), live.len());
    let stats = allocator.to_stats().unwrap();
    assert_eq!(stats.n_used, live.len());
    println!("test_allocator_single_thread {}", stats);

    for block in live.into_iter() {
        let block = std::ptr::NonNull::new(block as *mut u8).unwrap();
        unsafe { allocator.free(block).unwrap() };
    }
    let stats = allocator.to_stats().unwrap();
    assert_eq!(stats.n_used, 0);
    assert_eq!(stats.n_full + stats.n_not_full, 0);

    // at most the current brick stays with allocator.
    assert!(arena.to_stats().unwrap().n_bricks <= 1);
    std::mem::drop(allocator);
    assert_eq!(arena.to_stats().unwrap().n_bricks, 0);
}

#[test]
fn test_allocator_brick_sets() {
    let arena = Arc::new(Arena::new(4));
    let allocator = Allocator::new(Arc::clone(&arena), 65536).unwrap();
    let per_brick = (BRICK_SIZE - Brick::HEADER_SIZE) / 65536;

    let blocks: Vec<_> = (0..(per_brick * 3))
        .map(|_| allocator.allocate().unwrap())
        .collect();
    let stats = allocator.to_stats().unwrap();
    assert_eq!(stats.n_used, per_brick * 3);
    // the third brick is full but stays current until next allocate.
    assert_eq!(stats.n_full, 2);
    assert_eq!(stats.n_current, 1);

    // freeing one block from a full brick makes it not-full.
    unsafe { allocator.free(blocks[0]).unwrap() };
    let stats = allocator.to_stats().unwrap();
    assert_eq!(stats.n_full, 1);
    assert_eq!(stats.n_not_full, 1);

    // emptying the not-full brick hands it back to the arena.
    for block in blocks[1..per_brick].iter() {
        unsafe { allocator.free(*block).unwrap() };
    }
    let stats = allocator.to_stats().unwrap();
    assert_eq!(stats.n_not_full, 0);
    assert_eq!(arena.to_stats().unwrap().n_bricks, 2);

    for block in blocks[per_brick..].iter() {
        unsafe { allocator.free(*block).unwrap() };
    }
    assert_eq!(allocator.to_stats().unwrap().n_used, 0);
}

// 4 threads allocate blocks out of single-brick chunks, every block is
// freed by a different thread than the one that allocated it. Live blocks
// are checked against the allocator's count whenever all threads are
// parked.
fn cross_thread(name: &str, seed: u64, block_size: usize, n_blocks: usize) {
    let n_threads = 4;
    let n_cycles = 100;

    let arena = Arc::new(Arena::new(1));
    let allocator = Arc::new(Allocator::new(Arc::clone(&arena), block_size).unwrap());
    let live = Arc::new(Mutex::new(HashSet::<usize>::new()));
    let barrier = Arc::new(Barrier::new(n_threads));

    let (txs, rxs): (Vec<_>, Vec<_>) = (0..n_threads).map(|_| mpsc::channel()).unzip();

    let mut handles = vec![];
    for (id, rx) in rxs.into_iter().enumerate() {
        let allocator = Arc::clone(&allocator);
        let live = Arc::clone(&live);
        let barrier = Arc::clone(&barrier);
        let tx: mpsc::Sender<Vec<usize>> = txs[(id + 1) % n_threads].clone();
        let seed = seed + (id as u64);
        handles.push(thread::spawn(move || {
            let quiescent = |cycle: usize| {
                if barrier.wait().is_leader() {
                    let n_used = allocator.to_stats().unwrap().n_used;
                    let n_live = live.lock().unwrap().len();
                    assert_eq!(n_used, n_live, "cycle {}", cycle);
                }
                barrier.wait();
            };

            let mut rng = SmallRng::seed_from_u64(seed);
            for cycle in 0..n_cycles {
                let n = rng.gen::<usize>() % n_blocks;
                let mut blocks = vec![];
                for _i in 0..n {
                    let block = allocator.allocate().unwrap();
                    unsafe { std::ptr::write_bytes(block.as_ptr(), id as u8, block_size) };
                    let addr = block.as_ptr() as usize;
                    assert!(live.lock().unwrap().insert(addr), "block handed out twice");
                    blocks.push(addr);
                }
                quiescent(cycle);
                tx.send(blocks).unwrap();

                // free what the neighbour sent us.
                let blocks: Vec<usize> = rx.recv().unwrap();
                for addr in blocks.into_iter() {
                    assert!(live.lock().unwrap().remove(&addr));
                    let block = std::ptr::NonNull::new(addr as *mut u8).unwrap();
                    unsafe { allocator.free(block).unwrap() };
                }
                quiescent(cycle);
            }
        }));
    }
    std::mem::drop(txs);

    for handle in handles.into_iter() {
        handle.join().unwrap();
    }

    let stats = allocator.to_stats().unwrap();
    assert_eq!(stats.n_used, 0);
    println!("test_allocator_cross_thread {} {}", name, stats);

    std::mem::drop(allocator);
    assert_eq!(arena.to_stats().unwrap().n_bricks, 0);
}

#[test]
fn test_allocator_cross_thread() {
    let seed: u64 = random();
    println!("test_allocator_cross_thread seed:{}", seed);

    cross_thread("small", seed, 64, 1000);
    // four blocks to a brick, bricks empty out and chunks are released
    // while other threads are still freeing into them.
    cross_thread("large", seed, BRICK_SIZE / 4 - 64, 12);
}

// entries for allocators dropped on other threads are pruned the next time
// this thread picks a current brick.
#[test]
fn test_allocator_prune_current() {
    let arena = Arc::new(Arena::new(1));
    let before = n_current_entries();

    let mut addrs = vec![];
    let mut allocators = vec![];
    for _i in 0..2 {
        let allocator = Arc::new(Allocator::new(Arc::clone(&arena), 64).unwrap());
        addrs.push(allocator.allocate().unwrap().as_ptr() as usize);
        allocators.push(allocator);
    }
    assert_eq!(n_current_entries(), before + 2);

    thread::spawn(move || {
        for (allocator, addr) in allocators.into_iter().zip(addrs.into_iter()) {
            let block = std::ptr::NonNull::new(addr as *mut u8).unwrap();
            unsafe { allocator.free(block).unwrap() };
        }
    })
    .join()
    .unwrap();
    assert_eq!(n_current_entries(), before + 2);

    let allocator = Allocator::new(Arc::clone(&arena), 64).unwrap();
    let block = allocator.allocate().unwrap();
    assert_eq!(n_current_entries(), before + 1);
    unsafe { allocator.free(block).unwrap() };
    assert_eq!(n_current_entries(), before);

    std::mem::drop(allocator);
    assert_eq!(arena.to_stats().unwrap().n_bricks, 0);
}
