use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use super::*;
use crate::revision::Record;

#[test]
fn test_next_prime() {
    assert_eq!(next_prime(0), 2);
    assert_eq!(next_prime(2), 2);
    assert_eq!(next_prime(3), 3);
    assert_eq!(next_prime(4), 5);
    assert_eq!(next_prime(24), 29);
    assert_eq!(next_prime(2 * 16 + 1), 37);
    assert_eq!(next_prime(1_000_000), 1_000_003);

    let seed: u64 = random();
    println!("test_next_prime seed:{}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);
    for _i in 0..1000 {
        let n = rng.gen::<u64>() % 10_000_000;
        let p = next_prime(n);
        assert!(p >= n && is_prime(p), "n:{} p:{}", n, p);
        assert!((n..p).all(|x| !is_prime(x)), "n:{} p:{}", n, p);
    }
}

#[test]
fn test_align_up() {
    assert_eq!(align_up(0, 8), 0);
    assert_eq!(align_up(1, 8), 8);
    assert_eq!(align_up(8, 8), 8);
    assert_eq!(align_up(9, 64), 64);
    assert_eq!(align_up(262_145, 262_144), 524_288);
}

#[test]
fn test_cbor_bytes() {
    let record = Record::new(42, b"hello world");
    let data = into_cbor_bytes(record.clone()).unwrap();
    let (val, n): (Record, usize) = from_cbor_bytes(&data).unwrap();
    assert_eq!(n, data.len());
    assert_eq!(val, record);

    // trailing bytes are left alone.
    let mut more = data.clone();
    more.extend_from_slice(&[0, 1, 2]);
    let (val, n): (Record, usize) = from_cbor_bytes(&more).unwrap();
    assert_eq!(n, data.len());
    assert_eq!(val, record);
}
