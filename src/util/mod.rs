//! Module implement common utility functions and types.

use cbordata::{Cbor, FromCbor, IntoCbor};
use lazy_static::lazy_static;

use crate::Result;

pub mod spinlock;

pub use spinlock::Spinlock;

/// Trial division covers candidates below `SIEVE_LIMIT * SIEVE_LIMIT`,
/// far beyond any table capacity this package would allocate.
const SIEVE_LIMIT: usize = 1 << 20;

lazy_static! {
    static ref SMALL_PRIMES: Vec<u64> = sieve(SIEVE_LIMIT);
}

/// Helper function to serialize value `T` implementing IntoCbor, into byte-string.
pub fn into_cbor_bytes<T>(val: T) -> Result<Vec<u8>>
where
    T: IntoCbor,
{
    let mut data: Vec<u8> = vec![];
    let n = err_at!(
        FailCbor,
        err_at!(FailCbor, val.into_cbor())?.encode(&mut data)
    )?;
    if n != data.len() {
        err_at!(Fatal, msg: "cbor encoding len mistmatch {} {}", n, data.len())
    } else {
        Ok(data)
    }
}

/// Helper function to deserialize value `T` implementing FromCbor, from byte-string.
/// Return (value, bytes-consumed)
pub fn from_cbor_bytes<T>(mut data: &[u8]) -> Result<(T, usize)>
where
    T: FromCbor,
{
    let (val, n) = err_at!(FailCbor, Cbor::decode(&mut data))?;
    Ok((err_at!(FailCbor, T::from_cbor(val))?, n))
}

/// Round `n` up to the next multiple of `align`, which must be a power of 2.
#[inline]
pub fn align_up(n: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (n + align - 1) & !(align - 1)
}

/// Return the smallest prime that is greater than or equal to `n`.
pub fn next_prime(n: u64) -> u64 {
    let mut candidate = match n {
        0..=2 => return 2,
        n if n % 2 == 0 => n + 1,
        n => n,
    };
    while !is_prime(candidate) {
        candidate += 2;
    }
    candidate
}

/// Return whether `n` is a prime number.
pub fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    for p in SMALL_PRIMES.iter() {
        if p * p > n {
            return true;
        } else if n % p == 0 {
            return n == *p;
        }
    }
    true
}

fn sieve(limit: usize) -> Vec<u64> {
    let mut composite = vec![false; limit + 1];
    let mut primes = vec![];
    for i in 2..=limit {
        if !composite[i] {
            primes.push(i as u64);
            let mut j = i * i;
            while j <= limit {
                composite[j] = true;
                j += i;
            }
        }
    }
    primes
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;
