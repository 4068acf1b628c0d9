//! Tiny deterministic RNG backing select's randomized fairness.
//!
//! XorShift64 with Lemire bounded sampling and a Fisher-Yates shuffle.
//! Select probes at most a handful of cases per call; this does not need to
//! be (and is not) cryptographic, it needs to be fast and unbiased over
//! small bounds.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};

/// Deterministic generator. Not thread-safe; intended to live per call site
/// or per thread.
///
/// Intentionally `Clone` but not `Copy`: copying an RNG silently duplicates
/// its stream.
#[derive(Clone, Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    /// Creates a generator from `seed`. Seed 0 is remapped to a fixed
    /// non-zero constant to avoid the all-zero lockup state.
    #[inline]
    pub fn new(seed: u64) -> Self {
        let seed = if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed };
        Self { state: seed }
    }

    /// Creates a generator seeded from OS-provided hasher entropy.
    ///
    /// `RandomState` draws fresh per-process keys from the OS; finishing an
    /// empty hash of a distinct `RandomState` yields a cheap unpredictable
    /// seed without pulling in an RNG crate.
    pub fn from_entropy() -> Self {
        let seed = RandomState::new().build_hasher().finish();
        Self::new(seed)
    }

    /// Next value, Marsaglia shift triple (13, 7, 17); full period 2^64 - 1.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform value in `[0, upper)` via Lemire's nearly-divisionless
    /// method.
    ///
    /// # Panics
    /// Panics in debug builds if `upper` is 0.
    #[inline]
    pub fn next_usize(&mut self, upper: usize) -> usize {
        debug_assert!(upper > 0, "upper bound must be > 0");

        if upper.is_power_of_two() {
            return (self.next_u64() as usize) & (upper - 1);
        }

        let upper = upper as u64;
        // Rejection threshold 2^64 mod upper; values below it would bias.
        let threshold = upper.wrapping_neg() % upper;
        loop {
            let m = (self.next_u64() as u128) * (upper as u128);
            if (m as u64) >= threshold {
                return (m >> 64) as usize;
            }
        }
    }

    /// Shuffles `slice` in place with Fisher-Yates.
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        let len = slice.len();
        if len <= 1 {
            return;
        }
        for i in (1..len).rev() {
            let j = self.next_usize(i + 1);
            slice.swap(i, j);
        }
    }
}
