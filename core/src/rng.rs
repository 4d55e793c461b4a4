//! Deterministic random number generation.
//!
//! RULE: Nothing in the simulation may call any platform RNG.
//! All randomness flows through SeededRng instances derived from a
//! day's integer seed, which is persisted on the day row.
//!
//! The generator is PCG (Pcg64Mcg, multiplicative congruential with an
//! xorshift output permutation). Streams are derived from
//! (seed XOR stream_index * golden-ratio constant), so:
//!   - The environment stream, each hour's stream and each hour's
//!     tie-break stream are independent of each other.
//!   - Every stream is reproducible from the persisted seed alone,
//!     across engine restarts.

use crate::types::Hour;
use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

const GOLDEN: u64 = 0x9e37_79b9_7f4a_7c15;

/// A named, deterministic random stream.
pub struct SeededRng {
    pub name: &'static str,
    inner: Pcg64Mcg,
}

impl SeededRng {
    /// Create a stream from a seed and a stable stream index.
    /// The index assigned to a purpose must never change once assigned.
    pub fn new(seed: u64, stream_index: u64) -> Self {
        let derived_seed = seed ^ stream_index.wrapping_mul(GOLDEN);
        Self {
            name: "unnamed",
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// The day-level environment stream.
    pub fn for_environment(day_seed: u64) -> Self {
        Self::new(day_seed, Stream::Environment.index()).with_name("environment")
    }

    /// The per-hour demand-multiplier stream.
    pub fn for_hour(day_seed: u64, hour: Hour) -> Self {
        Self::new(day_seed, Stream::Hour.index() + hour as u64).with_name("hour")
    }

    /// The per-hour allocation tie-break stream.
    pub fn for_tie_break(seed: u64, hour: Hour) -> Self {
        Self::new(seed, Stream::TieBreak.index() + hour as u64).with_name("tie_break")
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Draw a raw u64 (full range).
    pub fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    /// Roll a u64 in [0, n).
    pub fn next_u64_below(&mut self, n: u64) -> u64 {
        assert!(n > 0, "n must be > 0");
        self.inner.next_u64() % n
    }

    /// Uniform float in [min, max).
    pub fn range_f64(&mut self, min: f64, max: f64) -> f64 {
        min + self.next_f64() * (max - min)
    }

    /// Uniform integer in [min, max] (inclusive).
    pub fn range_i64(&mut self, min: i64, max: i64) -> i64 {
        debug_assert!(max >= min);
        min + self.next_u64_below((max - min + 1) as u64) as i64
    }

    /// Bernoulli trial: returns true with probability p.
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    /// Pick one element uniformly.
    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        let idx = self.next_u64_below(items.len() as u64) as usize;
        &items[idx]
    }

    /// Fisher–Yates shuffle in place.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.next_u64_below((i + 1) as u64) as usize;
            items.swap(i, j);
        }
    }
}

/// Stable stream index bases.
/// NEVER reorder or renumber. Only append.
/// Hour-scoped streams add the hour (9..=16) to their base.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum Stream {
    Environment = 0,
    Hour = 100,
    TieBreak = 200,
}

impl Stream {
    pub fn index(self) -> u64 {
        self as u64
    }
}
