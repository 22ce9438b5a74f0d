//! Deterministic random number generation for the idle loop.
//!
//! RULE: Nothing in the game may call any platform RNG.
//! Each stream is seeded from (master_seed XOR stream index), so adding a
//! stream never changes the others.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum RngStream {
    Actions = 0,
    Discoveries = 1,
}

pub struct GameRng {
    inner: Pcg64Mcg,
}

impl GameRng {
    pub fn new(master_seed: u64, stream: RngStream) -> Self {
        let derived_seed = master_seed ^ (stream as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        Self { inner: Pcg64Mcg::seed_from_u64(derived_seed) }
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        (self.inner.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Roll a u64 in [0, n).
    pub fn next_u64_below(&mut self, n: u64) -> u64 {
        assert!(n > 0, "n must be > 0");
        self.inner.next_u64() % n
    }

    /// Bernoulli trial: returns true with probability p.
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }
}
