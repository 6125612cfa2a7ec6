//! Deterministic seed distribution.
//!
//! A [`SeedGenerator`] holds two streams derived from one root seed:
//! a _shared_ stream, which yields the same sequence on every worker
//! seeded with the same root, and a _worker_ stream, which
//! [`SeedGenerator::spawn`] makes distinct per worker. Child seeds
//! are a pure function of `(root, counter)`, so any prefix of either
//! stream is reproducible from the root alone.

use std::fmt;
use std::hash::Hasher;

use seahash::SeaHasher;

use crate::errors::{Error, Result};

/// Seeds must be strictly below this bound.
pub const SEED_UPPER_BOUND: u128 = 1 << 64;

// Fixed keys so derivation is stable across processes and releases.
const K1: u64 = 0x9e37_79b9_7f4a_7c15;
const K2: u64 = 0xbf58_476d_1ce4_e5b9;
const K3: u64 = 0x94d0_49bb_1331_11eb;

// Separates the worker stream root from the shared stream root.
const WORKER_SALT: u64 = u64::MAX;

fn derive(root: u64, counter: u64) -> u64 {
    let mut hasher = SeaHasher::with_seeds(root, K1, K2, K3);
    hasher.write_u64(counter);
    hasher.finish()
}

/// Check a caller supplied seed against the `u64` domain.
pub(crate) fn validate_seed<S>(seed: S) -> Result<u64>
where
    S: TryInto<u64> + Copy + fmt::Display,
{
    seed.try_into()
        .map_err(|_err| Error::SeedOutOfRange(seed.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SeedStream {
    root: u64,
    counter: u64,
}

impl SeedStream {
    fn new(root: u64) -> Self {
        Self { root, counter: 0 }
    }

    fn next_seed(&mut self) -> u64 {
        let seed = derive(self.root, self.counter);
        self.counter += 1;
        seed
    }
}

/// Reproducible source of child seeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedGenerator {
    root: u64,
    shared: SeedStream,
    worker: SeedStream,
}

impl Default for SeedGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SeedGenerator {
    /// Start from a fresh random root.
    pub fn new() -> Self {
        Self::with_seed(fastrand::u64(..))
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            root: seed,
            shared: SeedStream::new(seed),
            worker: SeedStream::new(derive(seed, WORKER_SALT)),
        }
    }

    /// Reset both streams to the beginning of the sequence for `seed`.
    pub fn seed(&mut self, seed: u64) {
        *self = Self::with_seed(seed);
    }

    /// Reset both streams from a fresh random root.
    pub fn reseed_from_entropy(&mut self) {
        self.seed(fastrand::u64(..));
    }

    /// The root the current streams were derived from.
    pub fn root_seed(&self) -> u64 {
        self.root
    }

    /// Next seed of the worker-local stream.
    pub fn generate_seed(&mut self) -> u64 {
        self.worker.next_seed()
    }

    /// Next seed of the stream shared by every worker with this root.
    pub fn generate_shared_seed(&mut self) -> u64 {
        self.shared.next_seed()
    }

    /// Make the generator for worker `worker_id`.
    ///
    /// The shared stream is copied as is, so all workers agree on it.
    /// The worker stream is re-rooted on both the current worker
    /// stream position and the worker id.
    pub fn spawn(&self, worker_id: u64) -> Self {
        let mut parent = self.worker;
        let worker_root = derive(parent.next_seed(), worker_id);
        Self {
            root: self.root,
            shared: self.shared,
            worker: SeedStream::new(worker_root),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_root_same_sequence() {
        let mut a = SeedGenerator::with_seed(42);
        let mut b = SeedGenerator::with_seed(42);
        let xs: Vec<_> = (0..8).map(|_| a.generate_seed()).collect();
        let ys: Vec<_> = (0..8).map(|_| b.generate_seed()).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn streams_do_not_repeat_each_other() {
        let mut gen = SeedGenerator::with_seed(42);
        let shared: Vec<_> = (0..4).map(|_| gen.generate_shared_seed()).collect();
        let worker: Vec<_> = (0..4).map(|_| gen.generate_seed()).collect();
        assert_ne!(shared, worker);
        assert_ne!(shared[0], shared[1]);
    }

    #[test]
    fn reseed_restarts_sequence() {
        let mut gen = SeedGenerator::with_seed(7);
        let first = gen.generate_shared_seed();
        gen.generate_shared_seed();
        gen.seed(7);
        assert_eq!(gen.generate_shared_seed(), first);
        assert_eq!(gen.root_seed(), 7);
    }

    #[test]
    fn spawned_workers_share_shared_stream_only() {
        let gen = SeedGenerator::with_seed(1);
        let mut w0 = gen.spawn(0);
        let mut w1 = gen.spawn(1);
        assert_eq!(w0.generate_shared_seed(), w1.generate_shared_seed());
        assert_ne!(w0.generate_seed(), w1.generate_seed());
        // Spawning doesn't advance the parent.
        assert_eq!(gen.spawn(0), gen.spawn(0));
    }

    #[test]
    fn validate_seed_rejects_out_of_domain() {
        assert_eq!(validate_seed(5_u32).unwrap(), 5);
        assert_eq!(validate_seed(u64::MAX).unwrap(), u64::MAX);
        assert!(matches!(
            validate_seed(SEED_UPPER_BOUND),
            Err(Error::SeedOutOfRange(msg)) if msg == "18446744073709551616"
        ));
        assert!(matches!(validate_seed(-1_i64), Err(Error::SeedOutOfRange(_))));
    }
}
