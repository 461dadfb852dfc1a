//! Storage id generation.

use crate::id::{RawId, STORAGE_ID_LEN};
use rand::RngCore;
use std::sync::atomic::{AtomicU64, Ordering};

/// Produces raw bytes for new storage ids.
///
/// Passed explicitly into every merge so tests can substitute a deterministic
/// generator.
pub trait KeyGenerator: Send + Sync {
    /// Returns fresh raw bytes for a storage id.
    fn generate(&self) -> RawId;
}

/// Generates ids from the thread-local CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomKeyGenerator;

impl KeyGenerator for RandomKeyGenerator {
    fn generate(&self) -> RawId {
        let mut raw = [0u8; STORAGE_ID_LEN];
        rand::thread_rng().fill_bytes(&mut raw);
        raw
    }
}

/// Deterministic generator for tests.
///
/// Ids are `0xEE` followed by a big-endian counter, so they never collide with
/// ids built from repeated-byte fixtures.
#[derive(Debug)]
pub struct SequentialKeyGenerator {
    start: u64,
    next: AtomicU64,
}

impl SequentialKeyGenerator {
    /// Creates a generator starting at 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates a generator starting at the given counter value.
    pub fn starting_at(start: u64) -> Self {
        Self {
            start,
            next: AtomicU64::new(start),
        }
    }

    /// Returns how many ids have been generated since creation.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::SeqCst).wrapping_sub(self.start)
    }
}

impl Default for SequentialKeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyGenerator for SequentialKeyGenerator {
    fn generate(&self) -> RawId {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        let mut raw = [0u8; STORAGE_ID_LEN];
        raw[0] = 0xEE;
        raw[8..].copy_from_slice(&n.to_be_bytes());
        raw
    }
}
