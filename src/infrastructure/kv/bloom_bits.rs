//! Fixed-size bloom filter used by the in-memory store.

use sha2::{Digest, Sha256};

/// Error rate used when a filter is created implicitly by an add.
pub const DEFAULT_ERROR_RATE: f64 = 0.01;

/// Capacity used when a filter is created implicitly by an add.
pub const DEFAULT_CAPACITY: u64 = 100;

/// A bloom filter sized from a target error rate and capacity.
///
/// Bit positions use double hashing over a SHA-256 digest, so the layout is
/// identical across processes.
#[derive(Debug, Clone)]
pub struct BloomBits {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomBits {
    pub fn new(error_rate: f64, capacity: u64) -> Self {
        let error_rate = error_rate.clamp(1e-9, 0.5);
        let capacity = capacity.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;

        let num_bits = (-(capacity * error_rate.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / capacity) * ln2).round().max(1.0) as u32;

        Self {
            bits: vec![0; num_bits.div_ceil(64) as usize],
            num_bits,
            num_hashes,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_ERROR_RATE, DEFAULT_CAPACITY)
    }

    /// Inserts `item`; returns true if at least one bit was newly set.
    pub fn insert(&mut self, item: &str) -> bool {
        let mut changed = false;
        for position in self.positions(item) {
            let (word, mask) = (position / 64, 1u64 << (position % 64));
            let slot = &mut self.bits[word as usize];
            if *slot & mask == 0 {
                *slot |= mask;
                changed = true;
            }
        }
        changed
    }

    pub fn contains(&self, item: &str) -> bool {
        self.positions(item).all(|position| {
            let (word, mask) = (position / 64, 1u64 << (position % 64));
            self.bits[word as usize] & mask != 0
        })
    }

    fn positions(&self, item: &str) -> impl Iterator<Item = u64> + use<> {
        let digest = Sha256::digest(item.as_bytes());
        let mut first = [0u8; 8];
        let mut second = [0u8; 8];
        first.copy_from_slice(&digest[0..8]);
        second.copy_from_slice(&digest[8..16]);
        let h1 = u64::from_le_bytes(first);
        let h2 = u64::from_le_bytes(second) | 1;
        let num_bits = self.num_bits;

        (0..u64::from(self.num_hashes))
            .map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % num_bits)
    }
}
