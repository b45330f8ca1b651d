pub mod builder;

use xxhash_rust::xxh3::xxh3_128;

/// Probabilistic membership test over user keys.
///
/// `false` means the key is definitely absent; `true` means it may be present.
/// Probe positions use double hashing over the two halves of a 128-bit hash:
/// `h_i = h1 + i * h2 (mod m)`.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_hashes: u32,
    num_bits: u32,
}

impl BloomFilter {
    /// Filter sized for `expected_items` at `false_positive_rate`.
    ///
    /// Sizing: `bits_per_key = -1.44 * log2(fpr)`, `k = bits_per_key * ln 2`.
    /// Out-of-range rates are clamped to `(0.0001, 0.5)`.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let fpr = false_positive_rate.clamp(0.0001, 0.5);
        let bits_per_key = -1.44 * fpr.log2();
        let num_bits = ((expected_items.max(1) as f64) * bits_per_key).ceil() as u32;
        let num_bits = num_bits.max(64);
        let num_hashes = ((bits_per_key * 2.0f64.ln()).ceil() as u32).max(1);

        Self {
            bits: vec![0u64; (num_bits as usize).div_ceil(64)],
            num_hashes,
            num_bits,
        }
    }

    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = hash_key(key);
        for i in 0..self.num_hashes {
            let pos = self.position(h1, h2, i);
            self.bits[(pos / 64) as usize] |= 1 << (pos % 64);
        }
    }

    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = hash_key(key);
        (0..self.num_hashes).all(|i| {
            let pos = self.position(h1, h2, i);
            (self.bits[(pos / 64) as usize] >> (pos % 64)) & 1 == 1
        })
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    fn position(&self, h1: u64, h2: u64, i: u32) -> u32 {
        (h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits as u64) as u32
    }
}

fn hash_key(key: &[u8]) -> (u64, u64) {
    let hash128 = xxh3_128(key);
    (hash128 as u64, (hash128 >> 64) as u64)
}
