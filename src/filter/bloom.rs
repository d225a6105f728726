//! Bloom Filter implementation.
//!
//! A space-efficient probabilistic data structure used to test whether a key
//! is stored in a segment. False positive matches are possible, but false
//! negatives are not.

use crate::error::{Error, Result};
use crate::filter::Filter;

/// BloomFilter provides probabilistic set membership testing.
///
/// # Example
/// ```
/// use swaykv::filter::{BloomFilter, Filter};
///
/// let filter = BloomFilter::build([b"key1".as_slice(), b"key2".as_slice()], 0.01);
///
/// assert!(filter.might_contain(b"key1"));
/// assert!(filter.might_contain(b"key2"));
/// // key3 might return true (false positive) or false
/// ```
#[derive(Debug, Clone)]
pub struct BloomFilter {
    /// Bit array for the bloom filter
    bits: Vec<u8>,
    /// Number of hash functions per key
    num_hashes: u32,
    /// Number of bits in the filter
    num_bits: u64,
}

impl BloomFilter {
    /// Create an empty BloomFilter sized for `expected_keys` at the given
    /// false positive rate.
    ///
    /// Uses `m = -n * ln(p) / ln(2)^2` bits and `k = (m / n) * ln(2)` hash functions.
    pub fn new(expected_keys: usize, false_positive_rate: f64) -> Self {
        let n = expected_keys.max(1) as f64;
        let p = false_positive_rate.clamp(0.0001, 0.9999);
        let ln2 = std::f64::consts::LN_2;

        let num_bits = ((-n * p.ln() / (ln2 * ln2)).ceil() as u64).max(64);
        let num_hashes = ((num_bits as f64 / n) * ln2).round().clamp(1.0, 30.0) as u32;

        Self { bits: vec![0u8; num_bits.div_ceil(8) as usize], num_hashes, num_bits }
    }

    /// Builds a filter holding every key yielded by `keys`.
    pub fn build<'a, I>(keys: I, false_positive_rate: f64) -> Self
    where
        I: IntoIterator<Item = &'a [u8]>,
        I::IntoIter: ExactSizeIterator,
    {
        let keys = keys.into_iter();
        let mut filter = Self::new(keys.len(), false_positive_rate);
        for key in keys {
            filter.add(key);
        }
        filter
    }

    /// Bit positions derived by double hashing, `h1 + i * h2 (mod m)`.
    #[inline]
    fn bit_positions(&self, key: &[u8]) -> impl Iterator<Item = u64> {
        let h1 = mix(fnv1a(key));
        let h2 = mix(h1) | 1;
        let num_bits = self.num_bits;
        (0..self.num_hashes as u64).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % num_bits)
    }

    /// Get the size of the bit array in bytes.
    pub fn size(&self) -> usize {
        self.bits.len()
    }

    /// Get the number of hash functions per key.
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Get the number of bits in the filter.
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Theoretical false positive rate after `num_keys` insertions,
    /// `(1 - e^(-kn/m))^k`.
    pub fn estimated_false_positive_rate(&self, num_keys: usize) -> f64 {
        if num_keys == 0 {
            return 0.0;
        }

        let k = self.num_hashes as f64;
        let n = num_keys as f64;
        let m = self.num_bits as f64;
        (1.0 - (-k * n / m).exp()).powf(k)
    }
}

impl Filter for BloomFilter {
    fn might_contain(&self, key: &[u8]) -> bool {
        self.bit_positions(key).all(|pos| self.bits[(pos / 8) as usize] & (1 << (pos % 8)) != 0)
    }

    fn add(&mut self, key: &[u8]) {
        let positions: Vec<u64> = self.bit_positions(key).collect();
        for pos in positions {
            self.bits[(pos / 8) as usize] |= 1 << (pos % 8);
        }
    }

    /// Format: `[num_hashes: u32][num_bits: u64][bits]`
    fn encode(&self) -> Vec<u8> {
        let mut encoded = Vec::with_capacity(12 + self.bits.len());
        encoded.extend_from_slice(&self.num_hashes.to_le_bytes());
        encoded.extend_from_slice(&self.num_bits.to_le_bytes());
        encoded.extend_from_slice(&self.bits);
        encoded
    }

    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 12 {
            return Err(Error::corruption("Bloom filter data too short"));
        }

        let mut word = [0u8; 4];
        word.copy_from_slice(&data[0..4]);
        let num_hashes = u32::from_le_bytes(word);

        let mut dword = [0u8; 8];
        dword.copy_from_slice(&data[4..12]);
        let num_bits = u64::from_le_bytes(dword);

        if num_hashes == 0 || num_bits == 0 {
            return Err(Error::corruption("Bloom filter has no bits"));
        }
        if (data.len() - 12) as u64 != num_bits.div_ceil(8) {
            return Err(Error::corruption("Bloom filter size mismatch"));
        }

        Ok(Self { bits: data[12..].to_vec(), num_hashes, num_bits })
    }
}

/// 64-bit FNV-1a over the raw key bytes.
fn fnv1a(key: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;

    key.iter().fold(OFFSET_BASIS, |state, &byte| (state ^ byte as u64).wrapping_mul(PRIME))
}

/// splitmix64 finalizer, spreads FNV output over all bits.
fn mix(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
