//! Bloom filter with double hashing.
//!
//! Two FNV-1a hashes with different offset bases give `h1` and `h2`; the `k`
//! probe positions are `(h1 + i·h2) mod m`. Sizing for `n` items at target
//! false-positive rate `p`:
//!
//! ```text
//! m = ceil(-n · ln(p) / ln(2)²)
//! k = round(m / n · ln(2))
//! ```
//!
//! There is no removal: a tested item that was added always tests positive.

use std::f64::consts::LN_2;

use serde::Serialize;
use tempo_core::limits::BLOOM_BITS_MAX;

use crate::error::{StatsError, StatsResult};

const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_OFFSET_ALT: u64 = 0x8422_2325_cbf2_9ce4;

/// Bloom filter statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BloomStats {
    /// Bits in the filter.
    pub num_bits: usize,
    /// Probes per item.
    pub num_hashes: u32,
    /// Items added.
    pub items_added: u64,
    /// Bits currently set.
    pub bits_set: usize,
    /// `bits_set / num_bits`.
    pub fill_ratio: f64,
    /// `fill_ratio ^ num_hashes`.
    pub estimated_false_positive_rate: f64,
}

/// A Bloom filter over byte strings.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    words: Vec<u64>,
    num_bits: usize,
    num_hashes: u32,
    items_added: u64,
    bits_set: usize,
}

impl BloomFilter {
    /// Creates a filter sized for `expected_items` at `false_positive_rate`.
    ///
    /// # Errors
    ///
    /// Returns `StatsError::InvalidConfig` unless `expected_items > 0` and
    /// `0 < false_positive_rate < 1`, or if the sized filter would exceed
    /// `BLOOM_BITS_MAX` bits.
    pub fn with_capacity(expected_items: usize, false_positive_rate: f64) -> StatsResult<Self> {
        if expected_items == 0 {
            return Err(StatsError::InvalidConfig {
                message: "expected_items must be positive".to_string(),
            });
        }
        if !(false_positive_rate > 0.0 && false_positive_rate < 1.0) {
            return Err(StatsError::InvalidConfig {
                message: format!("false_positive_rate {false_positive_rate} must be in (0, 1)"),
            });
        }

        #[allow(clippy::cast_precision_loss)]
        let n = expected_items as f64;
        let m = (-n * false_positive_rate.ln() / (LN_2 * LN_2)).ceil();
        #[allow(clippy::cast_precision_loss)]
        let bits_max = BLOOM_BITS_MAX as f64;
        if m > bits_max {
            return Err(StatsError::InvalidConfig {
                message: format!(
                    "{expected_items} items at rate {false_positive_rate} need {m} bits, above {BLOOM_BITS_MAX}"
                ),
            });
        }
        let k = (m / n * LN_2).round().max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // Both positive and bounded.
        Self::with_params(m as usize, k as u32)
    }

    /// Creates a filter with explicit geometry.
    ///
    /// # Errors
    ///
    /// Returns `StatsError::InvalidConfig` if either parameter is zero or
    /// `num_bits` exceeds `BLOOM_BITS_MAX`.
    pub fn with_params(num_bits: usize, num_hashes: u32) -> StatsResult<Self> {
        if num_bits == 0 || num_hashes == 0 {
            return Err(StatsError::InvalidConfig {
                message: format!(
                    "num_bits {num_bits} and num_hashes {num_hashes} must be positive"
                ),
            });
        }
        if num_bits > BLOOM_BITS_MAX {
            return Err(StatsError::InvalidConfig {
                message: format!("num_bits {num_bits} must be at most {BLOOM_BITS_MAX}"),
            });
        }
        Ok(Self {
            words: vec![0; num_bits.div_ceil(64)],
            num_bits,
            num_hashes,
            items_added: 0,
            bits_set: 0,
        })
    }

    /// Returns the number of bits.
    #[must_use]
    pub const fn num_bits(&self) -> usize {
        self.num_bits
    }

    /// Returns the number of probes per item.
    #[must_use]
    pub const fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Adds an item.
    pub fn add(&mut self, item: impl AsRef<[u8]>) {
        let (h1, h2) = hash_pair(item.as_ref());
        for i in 0..self.num_hashes {
            let bit = self.position(h1, h2, i);
            self.set(bit);
        }
        self.items_added += 1;
    }

    /// Returns true if the item may have been added; false means it was not.
    #[must_use]
    pub fn test(&self, item: impl AsRef<[u8]>) -> bool {
        let (h1, h2) = hash_pair(item.as_ref());
        (0..self.num_hashes).all(|i| self.get(self.position(h1, h2, i)))
    }

    /// Returns whether the item was (possibly) present, adding it if it was not.
    pub fn add_and_test(&mut self, item: impl AsRef<[u8]>) -> bool {
        let (h1, h2) = hash_pair(item.as_ref());
        let mut newly_set = false;
        for i in 0..self.num_hashes {
            let bit = self.position(h1, h2, i);
            newly_set |= self.set(bit);
        }
        if newly_set {
            self.items_added += 1;
        }
        !newly_set
    }

    /// Estimates the current false-positive rate as `fill_ratio ^ k`.
    #[must_use]
    pub fn estimate_false_positive_rate(&self) -> f64 {
        let k = i32::try_from(self.num_hashes).unwrap_or(i32::MAX);
        self.fill_ratio().powi(k)
    }

    /// Clears every bit.
    pub fn clear(&mut self) {
        self.words.fill(0);
        self.items_added = 0;
        self.bits_set = 0;
    }

    /// Returns filter statistics.
    #[must_use]
    pub fn stats(&self) -> BloomStats {
        BloomStats {
            num_bits: self.num_bits,
            num_hashes: self.num_hashes,
            items_added: self.items_added,
            bits_set: self.bits_set,
            fill_ratio: self.fill_ratio(),
            estimated_false_positive_rate: self.estimate_false_positive_rate(),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn fill_ratio(&self) -> f64 {
        self.bits_set as f64 / self.num_bits as f64
    }

    #[allow(clippy::cast_possible_truncation)] // Result is below num_bits.
    fn position(&self, h1: u64, h2: u64, i: u32) -> usize {
        let probe = h1.wrapping_add(u64::from(i).wrapping_mul(h2));
        (probe % self.num_bits as u64) as usize
    }

    fn get(&self, bit: usize) -> bool {
        self.words[bit / 64] & (1_u64 << (bit % 64)) != 0
    }

    /// Sets a bit; returns true if it was previously clear.
    fn set(&mut self, bit: usize) -> bool {
        let word = &mut self.words[bit / 64];
        let mask = 1_u64 << (bit % 64);
        let was_clear = *word & mask == 0;
        *word |= mask;
        if was_clear {
            self.bits_set += 1;
        }
        was_clear
    }
}

fn hash_pair(bytes: &[u8]) -> (u64, u64) {
    let h1 = finalize(fnv1a(bytes, FNV_OFFSET));
    // Forced odd so h2 is never zero.
    let h2 = finalize(fnv1a(bytes, FNV_OFFSET_ALT)) | 1;
    (h1, h2)
}

fn fnv1a(bytes: &[u8], offset: u64) -> u64 {
    bytes
        .iter()
        .fold(offset, |hash, &b| (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME))
}

/// 64-bit avalanche mix, so short keys spread across the high bits.
const fn finalize(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}
