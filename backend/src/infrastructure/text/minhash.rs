/// MinHash signatures and LSH band keys for near-duplicate detection
use crate::config::DedupConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

const MERSENNE_PRIME: u64 = (1 << 61) - 1;
const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Fixed-length MinHash signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(Vec<u64>);

impl Signature {
    pub fn values(&self) -> &[u64] {
        &self.0
    }

    /// Estimated Jaccard similarity: the fraction of agreeing positions
    pub fn similarity(&self, other: &Signature) -> f32 {
        if self.0.is_empty() || self.0.len() != other.0.len() {
            return 0.0;
        }
        let agreeing = self.0.iter().zip(&other.0).filter(|(a, b)| a == b).count();
        agreeing as f32 / self.0.len() as f32
    }
}

/// Computes signatures with a seeded family of universal hash permutations
#[derive(Debug, Clone)]
pub struct MinHasher {
    shingle_size: usize,
    bands: usize,
    rows_per_band: usize,
    coefficients: Vec<(u64, u64)>,
}

impl MinHasher {
    pub fn new(config: &DedupConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let coefficients = (0..config.permutations())
            .map(|_| {
                (
                    rng.gen_range(1..MERSENNE_PRIME),
                    rng.gen_range(0..MERSENNE_PRIME),
                )
            })
            .collect();

        MinHasher {
            shingle_size: config.shingle_size.max(1),
            bands: config.bands,
            rows_per_band: config.rows_per_band,
            coefficients,
        }
    }

    /// Hashes of the lowercased word shingles of `text`.
    /// Texts shorter than one shingle produce a single shingle of all their words.
    pub fn shingles(&self, text: &str) -> HashSet<u64> {
        let words: Vec<String> = text
            .split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|w| !w.is_empty())
            .collect();

        if words.is_empty() {
            return HashSet::new();
        }
        if words.len() < self.shingle_size {
            return std::iter::once(hash_words(&words)).collect();
        }

        words
            .windows(self.shingle_size)
            .map(hash_words)
            .collect()
    }

    pub fn signature(&self, text: &str) -> Signature {
        let shingles = self.shingles(text);
        let values = self
            .coefficients
            .iter()
            .map(|&(a, b)| {
                shingles
                    .iter()
                    .map(|&h| permute(a, b, h))
                    .min()
                    .unwrap_or(u64::MAX)
            })
            .collect();
        Signature(values)
    }

    /// One bucket key per band; two signatures sharing any key are candidates
    pub fn band_keys(&self, signature: &Signature) -> Vec<u64> {
        signature
            .values()
            .chunks(self.rows_per_band)
            .take(self.bands)
            .enumerate()
            .map(|(band, rows)| {
                let mut hash = fnv_step(FNV_OFFSET, &(band as u64).to_le_bytes());
                for row in rows {
                    hash = fnv_step(hash, &row.to_le_bytes());
                }
                hash
            })
            .collect()
    }
}

fn fnv_step(mut hash: u64, bytes: &[u8]) -> u64 {
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn hash_words(words: &[String]) -> u64 {
    let mut hash = FNV_OFFSET;
    for (i, word) in words.iter().enumerate() {
        if i > 0 {
            hash = fnv_step(hash, b" ");
        }
        hash = fnv_step(hash, word.as_bytes());
    }
    hash
}

fn permute(a: u64, b: u64, value: u64) -> u64 {
    let x = u128::from(value % MERSENNE_PRIME);
    ((u128::from(a) * x + u128::from(b)) % u128::from(MERSENNE_PRIME)) as u64
}
