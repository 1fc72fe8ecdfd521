//! Bounded-size hash sketches for approximate Jaccard similarity
//!
//! Two sketch families are provided:
//! - [`MinHashSignature`]: `k` independent universal-hash permutations, each
//!   slot holding the minimum permuted hash over the value set. The estimate
//!   is the fraction of slots on which two signatures agree.
//! - [`BottomKSketch`]: the `k` smallest distinct fingerprints of the value
//!   set (one hash function). The estimate is the share of the union's `k`
//!   smallest fingerprints that both sketches contain.
//!
//! Both approximate the same quantity but are not bit-identical to each other.

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

/// Mersenne prime 2^61 - 1, modulus of the permutation family
const MERSENNE_61: u64 = (1 << 61) - 1;

/// Stable 64-bit fingerprint of a canonical value string
///
/// First eight bytes of the SHA-256 digest, big-endian.
pub fn fingerprint(value: &str) -> u64 {
    let digest = Sha256::digest(value.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Family of `k` hash permutations `h_i(x) = (a_i * x + b_i) mod p`
#[derive(Debug, Clone)]
pub struct MinHasher {
    params: Vec<(u64, u64)>,
}

impl MinHasher {
    /// Derive `signature_size` permutations deterministically from `seed`
    pub fn new(signature_size: usize, seed: u64) -> Self {
        let params = (0..signature_size.max(1) as u64)
            .map(|slot| {
                let mut hasher = Sha256::new();
                hasher.update(seed.to_be_bytes());
                hasher.update(slot.to_be_bytes());
                let digest = hasher.finalize();

                let mut a_bytes = [0u8; 8];
                let mut b_bytes = [0u8; 8];
                a_bytes.copy_from_slice(&digest[..8]);
                b_bytes.copy_from_slice(&digest[8..16]);

                // a must be non-zero for the map to be a permutation
                let a = u64::from_be_bytes(a_bytes) % (MERSENNE_61 - 1) + 1;
                let b = u64::from_be_bytes(b_bytes) % MERSENNE_61;
                (a, b)
            })
            .collect();
        Self { params }
    }

    pub fn signature_size(&self) -> usize {
        self.params.len()
    }

    /// Build the signature of a set of canonical value strings
    pub fn signature<I, S>(&self, values: I) -> MinHashSignature
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut mins = vec![u64::MAX; self.params.len()];
        let mut empty = true;
        for value in values {
            empty = false;
            let base = fingerprint(value.as_ref()) % MERSENNE_61;
            for (slot, &(a, b)) in mins.iter_mut().zip(&self.params) {
                let permuted = permute(a, b, base);
                if permuted < *slot {
                    *slot = permuted;
                }
            }
        }
        MinHashSignature { mins, empty }
    }
}

fn permute(a: u64, b: u64, x: u64) -> u64 {
    ((a as u128 * x as u128 + b as u128) % MERSENNE_61 as u128) as u64
}

/// Per-slot minima of one value set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinHashSignature {
    mins: Vec<u64>,
    empty: bool,
}

impl MinHashSignature {
    /// True when the source set had no values
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn len(&self) -> usize {
        self.mins.len()
    }

    pub fn slots(&self) -> &[u64] {
        &self.mins
    }

    /// Fraction of agreeing slots; 0.0 if either set is empty or sizes differ
    pub fn jaccard(&self, other: &MinHashSignature) -> f64 {
        if self.empty || other.empty || self.mins.len() != other.mins.len() {
            return 0.0;
        }
        let agreeing = self
            .mins
            .iter()
            .zip(&other.mins)
            .filter(|(a, b)| a == b)
            .count();
        agreeing as f64 / self.mins.len() as f64
    }
}

/// The `k` smallest distinct fingerprints of one value set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BottomKSketch {
    k: usize,
    hashes: Vec<u64>,
}

impl BottomKSketch {
    /// Sketch from fingerprints already reduced by a backend; input order is irrelevant
    pub fn from_fingerprints(k: usize, fingerprints: impl IntoIterator<Item = u64>) -> Self {
        let k = k.max(1);
        let unique: BTreeSet<u64> = fingerprints.into_iter().collect();
        Self {
            k,
            hashes: unique.into_iter().take(k).collect(),
        }
    }

    /// Sketch computed locally from canonical value strings
    pub fn from_values<I, S>(k: usize, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::from_fingerprints(k, values.into_iter().map(|v| fingerprint(v.as_ref())))
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn hashes(&self) -> &[u64] {
        &self.hashes
    }

    /// `|bottom_k(A ∪ B) ∩ A_k ∩ B_k| / |bottom_k(A ∪ B)|`
    pub fn jaccard(&self, other: &BottomKSketch) -> f64 {
        if self.is_empty() || other.is_empty() {
            return 0.0;
        }
        let k = self.k.min(other.k);

        let (mut i, mut j) = (0, 0);
        let mut union_taken = 0usize;
        let mut shared = 0usize;
        while union_taken < k && (i < self.hashes.len() || j < other.hashes.len()) {
            let left = self.hashes.get(i).copied();
            let right = other.hashes.get(j).copied();
            match (left, right) {
                (Some(a), Some(b)) if a == b => {
                    shared += 1;
                    i += 1;
                    j += 1;
                }
                (Some(a), Some(b)) if a < b => i += 1,
                (Some(_), Some(_)) => j += 1,
                (Some(_), None) => i += 1,
                (None, Some(_)) => j += 1,
                (None, None) => break,
            }
            union_taken += 1;
        }

        if union_taken == 0 {
            0.0
        } else {
            shared as f64 / union_taken as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(range: std::ops::Range<u32>) -> Vec<String> {
        range.map(|i| format!("value-{i}")).collect()
    }

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(fingerprint("abc"), fingerprint("abc"));
        assert_ne!(fingerprint("abc"), fingerprint("abd"));
    }

    #[test]
    fn test_identical_sets_score_one() {
        let hasher = MinHasher::new(128, 1);
        let a = hasher.signature(strings(0..200));
        let b = hasher.signature(strings(0..200).into_iter().rev());
        assert_eq!(a.jaccard(&b), 1.0);
    }

    #[test]
    fn test_minhash_is_symmetric_and_close() {
        let hasher = MinHasher::new(256, 7);
        // true Jaccard = 500 / 1500
        let a = hasher.signature(strings(0..1000));
        let b = hasher.signature(strings(500..1500));
        let forward = a.jaccard(&b);
        assert_eq!(forward, b.jaccard(&a));
        assert!((forward - 1.0 / 3.0).abs() < 0.12, "estimate {forward}");
    }

    #[test]
    fn test_disjoint_and_empty_sets() {
        let hasher = MinHasher::new(128, 1);
        let a = hasher.signature(strings(0..100));
        let b = hasher.signature(strings(1000..1100));
        assert_eq!(a.jaccard(&b), 0.0);

        let empty = hasher.signature(Vec::<String>::new());
        assert!(empty.is_empty());
        assert_eq!(a.jaccard(&empty), 0.0);
        assert_eq!(empty.jaccard(&empty), 0.0);
    }

    #[test]
    fn test_signature_depends_on_seed() {
        let a = MinHasher::new(16, 1).signature(["x", "y"]);
        let b = MinHasher::new(16, 2).signature(["x", "y"]);
        assert_ne!(a.slots(), b.slots());
        assert_eq!(MinHasher::new(0, 1).signature_size(), 1);
    }

    #[test]
    fn test_bottom_k_estimates() {
        let a = BottomKSketch::from_values(128, strings(0..1000));
        let same = BottomKSketch::from_values(128, strings(0..1000));
        let half = BottomKSketch::from_values(128, strings(500..1500));
        let disjoint = BottomKSketch::from_values(128, strings(5000..6000));

        assert_eq!(a.jaccard(&same), 1.0);
        assert_eq!(a.jaccard(&disjoint), 0.0);
        assert_eq!(a.jaccard(&half), half.jaccard(&a));
        let estimate = a.jaccard(&half);
        assert!((estimate - 1.0 / 3.0).abs() < 0.15, "estimate {estimate}");
    }

    #[test]
    fn test_bottom_k_small_sets() {
        let a = BottomKSketch::from_fingerprints(8, [5, 1, 3, 3]);
        let b = BottomKSketch::from_fingerprints(8, [3, 4]);
        assert_eq!(a.hashes(), &[1, 3, 5]);
        // union {1,3,4,5}, shared {3}
        assert_eq!(a.jaccard(&b), 0.25);
    }
}
