//! Ordering counts and fingerprints of a PQ-tree.
//!
//! The fingerprint is a cheap cross-check between independently built
//! engines: the number of orderings the tree admits, reduced to its first
//! five decimal digits followed by its digit count. The structural hash is
//! a fixed-width SHA-256 key over the canonical ID.
//!
//! # Citations
//! - Counting frontiers of a PQ-tree: Booth & Lueker, JCSS 13 (1976), Section 2
//! - SHA-256: NIST FIPS 180-4 (2015)
//! - Domain separation & length prefixing: Bernstein et al., "How to hash into elliptic curves" (2009)

use crate::canonical::{unique_id, UidOptions};
use crate::core::{NodeKind, PqTree, TreeError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::fmt;

/// A 256-bit hash value.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashValue(pub [u8; 32]);

impl HashValue {
    /// Computes SHA-256 of the given data with domain separation.
    ///
    /// Input is `b"C1P:<domain>:v1" || length_prefix(data) || data`, where the
    /// length prefix is a 64-bit little-endian byte count.
    pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"C1P:");
        hasher.update(domain);
        hasher.update(b":v1");
        hasher.update((data.len() as u64).to_le_bytes());
        hasher.update(data);
        Self(hasher.finalize().into())
    }
}

impl fmt::Display for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 4 bytes in hex for readability
        write!(
            f,
            "HashValue({:02x}{:02x}{:02x}{:02x}…)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

const DOMAIN_UNIQUE_ID: &[u8] = b"UNIQUE_ID";

/// Arbitrary-precision count of orderings.
///
/// Stored as little-endian base-10^9 limbs, which keeps decimal rendering
/// trivial. Only multiplication by machine-sized factors is needed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderCount {
    limbs: Vec<u32>,
}

impl OrderCount {
    const BASE: u64 = 1_000_000_000;

    pub fn one() -> Self {
        Self { limbs: vec![1] }
    }

    pub fn mul_small(&mut self, factor: u32) {
        if factor == 0 {
            self.limbs = vec![0];
            return;
        }
        let mut carry = 0u64;
        for limb in &mut self.limbs {
            let product = u64::from(*limb) * u64::from(factor) + carry;
            *limb = (product % Self::BASE) as u32;
            carry = product / Self::BASE;
        }
        while carry > 0 {
            self.limbs.push((carry % Self::BASE) as u32);
            carry /= Self::BASE;
        }
    }

    /// Multiplies by `n!`.
    pub fn mul_factorial(&mut self, n: usize) {
        for factor in 2..=n {
            self.mul_small(factor as u32);
        }
    }

    /// Number of decimal digits.
    pub fn digit_count(&self) -> usize {
        let top = self.limbs.len() - 1;
        let leading = self.limbs[top].checked_ilog10().map_or(1, |d| d as usize + 1);
        top * 9 + leading
    }

    /// First five decimal digits followed by the digit count.
    pub fn digest(&self) -> String {
        let decimal = self.to_string();
        let prefix: String = decimal.chars().take(5).collect();
        format!("{prefix}{}", decimal.len())
    }
}

impl fmt::Display for OrderCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut limbs = self.limbs.iter().rev();
        if let Some(top) = limbs.next() {
            write!(f, "{top}")?;
        }
        for limb in limbs {
            write!(f, "{limb:09}")?;
        }
        Ok(())
    }
}

/// Breadth-first product over inner nodes: `k!` per P-node, 2 per Q-node.
///
/// With `anchor_root`, the root P-node contributes `(k-1)!`, which counts
/// orderings up to rotation of the root.
fn count_orders(tree: &PqTree, anchor_root: bool) -> OrderCount {
    let mut count = OrderCount::one();
    let mut queue: VecDeque<_> = tree.root.into_iter().collect();
    while let Some(id) = queue.pop_front() {
        let node = &tree.nodes[id];
        match node.kind {
            NodeKind::Leaf(_) => continue,
            NodeKind::P => {
                let k = node.child_count;
                let k = if anchor_root && Some(id) == tree.root { k.saturating_sub(1) } else { k };
                count.mul_factorial(k);
            }
            NodeKind::Q => count.mul_small(2),
        }
        queue.extend(tree.children(id).filter(|&c| !tree.nodes[c].kind.is_leaf()));
    }
    count
}

/// Orderings counted the way the fingerprint counts them (root P-node
/// contributes `(k-1)!`).
pub fn possible_orders(tree: &PqTree) -> OrderCount {
    count_orders(tree, true)
}

/// Exact number of linear leaf orderings the tree admits.
pub fn linear_orders(tree: &PqTree) -> OrderCount {
    count_orders(tree, false)
}

/// Digest of [`possible_orders`]. Labels do not contribute, so the value is
/// the same before and after cleanup.
pub fn fingerprint(tree: &PqTree) -> String {
    possible_orders(tree).digest()
}

/// SHA-256 of the normalized canonical ID.
pub fn structural_hash(tree: &PqTree) -> Result<HashValue, TreeError> {
    let uid = unique_id(tree, UidOptions::default())?;
    Ok(HashValue::hash_with_domain(DOMAIN_UNIQUE_ID, uid.as_bytes()))
}
