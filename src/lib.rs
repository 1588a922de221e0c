//! Incremental consecutive-ones testing with PQ-trees.
//!
//! Given a growing list of leaf subsets ("restrictions"), this crate decides
//! whether some ordering of the leaves keeps every subset contiguous, and
//! maintains a PQ-tree representing all orderings that still do:
//! - bubble and template-based reduce, one restriction at a time;
//! - contraction of a confirmed run of leaves into fresh leaves, for
//!   incremental matrix construction (e.g. vertex addition in planarity
//!   testing);
//! - a fingerprint (ordering count digest) and a canonical ID for
//!   cross-checking independently built engines.
//!
//! # Restriction cycle
//!
//! `apply_restriction` labels nodes, `merge_and_replace_leaves` may then
//! contract the confirmed run, and `clean_up` wipes the labels. Under the
//! default [`CleanupPolicy::Strict`] the next restriction is refused until
//! the cleanup happened; [`CleanupPolicy::Chained`] cleans implicitly.
//!
//! # References
//!
//! - Booth, Lueker. "Testing for the consecutive ones property, interval graphs, and graph
//!   planarity using PQ-tree algorithms", JCSS 13 (1976)
//! - Hsu, McConnell. "PC trees and circular-ones arrangements", TCS 296 (2003)
//! - Fink, Pfretzschner, Rutter. "Experimental Comparison of PC-Trees and PQ-Trees", ESA 2021
//!
//! # Example
//!
//! ```
//! use consecutive_ones::prelude::*;
//!
//! let mut tree = PqTree::new(7);
//! assert!(apply_restriction(&mut tree, &[4, 5]).unwrap());
//! clean_up(&mut tree);
//! assert_eq!(
//!     unique_id(&tree, UidOptions::default()).unwrap(),
//!     "8:(7:[5, 4], 6, 3, 2, 1, 0)"
//! );
//! assert_eq!(fingerprint(&tree), "2403");
//!
//! assert!(apply_restriction(&mut tree, &[3, 4, 5]).unwrap());
//! clean_up(&mut tree);
//! assert!(apply_restriction(&mut tree, &[2, 3]).unwrap());
//! clean_up(&mut tree);
//! // 3 now sits between 2 and the pair.
//! assert!(!apply_restriction(&mut tree, &[2, 4]).unwrap());
//! ```

pub mod arena;
mod bubble;
pub mod canonical;
pub mod config;
pub mod core;
pub mod fingerprint;
pub mod interface;
pub mod matrix;
pub mod operations;
mod reduce;

pub use crate::arena::NodeId;
pub use crate::canonical::{unique_id, UidOptions};
pub use crate::config::{CleanupPolicy, EngineConfig};
pub use crate::core::{Children, Label, LeafId, Node, NodeKind, PqTree, TreeError, TreeStats};
pub use crate::interface::ConsecutiveOnes;

/// Prelude for convenient usage.
pub mod prelude {
    pub use crate::arena::NodeId;
    pub use crate::canonical::{unique_id, UidOptions};
    pub use crate::config::{CleanupPolicy, EngineConfig};
    pub use crate::core::{Children, Label, LeafId, Node, NodeKind, PqTree, TreeError, TreeStats};
    pub use crate::fingerprint::{
        fingerprint, linear_orders, possible_orders, structural_hash, HashValue, OrderCount,
    };
    pub use crate::interface::ConsecutiveOnes;
    pub use crate::matrix::{verify_matrix, ExpectedOutcome, MatrixOutcome, Mismatch, TestMatrix};
    pub use crate::operations::{apply_restriction, clean_up, merge_and_replace_leaves};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use proptest::prelude::*;

    fn apply(tree: &mut PqTree, leaves: &[usize]) -> bool {
        let possible = apply_restriction(tree, leaves).unwrap();
        clean_up(tree);
        possible
    }

    fn uid(tree: &PqTree) -> String {
        unique_id(tree, UidOptions::default()).unwrap()
    }

    /// Every ordering of `0..n`, by Heap's algorithm.
    fn permutations(n: usize) -> Vec<Vec<usize>> {
        fn heap(k: usize, items: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
            if k <= 1 {
                out.push(items.clone());
                return;
            }
            heap(k - 1, items, out);
            for i in 0..k - 1 {
                if k % 2 == 0 {
                    items.swap(i, k - 1);
                } else {
                    items.swap(0, k - 1);
                }
                heap(k - 1, items, out);
            }
        }
        let mut items: Vec<usize> = (0..n).collect();
        let mut out = Vec::new();
        heap(n, &mut items, &mut out);
        out
    }

    fn contiguous(order: &[usize], set: &[usize]) -> bool {
        let positions: Vec<usize> = set
            .iter()
            .map(|leaf| order.iter().position(|l| l == leaf).unwrap())
            .collect();
        let lo = positions.iter().min().unwrap();
        let hi = positions.iter().max().unwrap();
        hi - lo + 1 == set.len()
    }

    #[test]
    fn heap_enumerates_every_ordering_once() {
        let mut all = permutations(4);
        assert_eq!(all.len(), 24);
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 24);
    }

    /// A restriction that is already contiguous changes nothing.
    #[test]
    fn already_contiguous_restriction_is_a_no_op() {
        let mut tree = PqTree::new(6);
        assert!(apply(&mut tree, &[1, 2, 3]));
        assert!(apply(&mut tree, &[2, 3]));
        let (id, stats, print) = (uid(&tree), tree.stats(), fingerprint(&tree));
        assert!(apply(&mut tree, &[1, 2, 3]));
        assert!(apply(&mut tree, &[2, 3]));
        assert!(apply(&mut tree, &[4]));
        assert_eq!((uid(&tree), tree.stats(), fingerprint(&tree)), (id, stats, print));
    }

    /// Interval-graph style chain: consecutive pairs force a single line.
    #[test]
    fn chain_of_pairs_leaves_two_orderings() {
        let n = 8;
        let mut tree = PqTree::new(n);
        for i in 0..n - 1 {
            assert!(apply(&mut tree, &[i, i + 1]));
        }
        assert_eq!(linear_orders(&tree).to_string(), "2");
        assert_eq!(tree.stats().q_nodes, 1);
        let frontier = tree.frontier();
        assert!(frontier == (0..n).collect::<Vec<_>>() || frontier == (0..n).rev().collect::<Vec<_>>());
        // Closing the cycle is impossible on a line.
        assert!(!apply_restriction(&mut tree, &[0, n - 1]).unwrap());
    }

    /// Disjoint pairs on a wide root each become a small group; the other
    /// root children are left where they are.
    #[test]
    fn disjoint_pairs_on_a_wide_root() {
        let n = 20_000;
        let mut tree = PqTree::new(n);
        for i in 0..200 {
            assert!(apply(&mut tree, &[2 * i, 2 * i + 1]));
        }
        let stats = tree.stats();
        assert_eq!((stats.p_nodes, stats.q_nodes, stats.height), (201, 0, 2));
        let root = tree.root().unwrap();
        assert_eq!(tree.node(root).unwrap().child_count(), n - 200);
        assert_eq!(tree.check_consistency(), Ok(()));
    }

    /// Incremental planarity style use: contract a confirmed run, then keep
    /// restricting over the new leaves.
    #[test]
    fn merge_then_restrict_over_new_leaves() {
        let mut tree = PqTree::new(5);
        assert!(apply_restriction(&mut tree, &[0, 1, 2]).unwrap());
        let fresh = merge_and_replace_leaves(&mut tree, &[0, 1, 2], 2).unwrap();
        clean_up(&mut tree);
        assert_eq!(fresh, vec![5, 6]);
        assert!(apply(&mut tree, &[6, 3]));
        assert!(apply(&mut tree, &[5, 6, 3]));
        assert_eq!(tree.check_consistency(), Ok(()));
        assert!(contiguous(&tree.frontier(), &[5, 6, 3]));
        assert!(contiguous(&tree.frontier(), &[6, 3]));
    }

    fn restriction_sequences() -> impl Strategy<Value = (usize, Vec<Vec<usize>>)> {
        (3usize..=6).prop_flat_map(|n| {
            let set = proptest::sample::subsequence((0..n).collect::<Vec<_>>(), 2..=n);
            (Just(n), proptest::collection::vec(set, 1..7))
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// The tree admits exactly the orderings that keep every applied
        /// restriction contiguous, and reports `false` exactly when none do.
        #[test]
        fn agrees_with_brute_force((n, restrictions) in restriction_sequences()) {
            let mut tree = PqTree::new(n);
            let mut survivors = permutations(n);
            for restriction in &restrictions {
                survivors.retain(|order| contiguous(order, restriction));
                let possible = apply_restriction(&mut tree, restriction).unwrap();
                clean_up(&mut tree);
                prop_assert_eq!(possible, !survivors.is_empty());
                if !possible {
                    break;
                }
                prop_assert_eq!(tree.check_consistency(), Ok(()));
                prop_assert_eq!(linear_orders(&tree).to_string(), survivors.len().to_string());
                let frontier = tree.frontier();
                prop_assert!(survivors.contains(&frontier));
            }
        }

        /// Satisfiable sequences applied in reverse order end in the same
        /// canonical tree.
        #[test]
        fn canonical_id_ignores_restriction_order((n, restrictions) in restriction_sequences()) {
            let mut scratch = PqTree::new(n);
            let satisfiable = restrictions.iter().take_while(|r| apply(&mut scratch, r)).count();
            let prefix = &restrictions[..satisfiable];

            let mut forward = PqTree::new(n);
            let mut backward = PqTree::new(n);
            for restriction in prefix {
                prop_assert!(apply(&mut forward, restriction));
            }
            for restriction in prefix.iter().rev() {
                prop_assert!(apply(&mut backward, restriction));
            }
            prop_assert_eq!(uid(&forward), uid(&backward));
            prop_assert_eq!(fingerprint(&forward), fingerprint(&backward));
        }

        /// Chained mode reaches the same trees as strict mode with explicit
        /// cleanups.
        #[test]
        fn chained_matches_strict((n, restrictions) in restriction_sequences()) {
            let mut strict = PqTree::new(n);
            let mut chained = PqTree::with_config(
                n,
                EngineConfig::default().with_cleanup(CleanupPolicy::Chained),
            );
            let mut all_possible = true;
            for restriction in &restrictions {
                let expected = apply(&mut strict, restriction);
                prop_assert_eq!(apply_restriction(&mut chained, restriction).unwrap(), expected);
                if !expected {
                    all_possible = false;
                    break;
                }
            }
            clean_up(&mut chained);
            if all_possible {
                prop_assert_eq!(uid(&strict), uid(&chained));
            }
        }
    }
}
