//! Restriction cycle operations on a PQ-tree.
//!
//! One cycle is `apply_restriction` (bubble then reduce), an optional
//! `merge_and_replace_leaves` on the confirmed run, and `clean_up`.
//! Input validation happens before any mutation, so a rejected call leaves
//! the tree exactly as it was.
//!
//! # Citations
//! - Booth & Lueker, "Testing for the consecutive ones property, interval graphs,
//!   and graph planarity using PQ-tree algorithms", JCSS 13 (1976)
//! - Leaf contraction for vertex addition: Lempel, Even & Cederbaum, "An algorithm
//!   for planarity testing of graphs" (1967)

use crate::arena::NodeId;
use crate::bubble::bubble;
use crate::config::CleanupPolicy;
use crate::core::{ConfirmedRun, Label, LeafId, NodeKind, PqTree, Side, TreeError};
use crate::reduce::{reduce, Run};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, debug_span};

/// Applies one restriction: the leaves in `restriction` must end up
/// consecutive.
///
/// Returns `Ok(false)` when no ordering admitted by the tree keeps them
/// consecutive. The tree may then be partially restructured and should be
/// discarded or rebuilt. Errors are reserved for invalid input, misuse of
/// the cleanup contract, and corruption.
pub fn apply_restriction(tree: &mut PqTree, restriction: &[LeafId]) -> Result<bool, TreeError> {
    let started = Instant::now();
    let _span = debug_span!("apply_restriction", size = restriction.len()).entered();
    tree.ensure_usable()?;
    let leaves = resolve_restriction(tree, restriction)?;
    if tree.dirty {
        match tree.config.cleanup {
            CleanupPolicy::Strict => {
                return Err(TreeError::PreconditionViolation(
                    "labels from the previous restriction are still set; call clean_up first"
                        .to_string(),
                ))
            }
            CleanupPolicy::Chained => tree.reset_touched(),
        }
    }

    tree.dirty = true;
    tree.confirmed = None;
    let outcome = if let [leaf] = leaves.as_slice() {
        tree.nodes[*leaf].label = Label::Full;
        tree.touched.push(*leaf);
        Some(Run::whole(tree, *leaf))
    } else {
        let pertinent_root = bubble(tree, &leaves)?;
        reduce(tree, &leaves, pertinent_root)?
    };

    let possible = match outcome {
        Some(run) => {
            if tree.config.verify_after_reduce {
                tree.check_consistency()?;
            }
            let mut sorted = restriction.to_vec();
            sorted.sort_unstable();
            tree.confirmed = Some(ConfirmedRun {
                leaves: sorted,
                holder: run.holder,
                nodes: run.nodes,
            });
            true
        }
        None => false,
    };
    debug!(possible, "restriction applied");
    tree.last_duration = started.elapsed();
    Ok(possible)
}

/// Maps leaf identities to leaf nodes, rejecting empty, duplicate and
/// unknown identities.
fn resolve_restriction(tree: &PqTree, restriction: &[LeafId]) -> Result<Vec<NodeId>, TreeError> {
    if restriction.is_empty() {
        return Err(TreeError::EmptyRestriction);
    }
    let mut seen = HashSet::with_capacity(restriction.len());
    let mut leaves = Vec::with_capacity(restriction.len());
    for &index in restriction {
        let Some(node) = tree.leaf_node(index) else {
            return Err(TreeError::InvalidLeafIndex {
                index,
                issued: tree.issued_leaf_ids(),
            });
        };
        if !seen.insert(index) {
            return Err(TreeError::DuplicateLeafIndex { index });
        }
        leaves.push(node);
    }
    Ok(leaves)
}

/// Clears every label and counter written since the last cleanup.
///
/// Cost is proportional to the nodes touched by the last restriction.
/// Structural changes are kept. Calling it twice is the same as once.
pub fn clean_up(tree: &mut PqTree) {
    let started = Instant::now();
    tree.reset_touched();
    tree.last_duration = started.elapsed();
}

/// Contracts the run confirmed by the last successful restriction into
/// `replacement` fresh leaves and returns their identities.
///
/// `consecutive` must be exactly the leaf set of that restriction (in any
/// order). One replacement leaf takes the run's place directly; several are
/// placed under a new P-node in that place. The merged-away identities are
/// retired. On any precondition failure the tree is left untouched.
pub fn merge_and_replace_leaves(
    tree: &mut PqTree,
    consecutive: &[LeafId],
    replacement: usize,
) -> Result<Vec<LeafId>, TreeError> {
    let started = Instant::now();
    tree.ensure_usable()?;
    if replacement == 0 {
        return Err(TreeError::PreconditionViolation(
            "replacement must contain at least one leaf".to_string(),
        ));
    }
    let Some(run) = tree.confirmed.take() else {
        return Err(TreeError::PreconditionViolation(
            "no restriction has been confirmed since the last restructuring".to_string(),
        ));
    };
    let mut requested = consecutive.to_vec();
    requested.sort_unstable();
    if requested != run.leaves {
        let err = TreeError::PreconditionViolation(format!(
            "leaves {requested:?} were not confirmed consecutive (last confirmed: {:?})",
            run.leaves
        ));
        tree.confirmed = Some(run);
        return Err(err);
    }
    if let Some(holder) = run.holder {
        let stray = run.nodes.iter().find(|&&node| tree.parent(node) != Some(holder));
        if run.nodes.is_empty() || stray.is_some() {
            return Err(tree.poison(format!("confirmed run is no longer below {holder}")));
        }
    }

    let mut issued = Vec::with_capacity(replacement);
    let mut replacement_leaves = Vec::with_capacity(replacement);
    for _ in 0..replacement {
        let (leaf, node) = tree.new_leaf();
        issued.push(leaf);
        replacement_leaves.push(node);
    }
    let substitute = match replacement_leaves.as_slice() {
        [single] => *single,
        _ => {
            let group = tree.new_node(NodeKind::P, Label::Empty);
            for &leaf in &replacement_leaves {
                tree.append_child(group, leaf, Side::Last);
            }
            group
        }
    };

    match run.holder {
        None => {
            for &node in &run.nodes {
                tree.free_subtree(node);
            }
            tree.root = Some(substitute);
        }
        Some(holder) => {
            let Some((&first, rest)) = run.nodes.split_first() else {
                return Err(tree.poison(format!("confirmed run below {holder} is empty")));
            };
            tree.replace(first, substitute)?;
            for &node in rest {
                tree.detach(node)?;
            }
            for &node in &run.nodes {
                tree.free_subtree(node);
            }
            let node = &mut tree.nodes[holder];
            if node.kind == NodeKind::Q && node.child_count == 2 {
                node.kind = NodeKind::P;
            }
            tree.collapse_if_unary(holder)?;
        }
    }

    debug!(
        merged = run.leaves.len(),
        replacement,
        new_leaves = ?issued,
        "leaves merged"
    );
    tree.last_duration = started.elapsed();
    Ok(issued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use std::time::Duration;

    fn apply(tree: &mut PqTree, leaves: &[usize]) -> bool {
        let possible = apply_restriction(tree, leaves).unwrap();
        clean_up(tree);
        possible
    }

    #[test]
    fn out_of_range_index_is_an_error_not_false() {
        let mut tree = PqTree::new(7);
        let err = apply_restriction(&mut tree, &[3, 7]).unwrap_err();
        assert_eq!(err, TreeError::InvalidLeafIndex { index: 7, issued: 7 });
        assert!(!tree.is_dirty());
    }

    #[test]
    fn duplicate_and_empty_restrictions_are_rejected() {
        let mut tree = PqTree::new(4);
        assert_eq!(
            apply_restriction(&mut tree, &[1, 2, 1]),
            Err(TreeError::DuplicateLeafIndex { index: 1 })
        );
        assert_eq!(apply_restriction(&mut tree, &[]), Err(TreeError::EmptyRestriction));
        assert_eq!(tree.stats().p_nodes, 1);
    }

    #[test]
    fn singleton_restriction_is_trivially_possible() {
        let mut tree = PqTree::new(5);
        let before = tree.stats();
        assert!(apply(&mut tree, &[3]));
        assert_eq!(tree.stats(), before);
    }

    #[test]
    fn cleanup_is_idempotent() {
        let mut tree = PqTree::new(6);
        assert!(apply_restriction(&mut tree, &[1, 2]).unwrap());
        clean_up(&mut tree);
        let once = (tree.stats(), tree.frontier(), tree.is_dirty());
        clean_up(&mut tree);
        assert_eq!((tree.stats(), tree.frontier(), tree.is_dirty()), once);
    }

    #[test]
    fn strict_mode_requires_cleanup_between_restrictions() {
        let mut tree = PqTree::new(6);
        assert!(apply_restriction(&mut tree, &[0, 1]).unwrap());
        assert!(matches!(
            apply_restriction(&mut tree, &[2, 3]),
            Err(TreeError::PreconditionViolation(_))
        ));
        clean_up(&mut tree);
        assert!(apply_restriction(&mut tree, &[2, 3]).unwrap());
    }

    #[test]
    fn chained_mode_cleans_implicitly() {
        let config = EngineConfig::default().with_cleanup(CleanupPolicy::Chained);
        let mut chained = PqTree::with_config(6, config);
        let mut strict = PqTree::new(6);
        for set in [&[0, 1][..], &[1, 2], &[4, 5]] {
            assert!(apply_restriction(&mut chained, set).unwrap());
            assert!(apply(&mut strict, set));
        }
        clean_up(&mut chained);
        assert_eq!(chained.frontier(), strict.frontier());
        assert_eq!(chained.stats(), strict.stats());
    }

    #[test]
    fn merge_requires_a_confirmed_run() {
        let mut tree = PqTree::new(5);
        assert!(matches!(
            merge_and_replace_leaves(&mut tree, &[0, 1], 1),
            Err(TreeError::PreconditionViolation(_))
        ));
        assert!(apply(&mut tree, &[0, 1]));
        let before = (tree.stats(), tree.frontier(), tree.issued_leaf_ids());
        assert!(matches!(
            merge_and_replace_leaves(&mut tree, &[0, 2], 1),
            Err(TreeError::PreconditionViolation(_))
        ));
        assert!(matches!(
            merge_and_replace_leaves(&mut tree, &[0, 1], 0),
            Err(TreeError::PreconditionViolation(_))
        ));
        assert_eq!((tree.stats(), tree.frontier(), tree.issued_leaf_ids()), before);
        assert_eq!(tree.leaf_count(), 5);
        // The confirmation survives rejected attempts.
        assert_eq!(merge_and_replace_leaves(&mut tree, &[1, 0], 1).unwrap(), vec![5]);
    }

    #[test]
    fn merge_into_single_leaf() {
        let mut tree = PqTree::new(5);
        assert!(apply(&mut tree, &[1, 3]));
        let fresh = merge_and_replace_leaves(&mut tree, &[3, 1], 1).unwrap();
        assert_eq!(fresh, vec![5]);
        assert_eq!(tree.leaf_count(), 4);
        assert_eq!(tree.leaf_ids().collect::<Vec<_>>(), vec![0, 2, 4, 5]);
        assert_eq!(tree.stats().p_nodes, 1);
        assert_eq!(tree.check_consistency(), Ok(()));
        // Merged-away identities are no longer valid.
        assert!(matches!(
            apply_restriction(&mut tree, &[1, 2]),
            Err(TreeError::InvalidLeafIndex { index: 1, issued: 6 })
        ));
    }

    #[test]
    fn merge_into_several_leaves_inside_an_ordered_node() {
        let mut tree = PqTree::new(6);
        assert!(apply(&mut tree, &[0, 1]));
        assert!(apply(&mut tree, &[1, 2]));
        assert!(apply(&mut tree, &[2, 3]));
        assert!(apply(&mut tree, &[1, 2]));
        let fresh = merge_and_replace_leaves(&mut tree, &[1, 2], 3).unwrap();
        assert_eq!(fresh, vec![6, 7, 8]);
        assert_eq!(tree.leaf_count(), 7);
        assert_eq!(tree.check_consistency(), Ok(()));

        // The replacement sits between 0 and 3.
        let frontier = tree.frontier();
        let pos = |leaf: usize| frontier.iter().position(|&l| l == leaf).unwrap();
        let (lo, hi) = (pos(0).min(pos(3)), pos(0).max(pos(3)));
        assert_eq!(hi - lo, 4);
        for leaf in fresh {
            assert!(lo < pos(leaf) && pos(leaf) < hi);
        }
    }

    #[test]
    fn merge_shrinking_an_ordered_node_to_two_children_makes_it_unordered() {
        let mut tree = PqTree::new(4);
        assert!(apply(&mut tree, &[0, 1]));
        assert!(apply(&mut tree, &[1, 2]));
        // Root is now Q(0, 1, 2) beside leaf 3 under a P root.
        assert!(apply(&mut tree, &[1, 2]));
        merge_and_replace_leaves(&mut tree, &[1, 2], 1).unwrap();
        let stats = tree.stats();
        assert_eq!((stats.p_nodes, stats.q_nodes), (2, 0));
        assert_eq!(tree.check_consistency(), Ok(()));
    }

    #[test]
    fn merge_of_the_whole_tree_replaces_the_root() {
        let mut tree = PqTree::new(3);
        assert!(apply(&mut tree, &[0, 1, 2]));
        let fresh = merge_and_replace_leaves(&mut tree, &[0, 1, 2], 2).unwrap();
        assert_eq!(fresh, vec![3, 4]);
        assert_eq!(tree.frontier(), vec![3, 4]);
        assert_eq!(tree.check_consistency(), Ok(()));
    }

    #[test]
    fn a_second_merge_needs_a_new_confirmation() {
        let mut tree = PqTree::new(5);
        assert!(apply(&mut tree, &[0, 1]));
        merge_and_replace_leaves(&mut tree, &[0, 1], 1).unwrap();
        assert!(matches!(
            merge_and_replace_leaves(&mut tree, &[0, 1], 1),
            Err(TreeError::PreconditionViolation(_))
        ));
    }

    #[test]
    fn restriction_on_a_single_leaf_tree_can_be_merged() {
        let mut tree = PqTree::new(1);
        assert!(apply(&mut tree, &[0]));
        assert_eq!(merge_and_replace_leaves(&mut tree, &[0], 3).unwrap(), vec![1, 2, 3]);
        assert_eq!(tree.frontier(), vec![1, 2, 3]);
    }

    #[test]
    fn every_timed_operation_records_its_duration() {
        let sentinel = Duration::from_secs(3600);
        let mut tree = PqTree::new(6);

        tree.last_duration = sentinel;
        assert!(apply_restriction(&mut tree, &[1, 2]).unwrap());
        assert_ne!(tree.last_duration(), sentinel);

        tree.last_duration = sentinel;
        clean_up(&mut tree);
        assert_ne!(tree.last_duration(), sentinel);

        tree.last_duration = sentinel;
        merge_and_replace_leaves(&mut tree, &[1, 2], 2).unwrap();
        assert_ne!(tree.last_duration(), sentinel);
    }

    #[test]
    fn merge_on_a_wide_root_keeps_the_other_children() {
        let mut tree = PqTree::new(1000);
        assert!(apply(&mut tree, &[500, 501]));
        assert_eq!(merge_and_replace_leaves(&mut tree, &[500, 501], 1).unwrap(), vec![1000]);
        let root = tree.root().unwrap();
        assert_eq!(tree.node(root).unwrap().child_count(), 999);
        assert_eq!(tree.parent(tree.leaf_node(1000).unwrap()), Some(root));
        assert_eq!(tree.check_consistency(), Ok(()));
    }
}
