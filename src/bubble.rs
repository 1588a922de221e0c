//! Bubble phase: locate the pertinent subtree of a restriction.
//!
//! Two FIFO passes over the marked region:
//! 1. Marking walks upward from the restriction leaves, counting marked
//!    children per ancestor, until a single open path remains (or every
//!    path has reached the root). This may overshoot the pertinent root by
//!    a few ancestors.
//! 2. Counting sums restriction leaves bottom-up, releasing a node once all
//!    of its marked children have reported. The first node whose count
//!    equals the restriction size is the pertinent root.
//!
//! Both passes only visit marked nodes, so the cost is proportional to the
//! pertinent subtree plus the overshoot.

use crate::arena::NodeId;
use crate::core::{Label, PqTree, TreeError};
use std::collections::{HashMap, VecDeque};

/// Marks the ancestors of `leaves` and returns the pertinent root.
///
/// `leaves` must be distinct live leaf nodes, at least two of them.
pub(crate) fn bubble(tree: &mut PqTree, leaves: &[NodeId]) -> Result<NodeId, TreeError> {
    let mut queue: VecDeque<NodeId> = VecDeque::with_capacity(leaves.len());
    for &leaf in leaves {
        tree.mark(leaf);
        tree.nodes[leaf].label = Label::Full;
        tree.nodes[leaf].scratch.pertinent_leaves = 1;
        queue.push_back(leaf);
    }

    let mut open = queue.len();
    while let Some(node) = queue.pop_front() {
        if open == 1 {
            break;
        }
        let Some(parent) = tree.parent_mut(node) else {
            if tree.root != Some(node) {
                return Err(tree.poison(format!("{node} is detached but is not the root")));
            }
            // The root waits for the other paths to arrive.
            continue;
        };
        if tree.nodes.get(parent).map_or(true, |p| p.is_leaf()) {
            return Err(tree.poison(format!("{node} resolves to a parent {parent} that holds no children")));
        }
        open -= 1;
        let first_visit = !tree.nodes[parent].scratch.marked;
        tree.nodes[parent].scratch.pertinent_children += 1;
        if first_visit {
            tree.mark(parent);
            queue.push_back(parent);
            open += 1;
        }
    }

    pertinent_root(tree, leaves)
}

fn pertinent_root(tree: &mut PqTree, leaves: &[NodeId]) -> Result<NodeId, TreeError> {
    let target = leaves.len() as u32;
    let mut reported: HashMap<NodeId, u32> = HashMap::new();
    let mut queue: VecDeque<NodeId> = leaves.iter().copied().collect();

    while let Some(node) = queue.pop_front() {
        let count = tree.nodes[node].scratch.pertinent_leaves;
        if count == target {
            return Ok(node);
        }
        let Some(parent) = tree.parent_mut(node) else {
            break;
        };
        let scratch = &mut tree.nodes[parent].scratch;
        scratch.pertinent_leaves += count;
        let seen = reported.entry(parent).or_insert(0);
        *seen += 1;
        if *seen == scratch.pertinent_children {
            queue.push_back(parent);
        }
    }

    Err(tree.poison(format!(
        "no ancestor spans all {target} restriction leaves"
    )))
}
