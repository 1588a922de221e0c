//! Reduce phase: template-driven restructuring of the pertinent subtree.
//!
//! Nodes are reduced bottom-up in FIFO order; a node enters the queue once
//! every one of its pertinent children has been reduced and has reported
//! its label. The pertinent root is reduced with the root templates, which
//! report the run of full nodes left behind for a later leaf merge.

mod templates;

use crate::arena::NodeId;
use crate::core::{Label, PqTree, TreeError};
use std::collections::VecDeque;

/// Consecutive full siblings left by a successful reduce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Run {
    /// Node whose children contain the run; `None` when the run is the root.
    pub(crate) holder: Option<NodeId>,
    pub(crate) nodes: Vec<NodeId>,
}

impl Run {
    /// The run consisting of `x` alone.
    pub(crate) fn whole(tree: &PqTree, x: NodeId) -> Self {
        Self {
            holder: tree.parent(x),
            nodes: vec![x],
        }
    }

    /// The full children of `holder` around `anchor`, in sibling order.
    /// After reduce they form one block, so the walk stops at the first
    /// non-full sibling on either side.
    pub(crate) fn full_block(tree: &PqTree, holder: NodeId, anchor: Option<NodeId>) -> Self {
        let is_full = |id: NodeId| tree.nodes[id].label == Label::Full;
        let mut nodes = Vec::new();
        if let Some(anchor) = anchor.filter(|&a| is_full(a)) {
            let [left, right] = tree.nodes[anchor].siblings;
            let walk = |first: Option<NodeId>| {
                let mut found = Vec::new();
                let (mut previous, mut current) = (Some(anchor), first);
                while let Some(id) = current.filter(|&c| is_full(c)) {
                    found.push(id);
                    current = tree.next_sibling(id, previous);
                    previous = Some(id);
                }
                found
            };
            nodes = walk(left);
            nodes.reverse();
            nodes.push(anchor);
            nodes.extend(walk(right));
        }
        Self {
            holder: Some(holder),
            nodes,
        }
    }
}

/// Applies templates from the restriction leaves up to `pertinent_root`.
///
/// Returns `None` when some node matches no template: the restriction is
/// inconsistent with the tree, which may then be partially restructured.
pub(crate) fn reduce(
    tree: &mut PqTree,
    leaves: &[NodeId],
    pertinent_root: NodeId,
) -> Result<Option<Run>, TreeError> {
    let mut queue: VecDeque<NodeId> = leaves.iter().copied().collect();
    while let Some(node) = queue.pop_front() {
        if node == pertinent_root {
            return templates::reduce_root(tree, node);
        }
        let Some((node, label)) = templates::reduce_inner(tree, node)? else {
            return Ok(None);
        };
        let Some(parent) = tree.parent_mut(node) else {
            return Err(tree.poison(format!("{node} has no parent below the pertinent root")));
        };
        let scratch = match label {
            Label::Empty => {
                return Err(tree.poison(format!("pertinent {node} reduced to an empty label")));
            }
            _ => &mut tree.nodes[parent].scratch,
        };
        if label == Label::Full {
            scratch.full_children.push(node);
        } else {
            scratch.partial_children.push(node);
        }
        scratch.pertinent_children = scratch.pertinent_children.saturating_sub(1);
        if scratch.pertinent_children == 0 {
            queue.push_back(parent);
        }
    }
    Err(tree.poison(format!(
        "reduce drained its queue before reaching {pertinent_root}"
    )))
}
