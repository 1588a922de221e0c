//! Canonical string form of a PQ-tree.
//!
//! Two trees that admit the same orderings up to rotation (compared on the
//! unrooted view, where the root with exactly two children disappears)
//! render to the same string.
//!
//! # Determinism
//! - Leaves are ranked by ascending identity; the highest identity anchors
//!   the rendering.
//! - Inner nodes are ranked in the order a FIFO labelling pass completes
//!   them, starting from all other leaves in ascending order.
//! - P-node children are emitted by descending rank. Q-node children are
//!   emitted in the direction fixed by the ranks of their end neighbours.
//!
//! # Citations
//! - PC-trees and their unrooted view: Hsu & McConnell, "PC trees and circular-ones
//!   arrangements", TCS 296 (2003)
//! - Canonical forms of trees by leaf-driven labelling: Aho, Hopcroft & Ullman,
//!   "The Design and Analysis of Computer Algorithms", Section 3.2 (1974)

use crate::arena::NodeId;
use crate::core::{LeafId, NodeKind, PqTree, TreeError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Rendering options for [`unique_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct UidOptions {
    /// Print leaves by rank instead of by raw identity.
    pub normalize_leaf_ids: bool,
    /// Prefix every inner node with `rank:`.
    pub include_inner_node_order: bool,
}

impl Default for UidOptions {
    fn default() -> Self {
        Self {
            normalize_leaf_ids: true,
            include_inner_node_order: true,
        }
    }
}

/// The tree seen without its root when the root has exactly two children.
struct Unrooted<'a> {
    tree: &'a PqTree,
    suppressed: Option<NodeId>,
}

impl<'a> Unrooted<'a> {
    fn new(tree: &'a PqTree) -> Self {
        let suppressed = tree.root.filter(|&root| {
            let node = &tree.nodes[root];
            !node.is_leaf() && node.child_count == 2
        });
        Self { tree, suppressed }
    }

    /// The neighbour on the root side.
    fn up(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.tree.parent(id)?;
        if Some(parent) == self.suppressed {
            self.tree.children(parent).find(|&c| c != id)
        } else {
            Some(parent)
        }
    }

    /// Neighbours in cyclic order: the root-side neighbour, then children.
    fn neighbors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.tree.nodes[id].child_count + 1);
        out.extend(self.up(id));
        out.extend(self.tree.children(id));
        out
    }

    fn degree(&self, id: NodeId) -> usize {
        let up = self.tree.parent(id).is_some() as usize;
        self.tree.nodes[id].child_count + up
    }
}

/// Result of the labelling pass.
struct Labelling {
    rank: HashMap<NodeId, usize>,
    /// Neighbours that completed before a node and informed it.
    informers: HashMap<NodeId, Vec<NodeId>>,
    /// The neighbour each completed node informed.
    informed: HashMap<NodeId, NodeId>,
    anchor: NodeId,
    top: NodeId,
}

impl Labelling {
    fn rank(&self, id: NodeId) -> Result<usize, TreeError> {
        self.rank
            .get(&id)
            .copied()
            .ok_or_else(|| corrupt(format!("{id} was not reached by the labelling pass")))
    }
}

fn corrupt(problem: String) -> TreeError {
    tracing::warn!(%problem, "canonical id failed");
    TreeError::StructuralCorruption(problem)
}

fn label(view: &Unrooted<'_>, leaves: &[(LeafId, NodeId)]) -> Result<Labelling, TreeError> {
    let n = leaves.len();
    let mut rank: HashMap<NodeId, usize> = leaves
        .iter()
        .enumerate()
        .map(|(r, &(_, node))| (node, r))
        .collect();
    let anchor = leaves[n - 1].1;
    let mut informers: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut informed = HashMap::new();
    let mut full = HashSet::new();
    let mut queue: VecDeque<NodeId> = leaves[..n - 1].iter().map(|&(_, node)| node).collect();
    let mut next_rank = n;

    while let Some(node) = queue.pop_front() {
        full.insert(node);
        let target = view
            .neighbors(node)
            .into_iter()
            .find(|w| !full.contains(w))
            .ok_or_else(|| corrupt(format!("{node} completed with no open neighbour")))?;
        if view.tree.nodes[target].is_leaf() {
            return Ok(Labelling {
                rank,
                informers,
                informed,
                anchor,
                top: node,
            });
        }
        informed.insert(node, target);
        let waiting = informers.entry(target).or_default();
        waiting.push(node);
        if waiting.len() + 1 == view.degree(target) {
            rank.insert(target, next_rank);
            next_rank += 1;
            queue.push_back(target);
        }
    }
    Err(corrupt("labelling never reached the anchor leaf".to_string()))
}

enum Emit {
    Node(NodeId),
    Text(&'static str),
}

/// Renders the canonical ID of `tree`.
///
/// Trees with no leaves render as `"empty"`, with one or two as
/// `"too small"`.
pub fn unique_id(tree: &PqTree, options: UidOptions) -> Result<String, TreeError> {
    let leaves: Vec<(LeafId, NodeId)> = tree
        .leaves
        .iter()
        .enumerate()
        .filter_map(|(id, node)| node.map(|node| (id, node)))
        .collect();
    match leaves.len() {
        0 => return Ok("empty".to_string()),
        1 | 2 => return Ok("too small".to_string()),
        _ => {}
    }

    let view = Unrooted::new(tree);
    let labels = label(&view, &leaves)?;
    let mut out = String::new();
    let mut stack = vec![Emit::Node(labels.top)];

    while let Some(item) = stack.pop() {
        let id = match item {
            Emit::Text(text) => {
                out.push_str(text);
                continue;
            }
            Emit::Node(id) => id,
        };
        let node = &tree.nodes[id];
        if let NodeKind::Leaf(leaf) = node.kind {
            let shown = if options.normalize_leaf_ids { labels.rank(id)? } else { leaf };
            out.push_str(&shown.to_string());
            continue;
        }

        let (children, open, close) = match node.kind {
            NodeKind::Q => (ordered_children(&view, &labels, id)?, "[", "]"),
            _ => {
                let mut children = labels.informers.get(&id).cloned().unwrap_or_default();
                if id == labels.top {
                    children.push(labels.anchor);
                }
                let mut ranked = children
                    .into_iter()
                    .map(|c| Ok((labels.rank(c)?, c)))
                    .collect::<Result<Vec<_>, TreeError>>()?;
                ranked.sort_unstable();
                let children = ranked.into_iter().map(|(_, c)| c).collect();
                if view.degree(id) <= 3 {
                    (children, "[", "]")
                } else {
                    (children, "(", ")")
                }
            }
        };

        if options.include_inner_node_order {
            out.push_str(&format!("{}:", labels.rank(id)?));
        }
        out.push_str(open);
        stack.push(Emit::Text(close));
        // Pushed in ascending order, emitted in reverse.
        for (i, child) in children.into_iter().enumerate() {
            if i > 0 {
                stack.push(Emit::Text(", "));
            }
            stack.push(Emit::Node(child));
        }
    }
    Ok(out)
}

/// Q-node neighbours in the order they are pushed for emission.
fn ordered_children(
    view: &Unrooted<'_>,
    labels: &Labelling,
    id: NodeId,
) -> Result<Vec<NodeId>, TreeError> {
    let mut cyclic = view.neighbors(id);
    let d = cyclic.len();
    if d < 3 {
        return Err(corrupt(format!("Q-node {id} has degree {d}")));
    }

    if id == labels.top {
        let ranks = cyclic
            .iter()
            .map(|&c| labels.rank(c))
            .collect::<Result<Vec<_>, TreeError>>()?;
        let start = (0..d).min_by_key(|&i| ranks[i]).unwrap_or(0);
        cyclic.rotate_left(start);
        if labels.rank(cyclic[1])? > labels.rank(cyclic[d - 1])? {
            cyclic[1..].reverse();
        }
        return Ok(cyclic);
    }

    let toward_top = labels
        .informed
        .get(&id)
        .and_then(|up| cyclic.iter().position(|c| c == up))
        .ok_or_else(|| corrupt(format!("Q-node {id} lost its informed neighbour")))?;
    let next = cyclic[(toward_top + 1) % d];
    let prev = cyclic[(toward_top + d - 1) % d];
    let sequence = if labels.rank(next)? < labels.rank(prev)? {
        (1..d).map(|k| cyclic[(toward_top + k) % d]).collect()
    } else {
        (1..d).map(|k| cyclic[(toward_top + d - k) % d]).collect()
    };
    Ok(sequence)
}
