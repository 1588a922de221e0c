//! Core data structures for the PQ-tree.
//!
//! A PQ-tree over a leaf set represents a family of leaf orderings:
//! P-nodes permit any permutation of their children, Q-nodes permit only
//! their child sequence and its reversal. Restrictions narrow the family.
//!
//! # Invariants (steady state, between operations)
//! - Every inner node has at least two children; Q-nodes have at least three.
//! - Children form a doubly linked sibling list bounded by the parent's
//!   `ends`; every child resolves its parent through the parent's child set.
//! - Every live leaf identity maps to exactly one leaf node.
//! - Labels and scratch counters are `Empty`/zero outside a restriction cycle.

use crate::arena::{NodeArena, NodeId, ParentSets, SetId};
use crate::config::EngineConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Stable identity of a leaf. Issued densely from zero at creation and
/// continued by leaf merges.
pub type LeafId = usize;

/// Node kind, as a tagged variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Terminal node carrying its leaf identity.
    Leaf(LeafId),
    /// Unordered inner node.
    P,
    /// Ordered inner node.
    Q,
}

impl NodeKind {
    #[inline]
    pub fn leaf_id(&self) -> Option<LeafId> {
        match self {
            NodeKind::Leaf(id) => Some(*id),
            _ => None,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        matches!(self, NodeKind::Leaf(_))
    }
}

/// Transient pertinence label, valid only within one restriction cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Label {
    /// No restriction leaf below (unmarked).
    #[default]
    Empty,
    /// Some but not all leaves below are restriction leaves.
    Partial,
    /// Every leaf below is a restriction leaf.
    Full,
}

/// Per-cycle bookkeeping written by bubble and reduce, wiped by cleanup.
#[derive(Debug, Clone, Default)]
pub(crate) struct Scratch {
    pub(crate) marked: bool,
    /// Bubble: marked children. Reduce: children not yet reduced.
    pub(crate) pertinent_children: u32,
    pub(crate) pertinent_leaves: u32,
    pub(crate) full_children: Vec<NodeId>,
    pub(crate) partial_children: Vec<NodeId>,
}

impl Scratch {
    fn reset(&mut self) {
        self.marked = false;
        self.pertinent_children = 0;
        self.pertinent_leaves = 0;
        self.full_children.clear();
        self.partial_children.clear();
    }
}

/// End of a child list. For Q-nodes the two ends fix the orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    First,
    Last,
}

impl Side {
    #[inline]
    fn index(self) -> usize {
        match self {
            Side::First => 0,
            Side::Last => 1,
        }
    }
}

/// A node of the tree.
///
/// Children form a doubly linked list through `siblings`. The two sibling
/// slots are unordered, so reversing or concatenating lists never touches
/// the interior. A child finds its parent through the parent's child set.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) kind: NodeKind,
    /// Child set of the parent; `None` for the root and detached nodes.
    pub(crate) parent: Option<SetId>,
    pub(crate) siblings: [Option<NodeId>; 2],
    /// Child set owned by this node; `None` for leaves.
    pub(crate) set: Option<SetId>,
    /// First and last child.
    pub(crate) ends: [Option<NodeId>; 2],
    pub(crate) child_count: usize,
    pub(crate) label: Label,
    pub(crate) scratch: Scratch,
}

impl Node {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            siblings: [None; 2],
            set: None,
            ends: [None; 2],
            child_count: 0,
            label: Label::Empty,
            scratch: Scratch::default(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn child_count(&self) -> usize {
        self.child_count
    }

    pub fn label(&self) -> Label {
        self.label
    }

    pub fn is_leaf(&self) -> bool {
        self.kind.is_leaf()
    }
}

/// Children of one node in stored order; see [`PqTree::children`].
#[derive(Debug, Clone)]
pub struct Children<'a> {
    nodes: &'a NodeArena<Node>,
    previous: Option<NodeId>,
    current: Option<NodeId>,
    remaining: usize,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.current?;
        let [a, b] = self.nodes.get(current)?.siblings;
        self.current = if a == self.previous { b } else { a };
        self.previous = Some(current);
        self.remaining -= 1;
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

/// Errors raised by engine operations.
///
/// An unsatisfiable restriction is not an error: it is reported as `false`.
/// `InvalidLeafIndex`, `DuplicateLeafIndex` and `EmptyRestriction` together
/// form the bad-leaf-input class; test for it with
/// [`is_invalid_input`](Self::is_invalid_input).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("leaf index {index} is not a live leaf (identities issued: {issued})")]
    InvalidLeafIndex { index: LeafId, issued: usize },
    #[error("leaf index {index} appears more than once in the restriction")]
    DuplicateLeafIndex { index: LeafId },
    #[error("restriction must name at least one leaf")]
    EmptyRestriction,
    #[error("precondition violated: {0}")]
    PreconditionViolation(String),
    #[error("structural corruption: {0}")]
    StructuralCorruption(String),
}

impl TreeError {
    /// True for the bad-leaf-input class: an unknown, repeated or missing
    /// leaf index, rejected before any mutation.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            TreeError::InvalidLeafIndex { .. }
                | TreeError::DuplicateLeafIndex { .. }
                | TreeError::EmptyRestriction
        )
    }
}

/// Node and depth counts of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TreeStats {
    pub leaves: usize,
    pub p_nodes: usize,
    pub q_nodes: usize,
    /// Number of edges on the longest root-to-leaf path.
    pub height: usize,
}

/// Run of sibling nodes proven consecutive by the last successful reduce.
#[derive(Debug, Clone)]
pub(crate) struct ConfirmedRun {
    /// Restriction leaves, sorted.
    pub(crate) leaves: Vec<LeafId>,
    /// Node whose children contain the run; `None` when the run is the root.
    pub(crate) holder: Option<NodeId>,
    /// The full nodes of the run, consecutive within `holder`.
    pub(crate) nodes: Vec<NodeId>,
}

/// PQ-tree over a set of leaves identified by [`LeafId`].
///
/// # Lifecycle
/// Created with `N` leaves under one P-node root, mutated in place by
/// [`apply_restriction`](crate::operations::apply_restriction) and
/// [`merge_and_replace_leaves`](crate::operations::merge_and_replace_leaves).
/// Labels written during a restriction are wiped by
/// [`clean_up`](crate::operations::clean_up).
#[derive(Debug, Clone)]
pub struct PqTree {
    pub(crate) nodes: NodeArena<Node>,
    /// Child sets; a child's `parent` resolves through here.
    pub(crate) sets: ParentSets,
    pub(crate) root: Option<NodeId>,
    /// Leaf node by identity; `None` once merged away.
    pub(crate) leaves: Vec<Option<NodeId>>,
    pub(crate) live_leaves: usize,
    pub(crate) config: EngineConfig,
    /// Nodes whose label or scratch may be non-default.
    pub(crate) touched: Vec<NodeId>,
    pub(crate) dirty: bool,
    pub(crate) confirmed: Option<ConfirmedRun>,
    pub(crate) corruption: Option<String>,
    pub(crate) last_duration: Duration,
}

impl PqTree {
    /// Creates a tree with `leaf_count` leaves `0..leaf_count` under one
    /// P-node root.
    ///
    /// A single leaf is its own root; zero leaves give an empty tree.
    pub fn new(leaf_count: usize) -> Self {
        Self::with_config(leaf_count, EngineConfig::default())
    }

    pub fn with_config(leaf_count: usize, config: EngineConfig) -> Self {
        let mut nodes = NodeArena::with_capacity(leaf_count + 1);
        let mut sets = ParentSets::new();
        let mut leaves = Vec::with_capacity(leaf_count);
        let root = match leaf_count {
            0 => None,
            1 => {
                let leaf = nodes.allocate(Node::new(NodeKind::Leaf(0)));
                leaves.push(Some(leaf));
                Some(leaf)
            }
            _ => {
                let root = nodes.allocate(Node::new(NodeKind::P));
                let set = sets.create(root);
                let ids: Vec<NodeId> = (0..leaf_count)
                    .map(|id| {
                        let mut leaf = Node::new(NodeKind::Leaf(id));
                        leaf.parent = Some(set);
                        nodes.allocate(leaf)
                    })
                    .collect();
                for (i, &leaf) in ids.iter().enumerate() {
                    let before = i.checked_sub(1).map(|p| ids[p]);
                    nodes[leaf].siblings = [before, ids.get(i + 1).copied()];
                }
                let node = &mut nodes[root];
                node.set = Some(set);
                node.ends = [ids.first().copied(), ids.last().copied()];
                node.child_count = leaf_count;
                leaves.extend(ids.into_iter().map(Some));
                Some(root)
            }
        };

        Self {
            nodes,
            sets,
            root,
            leaves,
            live_leaves: leaf_count,
            config,
            touched: Vec::new(),
            dirty: false,
            confirmed: None,
            corruption: None,
            last_duration: Duration::ZERO,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Parent of `id`; `None` for the root, detached or unknown nodes.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.sets.owner(self.nodes.get(id)?.parent?)
    }

    /// Children of `id` from first to last. Empty for leaves and unknown
    /// handles.
    pub fn children(&self, id: NodeId) -> Children<'_> {
        let (first, remaining) = self
            .nodes
            .get(id)
            .map_or((None, 0), |node| (node.ends[0], node.child_count));
        Children {
            nodes: &self.nodes,
            previous: None,
            current: first,
            remaining,
        }
    }

    /// Number of live leaves.
    pub fn leaf_count(&self) -> usize {
        self.live_leaves
    }

    /// Number of leaf identities issued so far, including merged-away ones.
    pub fn issued_leaf_ids(&self) -> usize {
        self.leaves.len()
    }

    /// Live leaf identities in ascending order.
    pub fn leaf_ids(&self) -> impl Iterator<Item = LeafId> + '_ {
        self.leaves
            .iter()
            .enumerate()
            .filter_map(|(id, node)| node.map(|_| id))
    }

    /// The node holding leaf `id`, if it is live.
    pub fn leaf_node(&self, id: LeafId) -> Option<NodeId> {
        self.leaves.get(id).copied().flatten()
    }

    /// True while labels from the last restriction have not been cleaned.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// True once a structural check has failed. Every later operation
    /// reports `StructuralCorruption`.
    pub fn is_poisoned(&self) -> bool {
        self.corruption.is_some()
    }

    /// Duration of the most recent apply, cleanup or merge.
    pub fn last_duration(&self) -> Duration {
        self.last_duration
    }

    /// Leaves from left to right: one ordering the tree admits.
    pub fn frontier(&self) -> Vec<LeafId> {
        let mut order = Vec::with_capacity(self.live_leaves);
        let mut stack: Vec<NodeId> = self.root.into_iter().collect();
        let mut children = Vec::new();
        while let Some(id) = stack.pop() {
            match self.nodes[id].kind {
                NodeKind::Leaf(leaf) => order.push(leaf),
                _ => {
                    children.extend(self.children(id));
                    stack.extend(children.drain(..).rev());
                }
            }
        }
        order
    }

    /// True when `order` lists every live leaf exactly once, in an
    /// ordering the tree admits.
    ///
    /// Every subtree must occupy a contiguous stretch of `order`, and the
    /// children of a Q-node must appear in stored or reversed sequence.
    pub fn is_valid_order(&self, order: &[LeafId]) -> bool {
        if order.len() != self.live_leaves {
            return false;
        }
        let mut position = vec![None; self.leaves.len()];
        for (at, &leaf) in order.iter().enumerate() {
            if self.leaf_node(leaf).is_none() || position[leaf].replace(at).is_some() {
                return false;
            }
        }
        let Some(root) = self.root else {
            return true;
        };

        // First and last position covered by each finished subtree.
        let mut span: HashMap<NodeId, (usize, usize)> = HashMap::new();
        let mut stack = vec![(root, false)];
        while let Some((id, expanded)) = stack.pop() {
            let node = &self.nodes[id];
            if let NodeKind::Leaf(leaf) = node.kind {
                let Some(at) = position[leaf] else {
                    return false;
                };
                span.insert(id, (at, at));
                continue;
            }
            if !expanded {
                stack.push((id, true));
                stack.extend(self.children(id).map(|child| (child, false)));
                continue;
            }

            let mut starts = Vec::with_capacity(node.child_count);
            let (mut low, mut high, mut covered) = (usize::MAX, 0, 0);
            for child in self.children(id) {
                let Some(&(first, last)) = span.get(&child) else {
                    return false;
                };
                low = low.min(first);
                high = high.max(last);
                covered += last - first + 1;
                starts.push(first);
            }
            if starts.is_empty() || high - low + 1 != covered {
                return false;
            }
            if node.kind == NodeKind::Q {
                let forward = starts.windows(2).all(|w| w[0] < w[1]);
                let backward = starts.windows(2).all(|w| w[0] > w[1]);
                if !(forward || backward) {
                    return false;
                }
            }
            span.insert(id, (low, high));
        }
        true
    }

    /// Counts leaves, P-nodes, Q-nodes and the height of the tree.
    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats::default();
        let mut stack: Vec<(NodeId, usize)> = self.root.map(|r| (r, 0)).into_iter().collect();
        while let Some((id, depth)) = stack.pop() {
            stats.height = stats.height.max(depth);
            match self.nodes[id].kind {
                NodeKind::Leaf(_) => stats.leaves += 1,
                NodeKind::P => stats.p_nodes += 1,
                NodeKind::Q => stats.q_nodes += 1,
            }
            stack.extend(self.children(id).map(|c| (c, depth + 1)));
        }
        stats
    }

    /// Verifies every steady-state invariant. A violation poisons the tree.
    pub fn check_consistency(&mut self) -> Result<(), TreeError> {
        self.ensure_usable()?;
        match self.find_inconsistency() {
            None => Ok(()),
            Some(problem) => Err(self.poison(problem)),
        }
    }

    fn find_inconsistency(&self) -> Option<String> {
        let Some(root) = self.root else {
            return (self.live_leaves != 0)
                .then(|| format!("empty tree claims {} live leaves", self.live_leaves));
        };
        let Some(root_node) = self.nodes.get(root) else {
            return Some(format!("root {root} is not allocated"));
        };
        if root_node.parent.is_some() || root_node.siblings != [None, None] {
            return Some(format!("root {root} is linked into a child list"));
        }

        let mut seen_leaves = 0usize;
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(id) else {
                return Some(format!("{id} is linked but not allocated"));
            };
            match node.kind {
                NodeKind::Leaf(leaf) => {
                    if node.child_count != 0 || node.ends != [None, None] {
                        return Some(format!("leaf {leaf} has children"));
                    }
                    if self.leaf_node(leaf) != Some(id) {
                        return Some(format!("leaf {leaf} is not registered at {id}"));
                    }
                    seen_leaves += 1;
                    continue;
                }
                NodeKind::P if node.child_count < 2 => {
                    return Some(format!("P-node {id} has {} children", node.child_count));
                }
                NodeKind::Q if node.child_count < 3 => {
                    return Some(format!("Q-node {id} has {} children", node.child_count));
                }
                _ => {}
            }
            if node.set.and_then(|set| self.sets.owner(set)) != Some(id) {
                return Some(format!("{id} does not own its child set"));
            }

            let (mut previous, mut current, mut seen) = (None, node.ends[0], 0usize);
            while let Some(child) = current {
                seen += 1;
                if seen > node.child_count {
                    return Some(format!("children of {id} exceed the count {}", node.child_count));
                }
                let Some(c) = self.nodes.get(child) else {
                    return Some(format!("{id} links freed child {child}"));
                };
                if !c.siblings.contains(&previous) {
                    return Some(format!("{child} is not linked back to its sibling"));
                }
                if self.parent(child) != Some(id) {
                    return Some(format!("{child} does not point back to parent {id}"));
                }
                if current == node.ends[1] && seen != node.child_count {
                    return Some(format!("last child of {id} reached early"));
                }
                stack.push(child);
                let [a, b] = c.siblings;
                let next = if a == previous { b } else { a };
                previous = current;
                current = next;
            }
            if seen != node.child_count || previous != node.ends[1] {
                return Some(format!(
                    "{id} has {seen} linked children but records {}",
                    node.child_count
                ));
            }
        }

        (seen_leaves != self.live_leaves).then(|| {
            format!(
                "reached {seen_leaves} leaves but {} are registered",
                self.live_leaves
            )
        })
    }

    pub(crate) fn ensure_usable(&self) -> Result<(), TreeError> {
        match &self.corruption {
            Some(problem) => Err(TreeError::StructuralCorruption(problem.clone())),
            None => Ok(()),
        }
    }

    /// Records a corruption and returns the error to propagate.
    pub(crate) fn poison(&mut self, problem: String) -> TreeError {
        tracing::warn!(%problem, "pq-tree poisoned");
        self.corruption = Some(problem.clone());
        TreeError::StructuralCorruption(problem)
    }

    // ---- structural primitives used by reduce and merge ----
    //
    // Every primitive touches only the nodes it names and their direct
    // neighbours, so a restriction costs time in the pertinent subtree.

    /// Allocates a node and records it as touched for the current cycle.
    /// Inner nodes get a fresh child set.
    pub(crate) fn new_node(&mut self, kind: NodeKind, label: Label) -> NodeId {
        let mut node = Node::new(kind);
        node.label = label;
        let id = self.nodes.allocate(node);
        if !kind.is_leaf() {
            self.nodes[id].set = Some(self.sets.create(id));
        }
        self.touched.push(id);
        id
    }

    /// Marks a node as reached by bubble.
    pub(crate) fn mark(&mut self, id: NodeId) {
        self.nodes[id].scratch.marked = true;
        self.touched.push(id);
    }

    /// Like [`parent`](Self::parent), compressing the set lookup path.
    pub(crate) fn parent_mut(&mut self, id: NodeId) -> Option<NodeId> {
        let set = self.nodes.get(id)?.parent?;
        self.sets.owner_compressing(set)
    }

    pub(crate) fn end(&self, id: NodeId, side: Side) -> Option<NodeId> {
        self.nodes[id].ends[side.index()]
    }

    /// The sibling of `id` that is not `previous`.
    pub(crate) fn next_sibling(&self, id: NodeId, previous: Option<NodeId>) -> Option<NodeId> {
        let [a, b] = self.nodes[id].siblings;
        if a == previous {
            b
        } else {
            a
        }
    }

    /// Rewrites the sibling slot of `id` holding `old`.
    fn replace_sibling(&mut self, id: NodeId, old: Option<NodeId>, new: Option<NodeId>) {
        let slots = &mut self.nodes[id].siblings;
        if slots[0] == old {
            slots[0] = new;
        } else {
            slots[1] = new;
        }
    }

    /// Rewrites the end of `parent` holding `old`.
    fn replace_end(&mut self, parent: NodeId, old: NodeId, new: Option<NodeId>) {
        let ends = &mut self.nodes[parent].ends;
        if ends[0] == Some(old) {
            ends[0] = new;
        } else {
            ends[1] = new;
        }
    }

    /// Links `end` to `neighbour` where `old` was, or makes it the end of
    /// `parent` when `old` had no sibling on that side.
    fn link_in_place(&mut self, parent: NodeId, old: NodeId, end: NodeId, neighbour: Option<NodeId>) {
        match neighbour {
            Some(n) => {
                self.replace_sibling(n, Some(old), Some(end));
                self.replace_sibling(end, None, Some(n));
            }
            None => self.replace_end(parent, old, Some(end)),
        }
    }

    /// Adds a detached node at one end of the child list of `parent`.
    pub(crate) fn append_child(&mut self, parent: NodeId, child: NodeId, side: Side) {
        let at = side.index();
        let set = self.nodes[parent].set;
        let outer = self.nodes[parent].ends[at];
        let node = &mut self.nodes[child];
        node.parent = set;
        node.siblings = [outer, None];
        match outer {
            Some(outer) => self.replace_sibling(outer, None, Some(child)),
            None => self.nodes[parent].ends[1 - at] = Some(child),
        }
        let parent = &mut self.nodes[parent];
        parent.ends[at] = Some(child);
        parent.child_count += 1;
    }

    /// Unlinks `child` from its parent's child list.
    pub(crate) fn detach(&mut self, child: NodeId) -> Result<(), TreeError> {
        let Some(parent) = self.parent_mut(child) else {
            return Err(self.poison(format!("{child} has no parent to detach from")));
        };
        let [a, b] = self.nodes[child].siblings;
        for (this, other) in [(a, b), (b, a)] {
            match this {
                Some(n) => self.replace_sibling(n, Some(child), other),
                None => self.replace_end(parent, child, other),
            }
        }
        self.nodes[parent].child_count -= 1;
        let node = &mut self.nodes[child];
        node.parent = None;
        node.siblings = [None; 2];
        Ok(())
    }

    /// Puts the detached node `new` where `old` hangs, in its parent's
    /// child list or as root. `old` ends up detached.
    pub(crate) fn replace(&mut self, old: NodeId, new: NodeId) -> Result<(), TreeError> {
        if self.root == Some(old) {
            self.root = Some(new);
            let node = &mut self.nodes[new];
            node.parent = None;
            node.siblings = [None; 2];
            return Ok(());
        }
        let Some(parent) = self.parent_mut(old) else {
            return Err(self.poison(format!("{old} is detached but is not the root")));
        };
        let (set, siblings) = {
            let node = &mut self.nodes[old];
            let links = (node.parent.take(), node.siblings);
            node.siblings = [None; 2];
            links
        };
        let node = &mut self.nodes[new];
        node.parent = set;
        node.siblings = siblings;
        for neighbour in siblings {
            match neighbour {
                Some(n) => self.replace_sibling(n, Some(old), Some(new)),
                None => self.replace_end(parent, old, Some(new)),
            }
        }
        Ok(())
    }

    /// Replaces `child` in its parent's child list by the children of
    /// `child`, then frees `child`. The last child of `child` ends up next
    /// to `last_beside`, one of the sibling slots of `child`.
    pub(crate) fn splice_into_parent(
        &mut self,
        child: NodeId,
        last_beside: Option<NodeId>,
    ) -> Result<(), TreeError> {
        let Some(parent) = self.parent_mut(child) else {
            return Err(self.poison(format!("{child} has no parent to splice into")));
        };
        let (siblings, ends, inner, moved) = {
            let node = &self.nodes[child];
            (node.siblings, node.ends, node.set, node.child_count)
        };
        let (Some(first), Some(last), Some(inner), Some(outer)) =
            (ends[0], ends[1], inner, self.nodes[parent].set)
        else {
            return Err(self.poison(format!("{child} cannot be spliced into {parent}")));
        };
        let (last_side, first_side) = if siblings[0] == last_beside {
            (siblings[0], siblings[1])
        } else {
            (siblings[1], siblings[0])
        };
        self.link_in_place(parent, child, last, last_side);
        self.link_in_place(parent, child, first, first_side);
        self.sets.absorb(inner, outer);
        self.nodes[parent].child_count += moved;
        self.nodes[parent].child_count -= 1;
        self.nodes.deallocate(child);
        Ok(())
    }

    /// Appends the children of the detached node `tail`, last child first,
    /// after the last child of `head`, then frees `tail`.
    pub(crate) fn concat_reversed(&mut self, head: NodeId, tail: NodeId) -> Result<(), TreeError> {
        let (Some(end), Some(tail_first), Some(tail_last), Some(inner), Some(outer)) = (
            self.nodes[head].ends[1],
            self.nodes[tail].ends[0],
            self.nodes[tail].ends[1],
            self.nodes[tail].set,
            self.nodes[head].set,
        ) else {
            return Err(self.poison(format!("{tail} cannot be appended to {head}")));
        };
        self.replace_sibling(end, None, Some(tail_last));
        self.replace_sibling(tail_last, None, Some(end));
        let moved = self.nodes[tail].child_count;
        let node = &mut self.nodes[head];
        node.ends[1] = Some(tail_first);
        node.child_count += moved;
        self.sets.absorb(inner, outer);
        self.nodes.deallocate(tail);
        Ok(())
    }

    /// Reverses a child list by swapping its ends.
    pub(crate) fn reverse_children(&mut self, id: NodeId) {
        self.nodes[id].ends.swap(0, 1);
    }

    /// Replaces a one-child inner node by its child and frees it.
    pub(crate) fn collapse_if_unary(&mut self, id: NodeId) -> Result<(), TreeError> {
        if self.nodes[id].child_count != 1 {
            return Ok(());
        }
        let Some(child) = self.nodes[id].ends[0] else {
            return Err(self.poison(format!("{id} counts one child but links none")));
        };
        self.detach(child)?;
        self.replace(id, child)?;
        self.free_node(id);
        Ok(())
    }

    /// Frees a single node whose children have been moved elsewhere.
    pub(crate) fn free_node(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.deallocate(id) {
            if let Some(set) = node.set {
                self.sets.retire(set);
            }
        }
    }

    /// Frees the detached node `id` and everything below it, retiring the
    /// leaf identities.
    pub(crate) fn free_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            stack.extend(self.children(current));
            let Some(node) = self.nodes.deallocate(current) else {
                continue;
            };
            if let Some(set) = node.set {
                self.sets.retire(set);
            }
            if let NodeKind::Leaf(leaf) = node.kind {
                if let Some(slot) = self.leaves.get_mut(leaf) {
                    *slot = None;
                    self.live_leaves -= 1;
                }
            }
        }
    }

    /// Allocates a fresh leaf identity and its node.
    pub(crate) fn new_leaf(&mut self) -> (LeafId, NodeId) {
        let leaf = self.leaves.len();
        let id = self.nodes.allocate(Node::new(NodeKind::Leaf(leaf)));
        self.leaves.push(Some(id));
        self.live_leaves += 1;
        (leaf, id)
    }

    /// Resets labels and scratch on every touched node.
    pub(crate) fn reset_touched(&mut self) {
        let mut touched = std::mem::take(&mut self.touched);
        for id in touched.drain(..) {
            if let Some(node) = self.nodes.get_mut(id) {
                node.label = Label::Empty;
                node.scratch.reset();
            }
        }
        self.touched = touched;
        self.dirty = false;
    }
}

/// Raw dump in stored child order: `handle:(..)` for P-nodes,
/// `handle:[..]` for Q-nodes, leaf identities for leaves. Handles depend
/// on the operation history; use [`unique_id`](crate::canonical::unique_id)
/// to compare trees.
impl fmt::Display for PqTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        enum Piece {
            Node(NodeId),
            Text(&'static str),
        }

        let Some(root) = self.root else {
            return f.write_str("empty");
        };
        let mut stack = vec![Piece::Node(root)];
        let mut children = Vec::new();
        while let Some(piece) = stack.pop() {
            let id = match piece {
                Piece::Text(text) => {
                    f.write_str(text)?;
                    continue;
                }
                Piece::Node(id) => id,
            };
            let close = match self.nodes[id].kind {
                NodeKind::Leaf(leaf) => {
                    write!(f, "{leaf}")?;
                    continue;
                }
                NodeKind::P => {
                    write!(f, "{}:(", id.as_u32())?;
                    ")"
                }
                NodeKind::Q => {
                    write!(f, "{}:[", id.as_u32())?;
                    "]"
                }
            };
            stack.push(Piece::Text(close));
            children.extend(self.children(id));
            for (i, child) in children.drain(..).enumerate().rev() {
                stack.push(Piece::Node(child));
                if i > 0 {
                    stack.push(Piece::Text(", "));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds `P(0, Q[1, 2, 3], 4)` by hand.
    fn with_q_child() -> (PqTree, NodeId) {
        let mut tree = PqTree::new(5);
        let q = tree.new_node(NodeKind::Q, Label::Empty);
        let first = tree.leaf_node(1).unwrap();
        tree.replace(first, q).unwrap();
        tree.append_child(q, first, Side::Last);
        for leaf in [2, 3] {
            let node = tree.leaf_node(leaf).unwrap();
            tree.detach(node).unwrap();
            tree.append_child(q, node, Side::Last);
        }
        tree.reset_touched();
        (tree, q)
    }

    #[test]
    fn fresh_tree_is_a_single_p_node() {
        let tree = PqTree::new(5);
        let root = tree.root().unwrap();
        let root_node = tree.node(root).unwrap();
        assert_eq!(root_node.kind(), NodeKind::P);
        assert_eq!(root_node.child_count(), 5);
        assert_eq!(tree.children(root).count(), 5);
        assert_eq!(tree.frontier(), vec![0, 1, 2, 3, 4]);
        assert_eq!(
            tree.stats(),
            TreeStats {
                leaves: 5,
                p_nodes: 1,
                q_nodes: 0,
                height: 1
            }
        );
        for id in 0..5 {
            let leaf = tree.leaf_node(id).unwrap();
            let node = tree.node(leaf).unwrap();
            assert_eq!(node.kind().leaf_id(), Some(id));
            assert_eq!(tree.parent(leaf), Some(root));
            assert_eq!(node.label(), Label::Empty);
        }
    }

    #[test]
    fn degenerate_sizes() {
        let empty = PqTree::new(0);
        assert!(empty.root().is_none());
        assert_eq!(empty.stats(), TreeStats::default());
        assert_eq!(empty.to_string(), "empty");

        let single = PqTree::new(1);
        let root = single.root().unwrap();
        assert_eq!(single.node(root).unwrap().kind(), NodeKind::Leaf(0));
        assert_eq!(single.frontier(), vec![0]);
        assert_eq!(single.to_string(), "0");
    }

    #[test]
    fn consistency_holds_on_fresh_trees() {
        for n in 0..6 {
            let mut tree = PqTree::new(n);
            assert_eq!(tree.check_consistency(), Ok(()));
        }
    }

    #[test]
    fn broken_link_poisons_the_tree() {
        let mut tree = PqTree::new(3);
        let leaf = tree.leaf_node(1).unwrap();
        tree.nodes[leaf].parent = None;
        let err = tree.check_consistency().unwrap_err();
        assert!(matches!(err, TreeError::StructuralCorruption(_)));
        assert!(tree.is_poisoned());
        // Still poisoned after the link is repaired.
        assert!(matches!(
            tree.check_consistency(),
            Err(TreeError::StructuralCorruption(_))
        ));
    }

    #[test]
    fn miscounted_child_list_is_corruption() {
        let mut tree = PqTree::new(4);
        let root = tree.root().unwrap();
        tree.nodes[root].child_count = 5;
        assert!(matches!(
            tree.check_consistency(),
            Err(TreeError::StructuralCorruption(_))
        ));
    }

    #[test]
    fn free_subtree_retires_leaf_ids() {
        let mut tree = PqTree::new(4);
        let leaf = tree.leaf_node(2).unwrap();
        tree.detach(leaf).unwrap();
        tree.free_subtree(leaf);
        assert_eq!(tree.leaf_node(2), None);
        assert_eq!(tree.leaf_count(), 3);
        assert_eq!(tree.issued_leaf_ids(), 4);
        assert_eq!(tree.leaf_ids().collect::<Vec<_>>(), vec![0, 1, 3]);
        assert_eq!(tree.frontier(), vec![0, 1, 3]);
        assert_eq!(tree.check_consistency(), Ok(()));
    }

    #[test]
    fn list_edits_keep_links_consistent() {
        let (mut tree, q) = with_q_child();
        let root = tree.root().unwrap();
        assert_eq!(tree.frontier(), vec![0, 1, 2, 3, 4]);
        assert_eq!(tree.parent(tree.leaf_node(2).unwrap()), Some(q));
        assert_eq!(tree.check_consistency(), Ok(()));

        tree.reverse_children(q);
        assert_eq!(tree.frontier(), vec![0, 3, 2, 1, 4]);

        // Splicing puts the last child of `q` next to leaf 4.
        let four = tree.leaf_node(4).unwrap();
        tree.splice_into_parent(q, Some(four)).unwrap();
        assert_eq!(tree.frontier(), vec![0, 3, 2, 1, 4]);
        assert_eq!(tree.node(root).unwrap().child_count(), 5);
        assert_eq!(tree.parent(tree.leaf_node(3).unwrap()), Some(root));
        assert_eq!(tree.check_consistency(), Ok(()));
    }

    #[test]
    fn concatenation_reverses_the_tail() {
        let mut tree = PqTree::new(6);
        let head = tree.new_node(NodeKind::Q, Label::Empty);
        let tail = tree.new_node(NodeKind::Q, Label::Empty);
        for (target, leaves) in [(head, [0, 1, 2]), (tail, [3, 4, 5])] {
            for leaf in leaves {
                let node = tree.leaf_node(leaf).unwrap();
                tree.detach(node).unwrap();
                tree.append_child(target, node, Side::Last);
            }
        }
        let root = tree.root().unwrap();
        tree.concat_reversed(head, tail).unwrap();
        tree.replace(root, head).unwrap();
        tree.free_node(root);
        tree.reset_touched();
        assert_eq!(tree.frontier(), vec![0, 1, 2, 5, 4, 3]);
        assert_eq!(tree.parent(tree.leaf_node(4).unwrap()), Some(head));
        assert_eq!(tree.check_consistency(), Ok(()));
    }

    #[test]
    fn valid_orders_respect_q_sequences() {
        let (tree, _) = with_q_child();
        assert!(tree.is_valid_order(&[0, 1, 2, 3, 4]));
        assert!(tree.is_valid_order(&[3, 2, 1, 4, 0]));
        assert!(tree.is_valid_order(&[4, 0, 1, 2, 3]));
        assert!(!tree.is_valid_order(&[0, 2, 1, 3, 4]));
        assert!(!tree.is_valid_order(&[0, 1, 4, 2, 3]));
        assert!(!tree.is_valid_order(&[0, 1, 2, 3]));
        assert!(!tree.is_valid_order(&[0, 1, 2, 3, 3]));
        assert!(!tree.is_valid_order(&[0, 1, 2, 3, 9]));
        assert!(PqTree::new(0).is_valid_order(&[]));
    }

    #[test]
    fn display_dumps_stored_order() {
        let (tree, q) = with_q_child();
        let root = tree.root().unwrap().as_u32();
        assert_eq!(
            tree.to_string(),
            format!("{root}:(0, {}:[1, 2, 3], 4)", q.as_u32())
        );
    }

    #[test]
    fn error_messages_name_the_index() {
        let err = TreeError::InvalidLeafIndex {
            index: 9,
            issued: 7,
        };
        assert_eq!(
            err.to_string(),
            "leaf index 9 is not a live leaf (identities issued: 7)"
        );
        assert!(err.is_invalid_input());
        assert!(TreeError::DuplicateLeafIndex { index: 1 }.is_invalid_input());
        assert!(TreeError::EmptyRestriction.is_invalid_input());
        assert!(!TreeError::PreconditionViolation("x".into()).is_invalid_input());
    }
}
