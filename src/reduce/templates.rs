//! Template catalog for the reduce phase.
//!
//! A pertinent node is matched on its kind, its full and partial children,
//! and whether it is the pertinent root. Partial nodes leave this module as
//! Q-nodes whose children read `[empty.., full..]`, full end last; their
//! parent splices those children in and frees the partial node.
//!
//! | node     | full | partial | result                                  |
//! |----------|------|---------|-----------------------------------------|
//! | P        | all  | 0       | P1: node becomes full                   |
//! | P root   | ≥ 2  | 0       | P2: full children grouped under new P   |
//! | P        | ≥ 1  | 0       | P3: node becomes partial Q `[E, F]`     |
//! | P root   | any  | 1       | P4: full group appended to the partial  |
//! | P        | any  | 1       | P5: node becomes partial Q around it    |
//! | P root   | any  | 2       | P6: both partials merged around F       |
//! | Q        | -    | -       | contiguous full block, partials at ends |
//!
//! # Cost
//! Templates only move the full and partial children collected during the
//! cycle. Empty children stay where they are: a P-node keeps them and is
//! itself reused as the empty group, and a partial Q-node is spliced into
//! its parent through its two end children.

use super::Run;
use crate::arena::NodeId;
use crate::core::{Label, NodeKind, PqTree, Side, TreeError};
use tracing::trace;

/// Reduces a pertinent node below the pertinent root. Returns the node now
/// standing in its place with its label, or `None` when no template
/// applies.
pub(super) fn reduce_inner(
    tree: &mut PqTree,
    x: NodeId,
) -> Result<Option<(NodeId, Label)>, TreeError> {
    match tree.nodes[x].kind {
        NodeKind::Leaf(_) => Ok(Some((x, Label::Full))),
        NodeKind::P => reduce_p(tree, x),
        NodeKind::Q => reduce_q(tree, x),
    }
}

/// Reduces the pertinent root and returns the run of full nodes it leaves.
pub(super) fn reduce_root(tree: &mut PqTree, x: NodeId) -> Result<Option<Run>, TreeError> {
    match tree.nodes[x].kind {
        NodeKind::Leaf(_) => Ok(Some(Run::whole(tree, x))),
        NodeKind::P => reduce_p_root(tree, x),
        NodeKind::Q => reduce_q_root(tree, x),
    }
}

fn take_lists(tree: &mut PqTree, x: NodeId) -> (Vec<NodeId>, Vec<NodeId>) {
    let scratch = &mut tree.nodes[x].scratch;
    (
        std::mem::take(&mut scratch.full_children),
        std::mem::take(&mut scratch.partial_children),
    )
}

/// Detaches `full` and returns one node standing for all of them: the
/// node itself when alone, otherwise a new full P-node over them.
fn group_full(tree: &mut PqTree, full: &[NodeId]) -> Result<Option<NodeId>, TreeError> {
    match full {
        [] => Ok(None),
        [only] => {
            tree.detach(*only)?;
            Ok(Some(*only))
        }
        _ => {
            let group = tree.new_node(NodeKind::P, Label::Full);
            for &child in full {
                tree.detach(child)?;
                tree.append_child(group, child, Side::Last);
            }
            Ok(Some(group))
        }
    }
}

/// Turns the detached P-node `x`, left with its empty children only, into
/// the empty group: `x` itself, its single child, or nothing.
fn empty_group(tree: &mut PqTree, x: NodeId) -> Result<Option<NodeId>, TreeError> {
    match tree.nodes[x].child_count {
        0 => {
            tree.free_node(x);
            Ok(None)
        }
        1 => {
            let Some(child) = tree.end(x, Side::First) else {
                return Err(tree.poison(format!("{x} counts one child but links none")));
            };
            tree.detach(child)?;
            tree.free_node(x);
            Ok(Some(child))
        }
        _ => Ok(Some(x)),
    }
}

/// Replaces a partial Q-node by its children inside its parent, its full
/// end facing the pertinent neighbour (or the parent's end when it has
/// none).
fn splice_partial(tree: &mut PqTree, c: NodeId) -> Result<(), TreeError> {
    let [a, b] = tree.nodes[c].siblings;
    let pertinent = |side: Option<NodeId>| side.is_some_and(|n| tree.nodes[n].label != Label::Empty);
    let full_beside = if pertinent(a) {
        a
    } else if pertinent(b) || a.is_some() {
        b
    } else {
        a
    };
    tree.splice_into_parent(c, full_beside)
}

/// Counts pertinent children met walking inward from one end of `x`:
/// full children, then at most one partial child, which ends the walk.
fn block_from_end(tree: &PqTree, x: NodeId, side: Side) -> (usize, Option<NodeId>) {
    let (mut previous, mut current, mut reached) = (None, tree.end(x, side), 0);
    while let Some(child) = current {
        match tree.nodes[child].label {
            Label::Full => reached += 1,
            Label::Partial => return (reached + 1, Some(child)),
            Label::Empty => break,
        }
        current = tree.next_sibling(child, previous);
        previous = Some(child);
    }
    (reached, None)
}

/// Counts pertinent children met walking both ways from `start`: full
/// children continue the walk, a partial child is counted and ends it.
fn block_around(tree: &PqTree, start: NodeId) -> usize {
    let mut reached = 1;
    for first in tree.nodes[start].siblings {
        let (mut previous, mut current) = (Some(start), first);
        while let Some(child) = current {
            match tree.nodes[child].label {
                Label::Full => reached += 1,
                Label::Partial => {
                    reached += 1;
                    break;
                }
                Label::Empty => break,
            }
            current = tree.next_sibling(child, previous);
            previous = Some(child);
        }
    }
    reached
}

fn reduce_p(tree: &mut PqTree, x: NodeId) -> Result<Option<(NodeId, Label)>, TreeError> {
    let (full, partial) = take_lists(tree, x);
    if full.len() == tree.nodes[x].child_count {
        trace!(node = %x, "P1");
        tree.nodes[x].label = Label::Full;
        return Ok(Some((x, Label::Full)));
    }
    if partial.len() > 1 {
        trace!(node = %x, partial = partial.len(), "P-node with several partial children");
        return Ok(None);
    }
    trace!(node = %x, full = full.len(), partial = partial.len(), "{}", if partial.is_empty() { "P3" } else { "P5" });

    let full_group = group_full(tree, &full)?;
    let q = match partial.first() {
        Some(&c) => {
            tree.detach(c)?;
            c
        }
        None => tree.new_node(NodeKind::Q, Label::Partial),
    };
    tree.replace(x, q)?;
    if let Some(empty) = empty_group(tree, x)? {
        tree.append_child(q, empty, Side::First);
    }
    if let Some(full_group) = full_group {
        tree.append_child(q, full_group, Side::Last);
    }
    tree.nodes[q].label = Label::Partial;
    Ok(Some((q, Label::Partial)))
}

fn reduce_p_root(tree: &mut PqTree, x: NodeId) -> Result<Option<Run>, TreeError> {
    let (full, partial) = take_lists(tree, x);
    if full.len() == tree.nodes[x].child_count {
        trace!(node = %x, "P1 at root");
        tree.nodes[x].label = Label::Full;
        return Ok(Some(Run::whole(tree, x)));
    }

    let run = match partial.as_slice() {
        [] => {
            trace!(node = %x, full = full.len(), "P2");
            let Some(full_group) = group_full(tree, &full)? else {
                return Err(tree.poison(format!("pertinent root {x} has no pertinent children")));
            };
            tree.append_child(x, full_group, Side::Last);
            Run {
                holder: Some(x),
                nodes: vec![full_group],
            }
        }
        &[c] => {
            trace!(node = %x, full = full.len(), "P4");
            if let Some(full_group) = group_full(tree, &full)? {
                tree.append_child(c, full_group, Side::Last);
            }
            let anchor = tree.end(c, Side::Last);
            tree.collapse_if_unary(x)?;
            Run::full_block(tree, c, anchor)
        }
        &[c1, c2] => {
            trace!(node = %x, full = full.len(), "P6");
            tree.detach(c2)?;
            if let Some(full_group) = group_full(tree, &full)? {
                tree.append_child(c1, full_group, Side::Last);
            }
            let anchor = tree.end(c1, Side::Last);
            tree.concat_reversed(c1, c2)?;
            tree.collapse_if_unary(x)?;
            Run::full_block(tree, c1, anchor)
        }
        _ => {
            trace!(node = %x, partial = partial.len(), "P-root with more than two partial children");
            return Ok(None);
        }
    };
    Ok(Some(run))
}

fn reduce_q(tree: &mut PqTree, x: NodeId) -> Result<Option<(NodeId, Label)>, TreeError> {
    let (full, partial) = take_lists(tree, x);
    if full.len() == tree.nodes[x].child_count {
        trace!(node = %x, "Q all full");
        tree.nodes[x].label = Label::Full;
        return Ok(Some((x, Label::Full)));
    }
    if partial.len() > 1 {
        trace!(node = %x, partial = partial.len(), "Q-node with several partial children");
        return Ok(None);
    }

    let side = [Side::First, Side::Last].into_iter().find(|&side| {
        tree.end(x, side)
            .is_some_and(|c| tree.nodes[c].label != Label::Empty)
    });
    let Some(side) = side else {
        trace!(node = %x, "Q block does not reach an end");
        return Ok(None);
    };
    let (reached, partial_child) = block_from_end(tree, x, side);
    if reached != full.len() + partial.len() {
        trace!(node = %x, reached, "Q block is not contiguous from its end");
        return Ok(None);
    }
    trace!(node = %x, ?side, "Q partial");

    if let Some(c) = partial_child {
        splice_partial(tree, c)?;
    }
    if side == Side::First {
        tree.reverse_children(x);
    }
    tree.nodes[x].label = Label::Partial;
    Ok(Some((x, Label::Partial)))
}

fn reduce_q_root(tree: &mut PqTree, x: NodeId) -> Result<Option<Run>, TreeError> {
    let (full, partial) = take_lists(tree, x);
    if full.len() == tree.nodes[x].child_count {
        trace!(node = %x, "Q all full at root");
        tree.nodes[x].label = Label::Full;
        return Ok(Some(Run::whole(tree, x)));
    }
    if partial.len() > 2 {
        trace!(node = %x, partial = partial.len(), "Q-root with more than two partial children");
        return Ok(None);
    }
    let Some(&start) = full.first().or(partial.first()) else {
        return Err(tree.poison(format!("pertinent root {x} has no pertinent children")));
    };
    let reached = block_around(tree, start);
    if reached != full.len() + partial.len() {
        trace!(node = %x, reached, "Q block is not contiguous");
        return Ok(None);
    }
    trace!(node = %x, full = full.len(), partial = partial.len(), "Q root");

    let anchor = match full.first() {
        Some(&f) => Some(f),
        None => tree.end(start, Side::Last),
    };
    for &c in &partial {
        splice_partial(tree, c)?;
    }
    Ok(Some(Run::full_block(tree, x, anchor)))
}
