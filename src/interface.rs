//! Capability interface shared by consecutive-ones engines.
//!
//! Callers (matrix replay, benchmarks, cross-checking harnesses) depend on
//! [`ConsecutiveOnes`] only, so an engine is chosen once at construction and
//! every later call goes through the trait. [`PqTree`] is the engine this
//! crate provides; other engines plug in by implementing the trait.
//!
//! # References
//! - *Cross-checking independent implementations*: Fink, Pfretzschner & Rutter,
//!   "Experimental Comparison of PC-Trees and PQ-Trees", ESA 2021

use crate::canonical::{self, UidOptions};
use crate::core::{LeafId, PqTree, TreeError};
use crate::fingerprint;
use crate::operations;
use std::time::Duration;

/// Operations every consecutive-ones engine offers.
///
/// # Contract
/// - `apply_restriction` returns `Ok(false)` for an unsatisfiable
///   restriction; errors are reserved for invalid input, misuse and
///   corruption.
/// - `fingerprint` and `unique_id` are read-only and agree across engines
///   that represent the same orderings.
/// - Instances are independent; nothing is shared between them.
pub trait ConsecutiveOnes {
    /// Number of live leaves.
    fn leaf_count(&self) -> usize;

    fn apply_restriction(&mut self, restriction: &[LeafId]) -> Result<bool, TreeError>;

    fn clean_up(&mut self);

    fn fingerprint(&self) -> String;

    fn unique_id(&self, options: UidOptions) -> Result<String, TreeError>;

    fn merge_and_replace_leaves(
        &mut self,
        consecutive: &[LeafId],
        replacement: usize,
    ) -> Result<Vec<LeafId>, TreeError>;

    /// Duration of the most recent mutating operation.
    fn last_duration(&self) -> Duration;

    /// True when `order` is a permutation of the live leaves the engine
    /// still admits.
    fn is_valid_order(&self, order: &[LeafId]) -> bool;

    /// Engine-specific dump of the current structure. Unlike `unique_id` it
    /// is not comparable across engines.
    fn tree_string(&self) -> String;
}

impl ConsecutiveOnes for PqTree {
    fn leaf_count(&self) -> usize {
        PqTree::leaf_count(self)
    }

    fn apply_restriction(&mut self, restriction: &[LeafId]) -> Result<bool, TreeError> {
        operations::apply_restriction(self, restriction)
    }

    fn clean_up(&mut self) {
        operations::clean_up(self)
    }

    fn fingerprint(&self) -> String {
        fingerprint::fingerprint(self)
    }

    fn unique_id(&self, options: UidOptions) -> Result<String, TreeError> {
        canonical::unique_id(self, options)
    }

    fn merge_and_replace_leaves(
        &mut self,
        consecutive: &[LeafId],
        replacement: usize,
    ) -> Result<Vec<LeafId>, TreeError> {
        operations::merge_and_replace_leaves(self, consecutive, replacement)
    }

    fn last_duration(&self) -> Duration {
        PqTree::last_duration(self)
    }

    fn is_valid_order(&self, order: &[LeafId]) -> bool {
        PqTree::is_valid_order(self, order)
    }

    fn tree_string(&self) -> String {
        self.to_string()
    }
}
