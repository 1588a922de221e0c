//! Replay of recorded restriction matrices against an engine.
//!
//! A matrix is a sequence of restrictions over `cols` leaves, plus the
//! expected outcome after the last one. Records deserialize from the JSON
//! layout of the shared fixture files; reading those files is left to the
//! caller.

use crate::canonical::UidOptions;
use crate::core::LeafId;
use crate::interface::ConsecutiveOnes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Expected state after the final restriction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExpectedOutcome {
    pub exp_possible: bool,
    /// Fingerprint digest; not checked when absent or when impossible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp_fingerprint: Option<String>,
    /// Canonical ID; not checked when absent, empty, or when impossible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp_uid: Option<String>,
}

/// One recorded matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestMatrix {
    #[serde(default)]
    pub id: String,
    pub cols: usize,
    pub restrictions: Vec<Vec<LeafId>>,
    #[serde(rename = "last_restriction")]
    pub expected: ExpectedOutcome,
}

/// A single disagreement found during replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Mismatch {
    LeafCount { expected: usize, actual: usize },
    /// A restriction before the last one was impossible.
    EarlyImpossible { row: usize },
    Possible { expected: bool, actual: bool },
    Fingerprint { expected: String, actual: String },
    Uid { expected: String, actual: String },
    Engine { row: usize, message: String },
}

/// Result of replaying one matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixOutcome {
    /// No mismatch was found.
    pub valid: bool,
    /// Every restriction was applied.
    pub complete: bool,
    pub rows_applied: usize,
    pub errors: Vec<Mismatch>,
    /// Sum of the engine's per-operation durations.
    pub elapsed: Duration,
    /// Raw dump of the final tree, for diagnosing mismatches.
    pub tree: String,
}

/// Applies every restriction of `matrix` to `engine` (cleaning up after
/// each), stopping at the first impossible one, and compares the final
/// state with the recorded expectations.
///
/// `engine` must be freshly created with `matrix.cols` leaves.
pub fn verify_matrix<E: ConsecutiveOnes + ?Sized>(engine: &mut E, matrix: &TestMatrix) -> MatrixOutcome {
    let mut errors = Vec::new();
    let mut elapsed = Duration::ZERO;
    let mut rows_applied = 0;
    let mut possible = true;

    if engine.leaf_count() != matrix.cols {
        errors.push(Mismatch::LeafCount {
            expected: matrix.cols,
            actual: engine.leaf_count(),
        });
    }

    let rows = matrix.restrictions.len();
    for (row, restriction) in matrix.restrictions.iter().enumerate() {
        possible = match engine.apply_restriction(restriction) {
            Ok(possible) => possible,
            Err(err) => {
                errors.push(Mismatch::Engine {
                    row,
                    message: err.to_string(),
                });
                false
            }
        };
        elapsed += engine.last_duration();
        engine.clean_up();
        elapsed += engine.last_duration();
        if !possible && row + 1 < rows {
            errors.push(Mismatch::EarlyImpossible { row });
            break;
        }
        rows_applied += 1;
    }

    let expected = &matrix.expected;
    if possible != expected.exp_possible {
        errors.push(Mismatch::Possible {
            expected: expected.exp_possible,
            actual: possible,
        });
    } else if possible && rows_applied == rows {
        if let Some(exp) = &expected.exp_fingerprint {
            let actual = engine.fingerprint();
            if &actual != exp {
                errors.push(Mismatch::Fingerprint {
                    expected: exp.clone(),
                    actual,
                });
            }
        }
        if let Some(exp) = expected.exp_uid.as_ref().filter(|uid| !uid.is_empty()) {
            let actual = engine
                .unique_id(UidOptions::default())
                .unwrap_or_else(|err| err.to_string());
            if &actual != exp {
                errors.push(Mismatch::Uid {
                    expected: exp.clone(),
                    actual,
                });
            }
        }
    }

    let outcome = MatrixOutcome {
        valid: errors.is_empty(),
        complete: rows_applied == rows,
        rows_applied,
        errors,
        elapsed,
        tree: engine.tree_string(),
    };
    debug!(
        id = %matrix.id,
        valid = outcome.valid,
        complete = outcome.complete,
        "matrix replayed"
    );
    outcome
}
