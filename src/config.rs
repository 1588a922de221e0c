//! Engine configuration.
//!
//! The only behavioural switch is the cleanup contract between two
//! restrictions. Everything else is diagnostic.

use serde::{Deserialize, Serialize};

/// What the engine does when a restriction arrives while labels from the
/// previous cycle are still present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    /// The caller must call `clean_up` between restrictions. Applying while
    /// dirty is a `PreconditionViolation`.
    #[default]
    Strict,
    /// The engine resets transient state itself at the start of the next
    /// restriction.
    Chained,
}

/// Construction-time options for a [`PqTree`](crate::core::PqTree).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cleanup: CleanupPolicy,
    /// Walk the whole tree after every successful reduce and poison the
    /// instance if any structural invariant is broken.
    pub verify_after_reduce: bool,
}

impl EngineConfig {
    pub fn with_cleanup(mut self, cleanup: CleanupPolicy) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn with_verification(mut self, verify_after_reduce: bool) -> Self {
        self.verify_after_reduce = verify_after_reduce;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cleanup: CleanupPolicy::Strict,
            verify_after_reduce: cfg!(debug_assertions),
        }
    }
}
