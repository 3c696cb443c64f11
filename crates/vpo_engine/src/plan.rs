//! Plan: the ordered output of running all phases.

use serde::Serialize;
use thiserror::Error;
use vpo_policy::Action;

/// Flat, ordered list of actions plus surfaced warnings and internal
/// markers. Actions are executed in emission order; deduplication across
/// phases is deliberately not performed, so downstream execution must be
/// idempotent against its actions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Plan {
    pub actions: Vec<Action>,
    /// Expanded `warn` messages accumulated during planning.
    pub warnings: Vec<String>,
    /// Internal markers (e.g. transcription requests); never executed.
    pub notes: Vec<String>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Errors aborting plan assembly.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A phase failed and `config.on_error` is `stop`.
    #[error("phase '{phase}' failed: {message}")]
    PhaseFailed { phase: String, message: String },

    /// Evaluator consistency check tripped on a malformed AST; the
    /// policy did not come through the loader.
    #[error("internal consistency failure: {0}")]
    Internal(String),
}
