//! Compilation error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    /// Every detector was dropped (or none were supplied).
    #[error("no valid detectors remain after compilation")]
    PolicyEmpty,

    /// The policy document carries a structurally invalid value.
    #[error("invalid policy: {0}")]
    PolicyInvalid(String),

    /// The policy resolves at least one rule to tokenize but carries no key.
    #[error("policy tokenizes but no hmacKey is configured")]
    MissingKey,

    /// The literal automaton could not be built.
    #[error("automaton construction failed: {0}")]
    Automaton(String),
}
