//! Engine error types.

use thiserror::Error;

use skyla_detection::CompileError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// A tokenize action reached the applier with no key configured. The
    /// compiler rejects such policies, so this only fires when an engine
    /// was assembled outside the normal compile path.
    #[error("tokenize requires an hmac key")]
    MissingKey,
}
