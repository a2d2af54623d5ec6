//! Reloader error types.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("fetch failed for {url}: {reason}")]
    FetchFailed { url: String, reason: String },

    /// `get_compiled` before the first successful compile.
    #[error("no engine has been compiled yet")]
    NotCompiled,

    #[error("file source escapes the base directory: {0}")]
    AccessOutsideBase(PathBuf),

    #[error("file source {path} exceeds the {limit}-byte ceiling")]
    FileTooLarge { path: PathBuf, limit: u64 },

    #[error("invalid source url: {0}")]
    InvalidUrl(String),

    #[error("compile failed: {0}")]
    Compile(String),
}

impl ReloadError {
    pub(crate) fn fetch(url: &str, reason: impl ToString) -> Self {
        Self::FetchFailed {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}
