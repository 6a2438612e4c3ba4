//! Error types for aurcache-core operations.
//!
//! External errors (libsql, git2, serde_json, io) convert automatically via
//! `#[from]`. The remaining variants name the failure modes spec.md §7
//! documents explicitly: repository-not-found (after both the primary and
//! mirror clone fail), subprocess timeout, and non-zero subprocess exit on a
//! pack operation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Libsql(#[from] libsql::Error),

    #[error("git error: {0}")]
    Git2(#[from] git2::Error),

    #[error("json error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Neither the primary clone nor the mirror fallback produced a valid
    /// repository for `name` (spec.md §4.4 step 3d, §7).
    #[error("repository not found in cache and could not be fetched from upstream: {name}")]
    RepositoryNotFound { name: String },

    /// A subprocess exceeded its deadline (30s clone, 10s recipe eval) and
    /// was killed.
    #[error("subprocess '{program}' timed out after {timeout_secs}s")]
    SubprocessTimeout { program: String, timeout_secs: u64 },

    /// A Git subprocess exited non-zero on a pack operation (spec.md §7).
    #[error("subprocess '{program}' exited with {exit_code:?}: {stderr}")]
    SubprocessFailed {
        program: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = core::result::Result<T, Error>;
