//! Error types for configuration and process-level concerns.
//!
//! Domain errors (cache manager, subprocess runner, recipe parser, metadata
//! store) live in [`aurcache_core::Error`]; this crate wraps the startup and
//! config surface around them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] aurcache_core::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
