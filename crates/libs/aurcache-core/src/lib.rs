//! # aurcache-core: cache manager, recipe parser, subprocess runner, metadata store
//!
//! This crate holds the domain logic of the caching Git proxy: materializing
//! per-package Git repositories on demand, answering the upstream RPC from
//! the local cache, and tracking per-package fetch/access statistics.
//!
//! ## Key modules
//!
//! - [`cache`]: the package cache manager (materialize, validate, refresh)
//! - [`proc`]: the subprocess runner (batched and streaming Git invocations)
//! - [`recipe`]: the build-recipe parser (shell-eval, then line-scan fallback)
//! - [`store`]: the metadata store (package counters, TTLs, RPC response cache)
//! - [`types`]: shared data types (package records, repository info, recipes)

pub mod cache;
pub mod error;
pub mod proc;
pub mod recipe;
pub mod store;
pub mod types;

pub use error::{Error, Result};
