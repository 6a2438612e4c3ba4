//! Process-level plumbing shared by the aurcache binary and server crates:
//! configuration loading, startup error types, and tracing setup.

pub mod config;
pub mod error;
pub mod tracing;

pub use config::AppConfig;
pub use error::{Result, ServerError};
