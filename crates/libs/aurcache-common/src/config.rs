//! Process configuration, read once at startup (spec §6).
//!
//! The core consumes only the resolved values; it never reads environment
//! variables or argv itself. `clap`'s `env` feature lets the same struct
//! double as a CLI parser and an environment-variable reader.

use crate::error::{Result, ServerError};
use bytesize::ByteSize;
use clap::Parser;
use std::path::PathBuf;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_CACHE_ROOT: &str = "./cached_packages";
const DEFAULT_MAX_UPLOAD_SIZE: &str = "50mb";

#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "Caching Git proxy for a package recipe index")]
pub struct AppConfig {
    /// TCP port to listen on.
    #[arg(long, env = "AURCACHE_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Root directory under which per-package repositories are materialized.
    #[arg(long, env = "AURCACHE_CACHE_ROOT", default_value = DEFAULT_CACHE_ROOT)]
    pub cache_root: PathBuf,

    /// Maximum accepted body size for Git smart-HTTP POST requests (e.g. "50mb").
    #[arg(long, env = "AURCACHE_MAX_UPLOAD_SIZE", default_value = DEFAULT_MAX_UPLOAD_SIZE)]
    pub max_upload_size: ByteSize,

    /// Emit logs as JSON instead of human-readable text.
    #[arg(long, env = "AURCACHE_LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

impl AppConfig {
    /// Parses configuration from argv/env and validates it.
    ///
    /// An invalid port aborts startup, per spec §6.
    pub fn load() -> Result<Self> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(ServerError::Config(
                "port must be between 1 and 65535".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            cache_root: PathBuf::from(DEFAULT_CACHE_ROOT),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE
                .parse()
                .unwrap_or(ByteSize::mb(50)),
            log_json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = AppConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.cache_root, PathBuf::from("./cached_packages"));
        assert_eq!(config.max_upload_size, ByteSize::mb(50));
    }

    #[test]
    fn zero_port_is_invalid() {
        let config = AppConfig {
            port: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
