//! Process entry point: loads configuration, installs tracing, and runs the
//! HTTP server until a shutdown signal arrives (spec.md §6).

use anyhow::Result;
use aurcache_common::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    aurcache_common::tracing::setup_tracing(config.log_json);

    tracing::info!(
        port = config.port,
        cache_root = %config.cache_root.display(),
        max_upload_size = %config.max_upload_size,
        "aurcache config loaded"
    );

    aurcache_server::run(config).await?;
    Ok(())
}
