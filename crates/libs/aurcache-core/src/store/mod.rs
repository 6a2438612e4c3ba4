//! Metadata store (spec.md §4.1, C1): per-package counters, TTL, and the RPC
//! response cache, backed by a single embedded relational database file
//! under the cache root.

pub mod metadata;

pub use metadata::MetadataStore;

use crate::Result;
use libsql::Builder;
use std::path::Path;

/// Opens (creating if absent) `cache_root/packages.db`, applies the same
/// concurrency pragmas used elsewhere in this codebase for SQLite under
/// concurrent access, runs migrations, and repairs any zeroed counters left
/// over from a previous, interrupted run.
pub async fn initialize(cache_root: &Path) -> Result<MetadataStore> {
    std::fs::create_dir_all(cache_root)?;
    let db_path = cache_root.join("packages.db");

    let db = Builder::new_local(&db_path).build().await?;
    let conn = db.connect()?;

    let _ = conn.execute("PRAGMA journal_mode=WAL;", ()).await;
    let _ = conn.execute("PRAGMA busy_timeout=30000;", ()).await;
    let _ = conn.execute("PRAGMA synchronous=NORMAL;", ()).await;
    let _ = conn.execute("PRAGMA cache_size=-64000;", ()).await;

    let migrations = [
        include_str!("../../migrations/001_packages.sql"),
        include_str!("../../migrations/002_rpc_cache.sql"),
        include_str!("../../migrations/003_hourly_activity.sql"),
    ];
    for migration in migrations {
        conn.execute_batch(migration).await?;
    }

    let store = MetadataStore::new(conn);
    store.fix_zero_counts().await?;
    Ok(store)
}

pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
