//! Operations on the `packages` and `rpc_cache` relations (spec.md §4.1).

use super::now_ts;
use crate::types::{PackageRecord, RpcCacheEntry, Stats};
use crate::Result;
use libsql::{Connection, Value};
use std::path::Path;

/// Entries older than this are lazily evicted from the RPC cache at read time.
const RPC_CACHE_TTL_SECS: i64 = 12 * 3600;

/// Handle onto the metadata database. Process-wide: one instance is created
/// at startup and shared by reference across the Git gateway and RPC
/// translator lanes. Cheap to clone: `libsql::Connection` is itself a
/// handle onto a shared connection.
#[derive(Clone)]
pub struct MetadataStore {
    conn: Connection,
}

impl MetadataStore {
    pub(crate) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// `name` exists: `fetched_at := now`, `fetch_count += 1`, `ttl_hours :=
    /// ttl`. Otherwise insert with all counters at 1 and all timestamps at
    /// now.
    pub async fn record_fetch(&self, name: &str, ttl_hours: i64) -> Result<()> {
        let now = now_ts();
        self.conn
            .execute(
                "INSERT INTO packages (name, fetched_at, last_accessed, last_meaningful_access, ttl_hours, fetch_count, total_requests)
                 VALUES (?1, ?2, ?2, ?2, ?3, 1, 1)
                 ON CONFLICT(name) DO UPDATE SET
                     fetched_at = excluded.fetched_at,
                     ttl_hours = excluded.ttl_hours,
                     fetch_count = fetch_count + 1",
                vec![Value::from(name), Value::from(now), Value::from(ttl_hours)],
            )
            .await?;
        Ok(())
    }

    /// `last_accessed := now`, `total_requests += 1`. No-op if `name` is absent.
    pub async fn touch_access(&self, name: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE packages SET last_accessed = ?1, total_requests = total_requests + 1 WHERE name = ?2",
                vec![Value::from(now_ts()), Value::from(name)],
            )
            .await?;
        Ok(())
    }

    /// `last_meaningful_access := now`. No-op if `name` is absent.
    pub async fn touch_meaningful(&self, name: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE packages SET last_meaningful_access = ?1 WHERE name = ?2",
                vec![Value::from(now_ts()), Value::from(name)],
            )
            .await?;
        Ok(())
    }

    /// `fetch_count += 1`. Used when a request hits an already-materialized repo.
    pub async fn increment_fetch(&self, name: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE packages SET fetch_count = fetch_count + 1 WHERE name = ?1",
                vec![Value::from(name)],
            )
            .await?;
        Ok(())
    }

    /// True if no record exists, or if `now - fetched_at >= ttl_hours` (in seconds).
    pub async fn should_refresh(&self, name: &str) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare("SELECT fetched_at, ttl_hours FROM packages WHERE name = ?1")
            .await?;
        let mut rows = stmt.query(vec![Value::from(name)]).await?;
        match rows.next().await? {
            Some(row) => {
                let fetched_at: i64 = row.get(0)?;
                let ttl_hours: i64 = row.get(1)?;
                Ok(now_ts() - fetched_at >= ttl_hours * 3600)
            }
            None => Ok(true),
        }
    }

    /// One-shot startup repair: any `fetch_count` or `total_requests` that is
    /// zero, negative, or null is set to 1.
    pub async fn fix_zero_counts(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "UPDATE packages SET fetch_count = 1 WHERE fetch_count IS NULL OR fetch_count <= 0;
                 UPDATE packages SET total_requests = 1 WHERE total_requests IS NULL OR total_requests <= 0;",
            )
            .await?;
        Ok(())
    }

    pub async fn get_record(&self, name: &str) -> Result<Option<PackageRecord>> {
        let mut stmt = self.conn.prepare(SELECT_PACKAGE).await?;
        let mut rows = stmt.query(vec![Value::from(name)]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn top_fetched(&self, limit: i64) -> Result<Vec<PackageRecord>> {
        self.list_ordered("fetch_count", limit).await
    }

    pub async fn top_requested(&self, limit: i64) -> Result<Vec<PackageRecord>> {
        self.list_ordered("total_requests", limit).await
    }

    pub async fn recently_fetched(&self, limit: i64) -> Result<Vec<PackageRecord>> {
        self.list_ordered("fetched_at", limit).await
    }

    async fn list_ordered(&self, column: &str, limit: i64) -> Result<Vec<PackageRecord>> {
        let sql = format!(
            "SELECT name, fetched_at, last_accessed, last_meaningful_access, ttl_hours, fetch_count, total_requests
             FROM packages ORDER BY {column} DESC LIMIT ?1"
        );
        let mut stmt = self.conn.prepare(&sql).await?;
        let mut rows = stmt.query(vec![Value::from(limit)]).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_record(&row)?);
        }
        Ok(out)
    }

    pub async fn stats(&self, cache_root: &Path) -> Result<Stats> {
        let mut stmt = self
            .conn
            .prepare("SELECT COUNT(*), COALESCE(SUM(total_requests), 0), COALESCE(SUM(fetch_count), 0) FROM packages")
            .await?;
        let mut rows = stmt.query(()).await?;
        let (total_packages, total_requests, total_fetches) = match rows.next().await? {
            Some(row) => (row.get::<i64>(0)?, row.get::<i64>(1)?, row.get::<i64>(2)?),
            None => (0, 0, 0),
        };

        let names = self.package_names().await?;
        let cache_size = cache_size_of(cache_root, &names)?;

        Ok(Stats {
            total_packages,
            total_requests,
            total_fetches,
            cache_size,
            last_updated: now_ts(),
            most_fetched: self.top_fetched(10).await?,
            most_requested: self.top_requested(10).await?,
            recently_fetched: self.recently_fetched(10).await?,
        })
    }

    async fn package_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM packages").await?;
        let mut rows = stmt.query(()).await?;
        let mut names = Vec::new();
        while let Some(row) = rows.next().await? {
            names.push(row.get::<String>(0)?);
        }
        Ok(names)
    }

    /// Returns the stored response if present and fresher than 12 hours;
    /// otherwise deletes the row (if any) and returns `None`.
    pub async fn rpc_get(&self, key: &str) -> Result<Option<RpcCacheEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT response_data, cached_at FROM rpc_cache WHERE key = ?1")
            .await?;
        let mut rows = stmt.query(vec![Value::from(key)]).await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let data: Vec<u8> = row.get(0)?;
        let cached_at: i64 = row.get(1)?;
        drop(rows);

        if now_ts() - cached_at < RPC_CACHE_TTL_SECS {
            Ok(Some(RpcCacheEntry {
                key: key.to_string(),
                response_data: data,
                cached_at,
            }))
        } else {
            self.conn
                .execute("DELETE FROM rpc_cache WHERE key = ?1", vec![Value::from(key)])
                .await?;
            Ok(None)
        }
    }

    pub async fn rpc_put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO rpc_cache (key, response_data, cached_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET response_data = excluded.response_data, cached_at = excluded.cached_at",
                vec![Value::from(key), Value::from(data.to_vec()), Value::from(now_ts())],
            )
            .await?;
        Ok(())
    }
}

const SELECT_PACKAGE: &str = "SELECT name, fetched_at, last_accessed, last_meaningful_access, ttl_hours, fetch_count, total_requests FROM packages WHERE name = ?1";

fn row_to_record(row: &libsql::Row) -> Result<PackageRecord> {
    Ok(PackageRecord {
        name: row.get(0)?,
        fetched_at: row.get(1)?,
        last_accessed: row.get(2)?,
        last_meaningful_access: row.get(3)?,
        ttl_hours: row.get(4)?,
        fetch_count: row.get(5)?,
        total_requests: row.get(6)?,
    })
}

/// Sums on-disk sizes of `cache_root/<name>` for each name known to the
/// store, recursively, and renders the total in powers-of-1024 units with
/// two-decimal precision (spec.md §4.1).
fn cache_size_of(cache_root: &Path, names: &[String]) -> Result<String> {
    use humansize::{format_size, FormatSizeOptions, WINDOWS};

    let mut total: u64 = 0;
    for name in names {
        let package_dir = cache_root.join(name);
        if !package_dir.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&package_dir).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() {
                total += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
    }

    // WINDOWS: base-1024 scaling with plain B/KB/MB/GB/TB suffixes (spec.md §4.1),
    // as opposed to BINARY's KiB/MiB labels or DECIMAL's base-1000 scaling.
    let options = FormatSizeOptions::from(WINDOWS).decimal_places(2);
    Ok(format_size(total, options))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use libsql::Builder;

    async fn test_store() -> MetadataStore {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        let conn = db.connect().unwrap();
        conn.execute_batch(include_str!("../../migrations/001_packages.sql"))
            .await
            .unwrap();
        conn.execute_batch(include_str!("../../migrations/002_rpc_cache.sql"))
            .await
            .unwrap();
        MetadataStore::new(conn)
    }

    #[tokio::test]
    async fn record_fetch_inserts_then_updates() {
        let store = test_store().await;
        store.record_fetch("pkgfoo", 12).await.unwrap();
        let record = store.get_record("pkgfoo").await.unwrap().unwrap();
        assert_eq!(record.fetch_count, 1);
        assert_eq!(record.total_requests, 1);
        assert_eq!(record.ttl_hours, 12);

        store.record_fetch("pkgfoo", 12).await.unwrap();
        let record = store.get_record("pkgfoo").await.unwrap().unwrap();
        assert_eq!(record.fetch_count, 2);
    }

    #[tokio::test]
    async fn touch_access_is_noop_for_absent_name() {
        let store = test_store().await;
        store.touch_access("ghost").await.unwrap();
        assert!(store.get_record("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn should_refresh_true_when_absent() {
        let store = test_store().await;
        assert!(store.should_refresh("nope").await.unwrap());
    }

    #[tokio::test]
    async fn should_refresh_respects_ttl_boundary() {
        let store = test_store().await;
        store.record_fetch("pkgfoo", 12).await.unwrap();
        // fetched_at is "now", so immediately after recording it must not need a refresh.
        assert!(!store.should_refresh("pkgfoo").await.unwrap());

        store
            .conn
            .execute(
                "UPDATE packages SET fetched_at = ?1 WHERE name = 'pkgfoo'",
                vec![Value::from(now_ts() - 13 * 3600)],
            )
            .await
            .unwrap();
        assert!(store.should_refresh("pkgfoo").await.unwrap());
    }

    #[tokio::test]
    async fn fix_zero_counts_repairs_bad_values() {
        let store = test_store().await;
        store.record_fetch("pkgfoo", 12).await.unwrap();
        store
            .conn
            .execute("UPDATE packages SET fetch_count = 0, total_requests = -3 WHERE name = 'pkgfoo'", ())
            .await
            .unwrap();
        store.fix_zero_counts().await.unwrap();
        let record = store.get_record("pkgfoo").await.unwrap().unwrap();
        assert_eq!(record.fetch_count, 1);
        assert_eq!(record.total_requests, 1);
    }

    #[tokio::test]
    async fn rpc_cache_put_then_get_within_window() {
        let store = test_store().await;
        store.rpc_put("path?type=info", b"{}").await.unwrap();
        let entry = store.rpc_get("path?type=info").await.unwrap().unwrap();
        assert_eq!(entry.key, "path?type=info");
        assert_eq!(entry.response_data, b"{}".to_vec());
    }

    #[tokio::test]
    async fn rpc_cache_expires_after_window() {
        let store = test_store().await;
        store.rpc_put("stale", b"{}").await.unwrap();
        store
            .conn
            .execute(
                "UPDATE rpc_cache SET cached_at = ?1 WHERE key = 'stale'",
                vec![Value::from(now_ts() - RPC_CACHE_TTL_SECS - 1)],
            )
            .await
            .unwrap();
        assert_eq!(store.rpc_get("stale").await.unwrap(), None);

        let mut stmt = store.conn.prepare("SELECT COUNT(*) FROM rpc_cache WHERE key = 'stale'").await.unwrap();
        let mut rows = stmt.query(()).await.unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, 0);
    }
}
