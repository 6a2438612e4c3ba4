//! Package cache manager (spec.md §4.4, C4): the central coordinator that
//! materializes, validates, refreshes, and locates per-package Git
//! repositories. Owns the cache directory and is the only component that
//! creates or deletes per-package directories.

use crate::error::Error;
use crate::proc;
use crate::store::MetadataStore;
use crate::types::RepositoryInfo;
use crate::Result;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

const CLONE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_TTL_HOURS: i64 = 12;

/// The default TTL passed to `record_fetch` on every materialization and
/// refresh. spec.md §9 flags that per-package TTLs may have been intended;
/// this core always supplies the constant, matching the documented (if
/// questionable) source behaviour.
pub fn default_ttl_hours() -> i64 {
    DEFAULT_TTL_HOURS
}

/// Outcome of [`CacheManager::ensure_package`]: the materialized repository
/// plus whether this call is the one that just cloned it for the first time.
///
/// Callers use `freshly_materialized` to avoid double-counting `total_requests`:
/// a cold fetch's `record_fetch` already accounts for the request that
/// triggered it (spec.md §3, §8 scenario S1), so the caller must skip its own
/// `touch_access` call in that case.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsurePackageOutcome {
    pub repo: RepositoryInfo,
    pub freshly_materialized: bool,
}

/// Materializes package Git repositories on demand from an upstream index,
/// with a mirror fallback, a per-name mutex, and TTL-driven refresh.
pub struct CacheManager {
    cache_root: PathBuf,
    upstream_index_url: String,
    upstream_mirror_url: String,
    store: MetadataStore,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CacheManager {
    pub fn new(
        cache_root: impl Into<PathBuf>,
        upstream_index_url: impl Into<String>,
        upstream_mirror_url: impl Into<String>,
        store: MetadataStore,
    ) -> Self {
        Self {
            cache_root: cache_root.into(),
            upstream_index_url: upstream_index_url.into(),
            upstream_mirror_url: upstream_mirror_url.into(),
            store,
            locks: DashMap::new(),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks.entry(name.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Materialization protocol (spec.md §4.4). Returns
    /// `Err(Error::RepositoryNotFound)` when both the primary and mirror
    /// clone attempts fail validation — the caller (the Git gateway or RPC
    /// translator) matches on that variant to answer a 404 or skip the
    /// package, distinguishing it from a genuine internal failure (spec.md §7).
    pub async fn ensure_package(&self, name: &str) -> Result<EnsurePackageOutcome> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let repo_path = self.cache_root.join(name);

        if repo_path.exists() {
            let refreshed = self.refresh_if_stale(name, &repo_path).await;
            if !refreshed {
                // A plain cache hit: no clone or pull ran, so `record_fetch`
                // never fired this time around. Count it as a fetch anyway
                // (spec.md §3: "fetch_count = successful materializations +
                // cache hits counted as fetches"; §4.1 `increment_fetch`).
                if let Err(err) = self.store.increment_fetch(name).await {
                    warn!(package = name, error = %err, "increment_fetch on cache hit failed");
                }
            }
            return Ok(EnsurePackageOutcome {
                repo: self.repository_info(name, &repo_path),
                freshly_materialized: false,
            });
        }

        if self.clone_from(&self.upstream_index_url, name, &repo_path, &[]).await {
            self.finish_materialization(name, &repo_path).await?;
            return Ok(EnsurePackageOutcome {
                repo: self.repository_info(name, &repo_path),
                freshly_materialized: true,
            });
        }

        let _ = remove_dir_if_exists(&repo_path).await;
        if self
            .clone_from(
                &self.upstream_mirror_url,
                name,
                &repo_path,
                &["--branch", name, "--single-branch"],
            )
            .await
        {
            self.finish_materialization(name, &repo_path).await?;
            return Ok(EnsurePackageOutcome {
                repo: self.repository_info(name, &repo_path),
                freshly_materialized: true,
            });
        }

        let _ = remove_dir_if_exists(&repo_path).await;
        warn!(package = name, "materialization failed: both primary and mirror clones invalid");
        Err(Error::RepositoryNotFound { name: name.to_string() })
    }

    async fn clone_from(&self, base_url: &str, name: &str, repo_path: &Path, extra_args: &[&str]) -> bool {
        let url = format!("{}/{}.git", base_url.trim_end_matches('/'), name);
        let mut args: Vec<&str> = vec!["clone"];
        args.extend_from_slice(extra_args);
        args.push(&url);
        let repo_path_str = repo_path.to_string_lossy().into_owned();
        args.push(&repo_path_str);

        let output = match proc::run_batched("git", &args, &[], None, CLONE_TIMEOUT).await {
            Ok(output) => output,
            Err(err) => {
                warn!(package = name, error = %err, "clone subprocess failed");
                return false;
            }
        };

        output.ok && validate_clone(repo_path)
    }

    async fn finish_materialization(&self, name: &str, repo_path: &Path) -> Result<()> {
        set_bare(repo_path)?;
        // A metadata-store failure here must not fail the request that just
        // successfully cloned and validated the repository (spec.md §7:
        // "Metadata store error ... never fails an end-user Git or RPC
        // request"); the counters simply go un-updated until the next
        // successful fetch.
        if let Err(err) = self.store.record_fetch(name, default_ttl_hours()).await {
            warn!(package = name, error = %err, "record_fetch after materialization failed");
        }
        info!(package = name, "materialized package repository");
        Ok(())
    }

    /// Pulls `repo_path` if stale per the metadata store's TTL. Returns
    /// `true` if a refresh was attempted (whether or not the pull itself
    /// succeeded) so the caller knows `record_fetch`'s fetch-count bump has
    /// already been attempted for this request, and a separate
    /// `increment_fetch` cache-hit bump would double-count.
    async fn refresh_if_stale(&self, name: &str, repo_path: &Path) -> bool {
        let should_refresh = match self.store.should_refresh(name).await {
            Ok(value) => value,
            Err(err) => {
                warn!(package = name, error = %err, "should_refresh query failed, skipping refresh");
                return false;
            }
        };
        if !should_refresh {
            return false;
        }

        match proc::run_batched("git", &["pull"], &[], Some(repo_path), CLONE_TIMEOUT).await {
            Ok(output) if output.ok => {
                if let Err(err) = self.store.record_fetch(name, default_ttl_hours()).await {
                    warn!(package = name, error = %err, "record_fetch after refresh failed");
                }
            }
            Ok(output) => {
                warn!(package = name, stderr = %String::from_utf8_lossy(&output.stderr), "git pull failed, serving stale cache");
            }
            Err(err) => {
                warn!(package = name, error = %err, "git pull subprocess failed, serving stale cache");
            }
        }
        true
    }

    fn repository_info(&self, name: &str, repo_path: &Path) -> RepositoryInfo {
        let bare = is_bare(repo_path);
        let git_dir = if bare { repo_path.to_path_buf() } else { repo_path.join(".git") };
        RepositoryInfo {
            name: name.to_string(),
            path: repo_path.to_path_buf(),
            bare,
            git_dir,
        }
    }

    /// Looks up an already-materialized repository without triggering a
    /// clone or refresh. Used by the Git gateway once a request has already
    /// called `ensure_package`.
    pub fn lookup(&self, name: &str) -> Option<RepositoryInfo> {
        let repo_path = self.cache_root.join(name);
        if repo_path.exists() {
            Some(self.repository_info(name, &repo_path))
        } else {
            None
        }
    }

    /// Maps a request path tail onto an absolute file under the repository's
    /// Git directory (spec.md §4.4, "Git file path resolution").
    pub fn resolve_git_file(&self, repo: &RepositoryInfo, path_tail: &str) -> PathBuf {
        resolve_git_file(repo, path_tail)
    }
}

/// Free function behind [`CacheManager::resolve_git_file`] so it can be unit
/// tested without a live cache manager.
pub fn resolve_git_file(repo: &RepositoryInfo, path_tail: &str) -> PathBuf {
    if path_tail.ends_with("/info/refs") || path_tail == "info/refs" {
        return repo.git_dir.join("info/refs");
    }
    if path_tail.ends_with("/HEAD") || path_tail == "HEAD" {
        return repo.git_dir.join("HEAD");
    }
    if let Some(idx) = path_tail.find("objects/").or_else(|| path_tail.find("refs/")) {
        return repo.git_dir.join(&path_tail[idx..]);
    }
    if let Some(idx) = path_tail.find(".git/") {
        let suffix = &path_tail[idx + ".git/".len()..];
        return repo.git_dir.join(suffix);
    }
    repo.git_dir.join(path_tail)
}

/// Validation criterion (spec.md §3, §4.4 step c): the repository's internal
/// Git directory and the recipe file must both be present at the repo root.
fn validate_clone(repo_path: &Path) -> bool {
    let has_git_dir = repo_path.join(".git").is_dir() || repo_path.join("HEAD").is_file();
    let has_recipe = crate::recipe::recipe_path(repo_path).is_some();
    has_git_dir && has_recipe
}

fn is_bare(repo_path: &Path) -> bool {
    repo_path.join("HEAD").is_file() && !repo_path.join(".git").is_dir()
}

fn set_bare(repo_path: &Path) -> Result<()> {
    let repo = git2::Repository::open(repo_path)?;
    let mut config = repo.config()?;
    config.set_bool("core.bare", true)?;
    Ok(())
}

async fn remove_dir_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn resolve_git_file_maps_info_refs() {
        let repo = RepositoryInfo {
            name: "pkgfoo".to_string(),
            path: PathBuf::from("/cache/pkgfoo"),
            bare: true,
            git_dir: PathBuf::from("/cache/pkgfoo"),
        };
        assert_eq!(resolve_git_file(&repo, "/pkgfoo.git/info/refs"), PathBuf::from("/cache/pkgfoo/info/refs"));
        assert_eq!(resolve_git_file(&repo, "/pkgfoo.git/HEAD"), PathBuf::from("/cache/pkgfoo/HEAD"));
        assert_eq!(
            resolve_git_file(&repo, "/pkgfoo.git/objects/ab/cdef"),
            PathBuf::from("/cache/pkgfoo/objects/ab/cdef")
        );
    }

    #[test]
    fn is_bare_detects_head_without_git_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("HEAD"), b"ref: refs/heads/master\n").unwrap();
        assert!(is_bare(dir.path()));
    }

    #[test]
    fn is_bare_false_when_git_dir_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("HEAD"), b"ref: refs/heads/master\n").unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        assert!(!is_bare(dir.path()));
    }
}
