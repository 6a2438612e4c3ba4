//! Shared data types for the package cache (spec.md §3).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Per-package counters and TTL, as persisted by the metadata store.
///
/// Invariants (spec.md §3): all three timestamps are monotonically
/// non-decreasing; `fetch_count >= 1` and `total_requests >= 1` whenever the
/// record exists; `ttl_hours >= 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    /// Unix timestamp (seconds) of the last successful materialization or refresh.
    pub fetched_at: i64,
    /// Unix timestamp of the most recent request touching this name.
    pub last_accessed: i64,
    /// Unix timestamp of the most recent pack/object (non-metadata-probe) access.
    pub last_meaningful_access: i64,
    pub ttl_hours: i64,
    pub fetch_count: i64,
    pub total_requests: i64,
}

/// A cached RPC response (spec.md §3, §4.6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcCacheEntry {
    pub key: String,
    pub response_data: Vec<u8>,
    pub cached_at: i64,
}

/// Result of materializing a package's repository (spec.md §4.4 step 4).
#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryInfo {
    pub name: String,
    pub path: PathBuf,
    pub bare: bool,
    /// Absolute path to the Git directory: `path` itself if bare, else `path/.git`.
    pub git_dir: PathBuf,
}

/// The Git subcommand a gateway request maps to (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitOperationKind {
    UploadPack,
    ReceivePack,
}

impl GitOperationKind {
    pub fn program(self) -> &'static str {
        match self {
            GitOperationKind::UploadPack => "git-upload-pack",
            GitOperationKind::ReceivePack => "git-receive-pack",
        }
    }
}

/// Flags accompanying a Git operation descriptor (spec.md §3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GitOperationFlags {
    pub stateless_rpc: bool,
    pub advertise_refs: bool,
}

/// A Git operation descriptor: the pair `(kind, flags)` plus the absolute
/// Git directory path to operate on (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub struct GitOperationDescriptor {
    pub kind: GitOperationKind,
    pub flags: GitOperationFlags,
    pub git_dir: PathBuf,
}

/// Build-recipe fields extracted by the recipe parser (spec.md §4.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "PackageBase")]
    pub package_base: String,
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "Maintainer")]
    pub maintainer: String,
    #[serde(rename = "NumVotes")]
    pub num_votes: i64,
    #[serde(rename = "Popularity")]
    pub popularity: f64,
    #[serde(rename = "OutOfDate")]
    pub out_of_date: Option<i64>,
    #[serde(rename = "FirstSubmitted")]
    pub first_submitted: i64,
    #[serde(rename = "LastModified")]
    pub last_modified: i64,
    #[serde(rename = "License")]
    pub license: Vec<String>,
    #[serde(rename = "Depends")]
    pub depends: Vec<String>,
    #[serde(rename = "MakeDepends")]
    pub make_depends: Vec<String>,
    #[serde(rename = "Conflicts")]
    pub conflicts: Vec<String>,
    #[serde(rename = "Provides")]
    pub provides: Vec<String>,
    #[serde(rename = "Replaces")]
    pub replaces: Vec<String>,
    #[serde(rename = "Keywords")]
    pub keywords: Vec<String>,
}

/// Aggregate counters served from `GET /stats` (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_packages: i64,
    pub total_requests: i64,
    pub total_fetches: i64,
    pub cache_size: String,
    pub last_updated: i64,
    pub most_fetched: Vec<PackageRecord>,
    pub most_requested: Vec<PackageRecord>,
    pub recently_fetched: Vec<PackageRecord>,
}
