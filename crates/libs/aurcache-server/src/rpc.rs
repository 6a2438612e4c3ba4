//! RPC translator (spec.md §4.6, C6): answers `info`, `multiinfo`, and
//! `search` queries from the local cache, synthesizing upstream-compatible
//! JSON from cached build recipes.

use crate::AppState;
use aurcache_core::types::Recipe;
use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::collections::BTreeSet;

/// The RPC layer always answers `multiinfo` for a successful query (spec.md
/// §4.6: "the response `type` is always `multiinfo` regardless of inbound
/// type").
#[derive(Debug, Serialize)]
struct InfoResponse {
    resultcount: usize,
    results: Vec<Recipe>,
    #[serde(rename = "type")]
    kind: &'static str,
    version: i64,
}

#[derive(Debug, Serialize)]
struct EmptyResponse {
    resultcount: usize,
    results: [(); 0],
    #[serde(rename = "type")]
    kind: String,
    version: i64,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    version: i64,
}

pub async fn handle(state: AppState, request: Request) -> Response {
    let uri = request.uri().clone();
    let path = uri.path().to_string();
    let query = uri.query().unwrap_or("").to_string();
    let params = parse_query(&query);

    match dispatch(&state, &path, &params).await {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(error = %err, "rpc translator failed");
            error_response(param(&params, "v").and_then(|v| v.parse().ok()).unwrap_or(5))
        }
    }
}

async fn dispatch(
    state: &AppState,
    path: &str,
    params: &[(String, String)],
) -> aurcache_core::Result<Response> {
    let rpc_type = param(params, "type");

    match rpc_type.as_deref() {
        Some(inbound_type @ ("info" | "multiinfo")) => {
            let mut names: Vec<String> = params
                .iter()
                .filter(|(k, _)| k == "arg[]" || k == "arg")
                .map(|(_, v)| v.clone())
                .collect();
            names.sort();
            names.dedup();

            // No `arg[]`/`arg` supplied: the upstream RPC treats this as an
            // empty query rather than a zero-package info lookup (spec.md §8
            // scenario S6), echoing the inbound type instead of "multiinfo".
            if names.is_empty() {
                let version = param(params, "v").and_then(|v| v.parse().ok()).unwrap_or(5);
                return Ok(empty_response(inbound_type.to_string(), version));
            }

            let key = canonical_key(path, inbound_type, &names);
            if let Some(cached) = state.cache.store().rpc_get(&key).await? {
                return Ok(raw_json_response(cached.response_data));
            }

            let mut results = Vec::with_capacity(names.len());
            for name in &names {
                if let Some(recipe) = materialize_and_parse(state, name).await {
                    results.push(recipe);
                }
            }

            let body = InfoResponse {
                resultcount: results.len(),
                results,
                kind: "multiinfo",
                version: 5,
            };
            let bytes = serde_json::to_vec_pretty(&body)?;
            state.cache.store().rpc_put(&key, &bytes).await?;
            Ok(raw_json_response(bytes))
        }
        Some("search") => {
            let arg = param(params, "arg").unwrap_or_default();
            let key = canonical_key(path, "search", std::slice::from_ref(&arg));
            if let Some(cached) = state.cache.store().rpc_get(&key).await? {
                return Ok(raw_json_response(cached.response_data));
            }

            let mut results = search_cache(state, &arg).await;
            if results.is_empty() && !arg.is_empty() {
                if let Some(recipe) = materialize_and_parse(state, &arg).await {
                    results.push(recipe);
                }
            }

            let body = InfoResponse {
                resultcount: results.len(),
                results,
                kind: "multiinfo",
                version: 5,
            };
            let bytes = serde_json::to_vec_pretty(&body)?;
            state.cache.store().rpc_put(&key, &bytes).await?;
            Ok(raw_json_response(bytes))
        }
        other => {
            let version = param(params, "v").and_then(|v| v.parse().ok()).unwrap_or(5);
            let kind = other.map(str::to_string).unwrap_or_else(|| "unknown".to_string());
            Ok(empty_response(kind, version))
        }
    }
}

/// Ensures `name` is materialized (cloning if necessary) and parses its
/// recipe. Returns `None` if materialization fails; the RPC layer simply
/// omits that package from the results rather than failing the whole query.
async fn materialize_and_parse(state: &AppState, name: &str) -> Option<Recipe> {
    let outcome = match state.cache.ensure_package(name).await {
        Ok(outcome) => outcome,
        Err(aurcache_core::Error::RepositoryNotFound { .. }) => return None,
        Err(err) => {
            tracing::warn!(package = name, error = %err, "ensure_package failed during rpc lookup");
            return None;
        }
    };
    let repo = outcome.repo;
    // A cold fetch already counted this request via `record_fetch`; only a
    // request against an already-materialized repository bumps `total_requests`
    // again here (spec.md §8 scenario S1).
    if !outcome.freshly_materialized {
        if let Err(err) = state.cache.store().touch_access(name).await {
            tracing::warn!(package = name, error = %err, "touch_access failed");
        }
    }
    match aurcache_core::recipe::parse_from_dir(name, &repo.path).await {
        Ok(recipe) => Some(recipe),
        Err(err) => {
            tracing::warn!(package = name, error = %err, "recipe parse failed");
            None
        }
    }
}

/// Lists the cache directory for entries whose name contains `term`
/// (case-insensitive substring), parsing each already-materialized match
/// (spec.md §4.6). Does not trigger a clone for existing matches — only the
/// literal-term fallback in `dispatch` does that.
async fn search_cache(state: &AppState, term: &str) -> Vec<Recipe> {
    if term.is_empty() {
        return Vec::new();
    }
    let needle = term.to_lowercase();
    let mut names: Vec<String> = Vec::new();
    if let Ok(entries) = std::fs::read_dir(state.cache.cache_root()) {
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else { continue };
            if !file_type.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.to_lowercase().contains(&needle) {
                names.push(name);
            }
        }
    }
    names.sort();

    let mut results = Vec::with_capacity(names.len());
    for name in names {
        let repo_path = state.cache.cache_root().join(&name);
        if let Ok(recipe) = aurcache_core::recipe::parse_from_dir(&name, &repo_path).await {
            results.push(recipe);
        }
    }
    results
}

fn param(params: &[(String, String)], key: &str) -> Option<String> {
    params.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
}

/// Parses a query string into an ordered list of key/value pairs, preserving
/// duplicates (needed for repeated `arg[]` parameters).
fn parse_query(query: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

/// Canonical RPC cache key (spec.md §3): for `info`/`multiinfo`, the
/// inbound type plus the sorted, comma-joined package names; for `search`,
/// the single `arg`.
fn canonical_key(path: &str, kind: &str, names: &[String]) -> String {
    if kind == "search" {
        return format!("{path}?type=search&arg={}", names.first().cloned().unwrap_or_default());
    }
    let joined: BTreeSet<&str> = names.iter().map(String::as_str).collect();
    let joined = joined.into_iter().collect::<Vec<_>>().join(",");
    format!("{path}?type={kind}&packages={joined}")
}

fn raw_json_response(bytes: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], bytes).into_response()
}

fn empty_response(kind: String, version: i64) -> Response {
    let body = EmptyResponse {
        resultcount: 0,
        results: [],
        kind,
        version,
    };
    match serde_json::to_vec_pretty(&body) {
        Ok(bytes) => raw_json_response(bytes),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response(),
    }
}

fn error_response(version: i64) -> Response {
    let body = ErrorResponse {
        error: "Internal server error",
        kind: "error",
        version,
    };
    match serde_json::to_vec_pretty(&body) {
        Ok(bytes) => (StatusCode::INTERNAL_SERVER_ERROR, [(header::CONTENT_TYPE, "application/json")], bytes).into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_key_is_order_independent_for_multiinfo() {
        let a = canonical_key("/rpc", "info", &["pkgbar".to_string(), "pkgfoo".to_string()]);
        let b = canonical_key("/rpc", "info", &["pkgfoo".to_string(), "pkgbar".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn canonical_key_search_uses_single_arg() {
        let key = canonical_key("/rpc", "search", &["neovim".to_string()]);
        assert_eq!(key, "/rpc?type=search&arg=neovim");
    }

    #[test]
    fn parse_query_preserves_duplicate_keys() {
        let parsed = parse_query("v=5&type=info&arg%5B%5D=pkgfoo&arg%5B%5D=pkgbar");
        let args: Vec<&str> = parsed.iter().filter(|(k, _)| k == "arg[]").map(|(_, v)| v.as_str()).collect();
        assert_eq!(args, vec!["pkgfoo", "pkgbar"]);
    }
}
