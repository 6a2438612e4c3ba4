//! Read-only statistics endpoints (spec.md §6): `/stats`, `/stats/top-fetched`,
//! `/stats/top-requested`. Reads directly from the metadata store; never
//! triggers a materialization or refresh.

use crate::AppState;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

const DEFAULT_LIMIT: i64 = 10;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    limit: Option<i64>,
}

/// `GET /stats`: aggregate counters plus the three top-N lists (spec.md §6).
pub async fn stats_handler(State(state): State<AppState>) -> Response {
    match state.cache.store().stats(state.cache.cache_root()).await {
        Ok(stats) => json_no_store(&stats),
        Err(err) => {
            tracing::error!(error = %err, "stats query failed");
            json_no_store(&serde_json::json!({
                "totalPackages": 0,
                "totalRequests": 0,
                "totalFetches": 0,
                "cacheSize": "0.00 B",
                "lastUpdated": 0,
                "mostFetched": [],
                "mostRequested": [],
                "recentlyFetched": [],
            }))
        }
    }
}

/// `GET /stats/top-fetched?limit=N`: default N=10 (spec.md §6).
pub async fn top_fetched_handler(State(state): State<AppState>, Query(q): Query<LimitQuery>) -> Response {
    let limit = q.limit.unwrap_or(DEFAULT_LIMIT);
    match state.cache.store().top_fetched(limit).await {
        Ok(records) => json_no_store(&records),
        Err(err) => {
            tracing::error!(error = %err, "top_fetched query failed");
            json_no_store(&Vec::<()>::new())
        }
    }
}

/// `GET /stats/top-requested?limit=N`: default N=10 (spec.md §6).
pub async fn top_requested_handler(State(state): State<AppState>, Query(q): Query<LimitQuery>) -> Response {
    let limit = q.limit.unwrap_or(DEFAULT_LIMIT);
    match state.cache.store().top_requested(limit).await {
        Ok(records) => json_no_store(&records),
        Err(err) => {
            tracing::error!(error = %err, "top_requested query failed");
            json_no_store(&Vec::<()>::new())
        }
    }
}

/// Stats responses are live counters, not cacheable client-side, distinct
/// from the Git advertisement responses' own `Cache-Control` header.
fn json_no_store(value: &impl serde::Serialize) -> Response {
    match serde_json::to_vec(value) {
        Ok(bytes) => (
            [(header::CONTENT_TYPE, "application/json"), (header::CACHE_CONTROL, "no-store")],
            bytes,
        )
            .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize stats response");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
