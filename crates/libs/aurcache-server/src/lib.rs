//! HTTP surface for the caching Git proxy (spec.md §6): request classification
//! into the Git gateway, RPC translator, and stats lanes, plus process
//! bootstrap (router assembly, graceful shutdown).

pub mod error;
pub mod git_gateway;
pub mod rpc;
pub mod stats;

use aurcache_common::{AppConfig, Result, ServerError};
use aurcache_core::cache::CacheManager;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

/// The AUR's upstream index, used as the primary clone source.
const UPSTREAM_INDEX_URL: &str = "https://aur.archlinux.org";
/// The AUR mirror used when the primary clone attempt fails validation.
const UPSTREAM_MIRROR_URL: &str = "https://github.com/archlinux/aur-mirror";

/// Shared state threaded through every handler.
#[derive(Clone, axum::extract::FromRef)]
pub struct AppState {
    pub cache: Arc<CacheManager>,
    pub start_time: Instant,
}

/// Builds the cache manager and metadata store and assembles the router,
/// without binding a listener. Split out from [`run`] so integration tests
/// can drive the full dispatch tree via `tower::ServiceExt::oneshot` against
/// an isolated cache root.
pub async fn build_router(config: AppConfig) -> Result<Router> {
    let store = aurcache_core::store::initialize(&config.cache_root).await?;
    let fixed = store.fix_zero_counts();
    if let Err(err) = fixed.await {
        tracing::warn!(error = %err, "startup counter repair failed");
    }

    let cache = Arc::new(CacheManager::new(
        config.cache_root.clone(),
        UPSTREAM_INDEX_URL,
        UPSTREAM_MIRROR_URL,
        store,
    ));

    let state = AppState {
        cache,
        start_time: Instant::now(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(root_handler))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/stats", get(stats::stats_handler))
        .route("/stats/top-fetched", get(stats::top_fetched_handler))
        .route("/stats/top-requested", get(stats::top_requested_handler))
        .fallback(dispatch)
        .layer(RequestBodyLimitLayer::new(config.max_upload_size.0 as usize))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .with_state(state);

    Ok(app)
}

/// Assembles the router, binds the listener, and serves until a shutdown
/// signal arrives.
pub async fn run(config: AppConfig) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = build_router(config).await?;

    tracing::info!(%addr, "aurcache listening");

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(ServerError::Io)?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ServerError::Io)?;

    Ok(())
}

/// Routes `/rpc...` to the RPC translator, Git-shaped paths to the gateway,
/// and anything else to the plain-text echo fallback (spec.md §6).
async fn dispatch(State(state): State<AppState>, request: Request) -> axum::response::Response {
    let path = request.uri().path().to_string();

    if path.starts_with("/rpc") {
        return rpc::handle(state, request).await.into_response();
    }
    if git_gateway::is_git_request(&path) {
        return git_gateway::handle(state, request).await.into_response();
    }

    (StatusCode::OK, format!("{} {}", request.method(), request.uri())).into_response()
}

async fn root_handler() -> &'static str {
    "aurcache: caching Git proxy for the upstream package index\n"
}

/// Health response shape mirrored from the teacher's `lib-server` health
/// handler: a status string plus process uptime.
#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok",
        uptime_seconds: state.start_time.elapsed().as_secs(),
    };
    (StatusCode::OK, axum::Json(response))
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    match state.cache.store().get_record("__readyz_probe__").await {
        Ok(_) => (StatusCode::OK, "ready"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "not ready"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}
