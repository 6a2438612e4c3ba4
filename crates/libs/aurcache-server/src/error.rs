//! Maps domain and process errors onto HTTP responses (spec.md §7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Wraps [`aurcache_core::Error`] for handlers that propagate with `?`.
/// Per spec.md §7, an uncaught failure in any handler becomes an HTTP 500
/// with a fixed body; the cause is logged, not echoed to the client.
pub struct AppError(pub aurcache_core::Error);

impl From<aurcache_core::Error> for AppError {
    fn from(err: aurcache_core::Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "unhandled error in request handler");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
    }
}
