//! Git smart-HTTP gateway (spec.md §4.5, C5): classifies Git-shaped requests,
//! maps them onto `git-upload-pack`/`git-receive-pack` subprocess invocations
//! or static repo files, and streams the framed response back.

use crate::error::AppError;
use crate::AppState;
use aurcache_core::proc;
use aurcache_core::types::{GitOperationDescriptor, GitOperationFlags, GitOperationKind};
use aurcache_core::Error;
use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use futures_util::StreamExt;
use std::time::Duration;
use tokio_util::io::ReaderStream;

/// Git subprocess operations here reuse the clone timeout budget; spec.md §4.2
/// mandates 30s only for clone, but does not set a separate pack-operation
/// deadline, so the same bound is applied for simplicity.
const PACK_TIMEOUT: Duration = Duration::from_secs(30);
const UPLOAD_PACK_ADVERTISEMENT_HEADER: &[u8] = b"001e# service=git-upload-pack\n0000";
const RECEIVE_PACK_ADVERTISEMENT_HEADER: &[u8] = b"001f# service=git-receive-pack\n0000";
const NOT_FOUND_BODY: &str = "Repository not found in cache and could not be fetched from upstream";

/// A path is Git-shaped if it ends with `.git`, contains `.git/`, or
/// contains any of the listed substrings. The substring test on bare `HEAD`
/// and `objects/` is intentionally broad, matching legacy client behaviour
/// (spec.md §4.5; flagged as a looser-than-ideal predicate in spec.md §9).
pub fn is_git_request(path: &str) -> bool {
    path.ends_with(".git")
        || path.contains(".git/")
        || path.contains("/info/refs")
        || path.contains("/HEAD")
        || path.contains("/objects/")
        || path.contains("/refs/")
        || path.contains("git-upload-pack")
        || path.contains("git-receive-pack")
}

/// Extracts the package/repository name from a Git-shaped path (spec.md §4.5).
fn extract_repo_name(path: &str) -> String {
    if let Some(stripped) = path.strip_suffix(".git") {
        return basename(stripped);
    }
    if let Some(idx) = path.find(".git/") {
        return basename(&path[..idx]);
    }
    path.trim_start_matches('/').split('/').next().unwrap_or("").to_string()
}

fn basename(path: &str) -> String {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or("").to_string()
}

pub async fn handle(state: AppState, request: Request) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let path = uri.path().to_string();
    let query = uri.query().unwrap_or("");
    let name = extract_repo_name(&path);

    let outcome = match state.cache.ensure_package(&name).await {
        Ok(outcome) => outcome,
        // Both clone attempts failed validation (spec.md §4.4 step 3d); an
        // `Err` of any other variant is a genuine internal failure (e.g.
        // flipping `core.bare` failed), distinct from "repository not
        // found" (spec.md §7's generic uncaught-handler-error case).
        Err(Error::RepositoryNotFound { .. }) => return (StatusCode::NOT_FOUND, NOT_FOUND_BODY).into_response(),
        Err(err) => return AppError::from(err).into_response(),
    };
    let repo = outcome.repo;

    let response = if method == axum::http::Method::POST && path.contains("git-upload-pack") {
        let body = axum::body::to_bytes(request.into_body(), usize::MAX).await.unwrap_or_default();
        touch_meaningful(&state, &name).await;
        let descriptor = GitOperationDescriptor {
            kind: GitOperationKind::UploadPack,
            flags: GitOperationFlags { stateless_rpc: true, advertise_refs: false },
            git_dir: repo.git_dir.clone(),
        };
        run_pack(&descriptor, "application/x-git-upload-pack-result", &body).await
    } else if method == axum::http::Method::POST && path.contains("git-receive-pack") {
        let body = axum::body::to_bytes(request.into_body(), usize::MAX).await.unwrap_or_default();
        touch_meaningful(&state, &name).await;
        let descriptor = GitOperationDescriptor {
            kind: GitOperationKind::ReceivePack,
            flags: GitOperationFlags { stateless_rpc: true, advertise_refs: false },
            git_dir: repo.git_dir.clone(),
        };
        run_pack(&descriptor, "application/x-git-receive-pack-result", &body).await
    } else if method == axum::http::Method::GET && query.contains("service=git-upload-pack") {
        let descriptor = GitOperationDescriptor {
            kind: GitOperationKind::UploadPack,
            flags: GitOperationFlags { stateless_rpc: true, advertise_refs: true },
            git_dir: repo.git_dir.clone(),
        };
        stream_advertisement(&descriptor, UPLOAD_PACK_ADVERTISEMENT_HEADER, "application/x-git-upload-pack-advertisement").await
    } else if method == axum::http::Method::GET && query.contains("service=git-receive-pack") {
        let descriptor = GitOperationDescriptor {
            kind: GitOperationKind::ReceivePack,
            flags: GitOperationFlags { stateless_rpc: true, advertise_refs: true },
            git_dir: repo.git_dir.clone(),
        };
        stream_advertisement(&descriptor, RECEIVE_PACK_ADVERTISEMENT_HEADER, "application/x-git-receive-pack-advertisement").await
    } else if method == axum::http::Method::GET && path.contains("/info/refs") && repo.git_dir.join("info/refs").is_file() {
        stream_static_file(&repo.git_dir.join("info/refs"), "text/plain").await
    } else if method == axum::http::Method::GET && path.contains("/HEAD") {
        if repo.git_dir.join("HEAD").is_file() {
            stream_static_file(&repo.git_dir.join("HEAD"), "text/plain").await
        } else {
            StatusCode::NOT_FOUND.into_response()
        }
    } else if method == axum::http::Method::GET
        && (path.contains("/objects/") || path.contains("/refs/") || path.contains(".git/"))
    {
        touch_meaningful(&state, &name).await;
        let tail = path.trim_start_matches('/');
        let resolved = state.cache.resolve_git_file(&repo, tail);
        stream_static_file(&resolved, "application/octet-stream").await
    } else if method == axum::http::Method::GET {
        Redirect::to(&format!("{path}/info/refs?service=git-upload-pack")).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    };

    // A cold fetch's `record_fetch` already set `total_requests = 1` for the
    // very request that triggered the clone (spec.md §8 scenario S1);
    // touching access again here would double-count it, so only a request
    // against an already-materialized repository bumps the counter.
    if !outcome.freshly_materialized {
        touch_access(&state, &name).await;
    }
    response
}

async fn touch_access(state: &AppState, name: &str) {
    if let Err(err) = state.cache.store().touch_access(name).await {
        tracing::warn!(package = name, error = %err, "touch_access failed");
    }
}

async fn touch_meaningful(state: &AppState, name: &str) {
    if let Err(err) = state.cache.store().touch_meaningful(name).await {
        tracing::warn!(package = name, error = %err, "touch_meaningful failed");
    }
}

/// Renders a Git operation descriptor's flags into subprocess argv, matching
/// the `(kind, flags)` pair spec.md §3 describes: `--stateless-rpc` and/or
/// `--advertise-refs` followed by the absolute Git directory.
fn descriptor_args(flags: GitOperationFlags, git_dir: &str) -> Vec<String> {
    let mut args = Vec::with_capacity(3);
    if flags.stateless_rpc {
        args.push("--stateless-rpc".to_string());
    }
    if flags.advertise_refs {
        args.push("--advertise-refs".to_string());
    }
    args.push(git_dir.to_string());
    args
}

/// Runs a batched `git-upload-pack`/`git-receive-pack` invocation described
/// by `descriptor`, feeding `stdin` and returning the full response.
async fn run_pack(descriptor: &GitOperationDescriptor, content_type: &'static str, stdin: &Bytes) -> Response {
    let git_dir = descriptor.git_dir.to_string_lossy().into_owned();
    let args = descriptor_args(descriptor.flags, &git_dir);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let program = descriptor.kind.program();

    let output = match proc::run_batched(program, &arg_refs, stdin, None, PACK_TIMEOUT).await {
        Ok(output) => output,
        Err(err) => {
            tracing::error!(program, error = %err, "pack subprocess failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
        }
    };

    if !output.ok {
        let message = String::from_utf8_lossy(&output.stderr).into_owned();
        return (StatusCode::INTERNAL_SERVER_ERROR, message).into_response();
    }

    ([(header::CONTENT_TYPE, content_type)], output.stdout).into_response()
}

async fn stream_advertisement(descriptor: &GitOperationDescriptor, prefix: &'static [u8], content_type: &'static str) -> Response {
    let git_dir = descriptor.git_dir.to_string_lossy().into_owned();
    let args = descriptor_args(descriptor.flags, &git_dir);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let command = descriptor.kind.program();

    let handle = match proc::spawn_streaming(command, &arg_refs, None) {
        Ok(handle) => handle,
        Err(err) => {
            tracing::error!(command, error = %err, "advertisement subprocess failed to spawn");
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
        }
    };
    let proc::StreamingHandle { stdout, mut child } = handle;
    tokio::spawn(async move {
        let _ = child.wait().await;
    });

    let header_stream = futures_util::stream::once(async move { Ok::<Bytes, std::io::Error>(Bytes::from_static(prefix)) });
    let body_stream = header_stream.chain(ReaderStream::new(stdout));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache, max-age=0, must-revalidate")
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn stream_static_file(path: &std::path::Path, content_type: &'static str) -> Response {
    match tokio::fs::File::open(path).await {
        Ok(file) => {
            let stream = ReaderStream::new(file);
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CACHE_CONTROL, "no-cache, max-age=0, must-revalidate")
                .body(Body::from_stream(stream))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_git_paths() {
        assert!(is_git_request("/pkgfoo.git/info/refs"));
        assert!(is_git_request("/pkgfoo.git"));
        assert!(is_git_request("/pkgfoo/objects/ab/cdef"));
        assert!(!is_git_request("/rpc?type=info"));
        assert!(!is_git_request("/"));
    }

    #[test]
    fn extracts_repo_name_from_dot_git_suffix() {
        assert_eq!(extract_repo_name("/pkgfoo.git"), "pkgfoo");
    }

    #[test]
    fn extracts_repo_name_from_dot_git_slash() {
        assert_eq!(extract_repo_name("/pkgfoo.git/info/refs"), "pkgfoo");
    }

    #[test]
    fn extracts_repo_name_from_first_segment() {
        assert_eq!(extract_repo_name("/pkgfoo/HEAD"), "pkgfoo");
    }
}
