//! Static asset serving with a directory-traversal guard and SPA fallback.

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolve a requested path under the asset root, or `None` when the path
/// escapes the root, does not exist, or is not a regular file. Rejects
/// `..` components and absolute paths before touching the filesystem.
pub fn safe_static_path(base_dir: &Path, requested: &str) -> Option<PathBuf> {
    let requested = if requested.is_empty() {
        "index.html"
    } else {
        requested
    };
    if requested.contains("..") || requested.starts_with('/') {
        return None;
    }
    let base = base_dir.canonicalize().ok()?;
    let candidate = base_dir.join(requested).canonicalize().ok()?;
    if candidate.starts_with(&base) && candidate.is_file() {
        Some(candidate)
    } else {
        None
    }
}

/// Serve `requested` from `base_dir`, falling back to `index.html` for
/// unknown paths so client-side routing works.
pub async fn serve(base_dir: &Path, requested: &str) -> Response {
    let resolved = match safe_static_path(base_dir, requested) {
        Some(path) => path,
        None => {
            debug!(requested, "static path not found, serving SPA fallback");
            let index = base_dir.join("index.html");
            if !index.is_file() {
                return (StatusCode::NOT_FOUND, "Not Found").into_response();
            }
            index
        }
    };

    let content_type = mime_guess::from_path(&resolved)
        .first_or_octet_stream()
        .to_string();

    match tokio::fs::read(&resolved).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type)],
            Body::from(bytes),
        )
            .into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "Not Found").into_response(),
    }
}
