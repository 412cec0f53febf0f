use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use tokio_util::io::ReaderStream;

use crate::app::AppState;
use crate::http::not_found;

/// GET /exports/{file} — stream a finished artifact.
///
/// The file name must be a plain name inside the exports directory; anything
/// path-like is rejected before touching the filesystem.
pub async fn download_export(
    State(state): State<Arc<AppState>>,
    Path(file): Path<String>,
) -> Response {
    if file.contains("..") || file.contains('/') || file.contains('\\') {
        return not_found("export");
    }
    // Partial files are never published.
    if file.ends_with(".part") {
        return not_found("export");
    }

    let path = state.config.exports_dir().join(&file);
    let Ok(handle) = tokio::fs::File::open(&path).await else {
        return not_found("export");
    };

    let content_type = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => "application/json; charset=utf-8",
        Some("txt") => "text/plain; charset=utf-8",
        Some("html") => "text/html; charset=utf-8",
        _ => "application/octet-stream",
    };
    let body = Body::from_stream(ReaderStream::new(handle));
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file}\""),
            ),
        ],
        body,
    )
        .into_response()
}
