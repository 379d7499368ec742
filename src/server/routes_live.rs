//! HLS delivery.
//!
//! Playlists and segments are served straight from the output root. The
//! transcoder rewrites the playlist every segment, so it must never be cached;
//! segments are immutable once listed.

use axum::{
    extract::Request,
    http::{header, HeaderValue},
    middleware::{self, Next},
    response::Response,
    Router,
};
use liveforged_common::paths::{content_type_for, is_manifest_file, is_segment_file};
use std::path::Path;
use tower_http::services::ServeDir;

const MANIFEST_CACHE_CONTROL: &str = "no-cache, no-store, must-revalidate";
const SEGMENT_CACHE_CONTROL: &str = "public, max-age=60";

/// `/live/<stream_id>/<file>` backed by `<root>/<stream_id>/<file>`.
pub fn live_routes(root: &Path) -> Router {
    Router::new()
        .nest_service("/live", ServeDir::new(root))
        .layer(middleware::from_fn(hls_headers))
}

async fn hls_headers(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let mut response = next.run(request).await;

    if !response.status().is_success() {
        return response;
    }

    let path = Path::new(&path);
    let headers = response.headers_mut();
    if let Some(content_type) = content_type_for(path) {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    if is_manifest_file(path) {
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static(MANIFEST_CACHE_CONTROL),
        );
    } else if is_segment_file(path) {
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static(SEGMENT_CACHE_CONTROL),
        );
    }

    response
}
