use crate::registry::{StreamRecord, StreamState};
use crate::server::AppContext;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use liveforged_common::StreamId;
use serde::Serialize;

pub fn api_routes() -> Router<AppContext> {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/streams", get(list_streams))
        .route("/streams/:id", get(get_stream))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Serialize)]
struct StreamStats {
    total: usize,
    idle: usize,
    publishing: usize,
    transcoding: usize,
    stopping: usize,
}

async fn stats(State(ctx): State<AppContext>) -> impl IntoResponse {
    let registry = &ctx.registry;
    Json(StreamStats {
        total: registry.len(),
        idle: registry.count_in(StreamState::Idle),
        publishing: registry.count_in(StreamState::Publishing),
        transcoding: registry.count_in(StreamState::Transcoding),
        stopping: registry.count_in(StreamState::Stopping),
    })
}

async fn list_streams(State(ctx): State<AppContext>) -> Json<Vec<StreamRecord>> {
    Json(ctx.registry.list())
}

async fn get_stream(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<StreamRecord>, (StatusCode, String)> {
    let id = StreamId::parse(&id).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    ctx.registry
        .get(&id)
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Stream not found: {}", id)))
}
