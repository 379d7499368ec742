//! Ingest server callbacks.
//!
//! nginx-rtmp and compatible servers POST a form with the stream `name` when a
//! publisher connects or disconnects. Any non-2xx answer makes nginx-rtmp drop
//! the publisher, so an invalid identifier is rejected with 400.

use crate::server::AppContext;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Form, Router,
};
use liveforged_common::{Error, StreamId};
use serde::Deserialize;

pub fn hook_routes() -> Router<AppContext> {
    Router::new()
        .route("/on_publish", post(on_publish))
        .route("/on_unpublish", post(on_unpublish))
}

/// Callback parameters. Only `name` is used.
#[derive(Debug, Default, Deserialize)]
pub struct HookParams {
    pub name: Option<String>,
    pub app: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Hook {
    Publish,
    Unpublish,
}

async fn on_publish(
    State(ctx): State<AppContext>,
    Query(query): Query<HookParams>,
    form: Option<Form<HookParams>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    handle_hook(ctx, Hook::Publish, query, form).await
}

async fn on_unpublish(
    State(ctx): State<AppContext>,
    Query(query): Query<HookParams>,
    form: Option<Form<HookParams>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    handle_hook(ctx, Hook::Unpublish, query, form).await
}

async fn handle_hook(
    ctx: AppContext,
    hook: Hook,
    query: HookParams,
    form: Option<Form<HookParams>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let form = form.map(|Form(params)| params).unwrap_or_default();
    let app = form.app.or(query.app);
    let name = form.name.or(query.name).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            "Missing stream name".to_string(),
        )
    })?;

    let result: Result<StreamId, Error> = match hook {
        Hook::Publish => ctx.controller.publish(&name).await,
        Hook::Unpublish => ctx.controller.unpublish(&name).await,
    };

    match result {
        Ok(id) => {
            tracing::debug!(stream_id = %id, app = ?app, ?hook, "Accepted ingest callback");
            Ok(StatusCode::OK)
        }
        Err(e) => {
            let status = error_status(&e);
            tracing::warn!(
                name = %name,
                ?hook,
                error_kind = e.kind(),
                "Rejected ingest callback: {}",
                e
            );
            Err((status, e.to_string()))
        }
    }
}

fn error_status(err: &Error) -> StatusCode {
    match err {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::Internal(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
