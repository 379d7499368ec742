use crate::config::Config;
use crate::lifecycle::ControllerHandle;
use crate::registry::Registry;
use anyhow::{Context, Result};
use axum::{
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod routes_api;
pub mod routes_hooks;
pub mod routes_live;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    /// Entry point for ingest notifications
    pub controller: ControllerHandle,
    /// Read-only view of stream state
    pub registry: Registry,
}

impl AppContext {
    pub fn new(config: Config, controller: ControllerHandle, registry: Registry) -> Self {
        Self {
            config: Arc::new(config),
            controller,
            registry,
        }
    }

    /// Directory served under `/live`.
    pub fn output_root(&self) -> PathBuf {
        self.config.output.root.clone()
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::RANGE]);

    let live = routes_live::live_routes(&ctx.output_root());

    Router::new()
        // Health check
        .route("/health", get(health_check))
        .nest("/api", routes_api::api_routes())
        // Ingest server callbacks
        .nest("/hooks", routes_hooks::hook_routes())
        .with_state(ctx)
        // Playlists and segments
        .merge(live)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// Run the HTTP server until Ctrl-C or SIGTERM.
pub async fn start_server(ctx: AppContext) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", ctx.config.server.host, ctx.config.server.port)
        .parse()
        .context("Invalid server address")?;

    let app = create_router(ctx);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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

    tracing::info!("Shutdown signal received");
}
