mod cli;

use liveforged::{
    config,
    lifecycle::LifecycleController,
    registry::{self, Registry},
    server::{self, AppContext},
    tools,
};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Upper bound on how often idle records are swept.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    // Load config
    let mut config = config::load_config_or_default(config_path)?;

    // Override host/port from CLI if specified
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config::validate_config(&config)?;

    tracing::info!("Starting liveforged");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    std::fs::create_dir_all(&config.output.root).with_context(|| {
        format!("Failed to create output root: {:?}", config.output.root)
    })?;
    tracing::info!("Serving HLS output from {:?}", config.output.root);

    let transcoder = tools::check_transcoder(&config.transcode.command);
    if !transcoder.available {
        tracing::warn!(
            "Transcoder {} not found; publishes will fail until it is installed",
            transcoder.name
        );
    }

    // Start lifecycle controller
    let registry = Registry::new();
    let controller = LifecycleController::from_config(&config, registry.clone());
    let (controller_handle, controller_task) = controller.spawn();

    // Start idle record eviction
    let cancel = CancellationToken::new();
    let eviction_task = config.registry.idle_retention().map(|retention| {
        registry::start_eviction_task(
            registry.clone(),
            retention,
            retention.min(MAX_SWEEP_INTERVAL),
            cancel.clone(),
        )
    });

    // Start HTTP server
    let ctx = AppContext::new(config, controller_handle.clone(), registry);
    let server_result = server::start_server(ctx).await;

    // Cleanup
    tracing::info!("Shutting down...");
    match controller_handle.shutdown().await {
        Ok(report) => tracing::info!(
            stopped = report.stopped,
            timed_out = report.timed_out,
            "All streams stopped"
        ),
        Err(e) => tracing::warn!("Controller shutdown failed: {}", e),
    }
    let _ = controller_task.await;
    cancel.cancel();
    if let Some(task) = eviction_task {
        let _ = task.await;
    }

    server_result
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            // Verbose mode: trace for liveforged, debug for HTTP
            "liveforged=trace,liveforged_common=debug,tower_http=debug".to_string()
        } else {
            // Normal mode: debug for liveforged, info for HTTP requests
            "liveforged=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            // Create tokio runtime
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("liveforged {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn check_tools(config_path: Option<&std::path::Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path)?;
    let tool = tools::check_transcoder(&config.transcode.command);

    let status = if tool.available { "✓" } else { "✗" };
    print!("{} {}", status, tool.name);

    if let Some(ref version) = tool.version {
        print!(" ({})", version);
    }

    if let Some(ref path) = tool.path {
        print!(" - {}", path.display());
    }

    println!();
    println!();
    if tool.available {
        println!("Transcoder is available!");
    } else {
        println!("Transcoder is missing. Install it or set [transcode].command.");
    }

    Ok(())
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Ingest: {}", config.ingest.base_url);
            println!("  Output root: {:?}", config.output.root);
            println!("  Transcoder: {:?}", config.transcode.command);
            println!(
                "  Segments: {}s x {}",
                config.transcode.segment_duration_secs, config.transcode.playlist_size
            );
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Output root: {:?}", config.output.root);
        }
    }

    Ok(())
}
