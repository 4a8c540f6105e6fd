//! Server entry point: configuration, index warm-up, background tasks, and
//! the WebSocket listener.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mdqa_core::{CachePaths, CliOverrides, ServerConfig};
use mdqa_embed::{EmbeddingCache, OpenAiChat, OpenAiEmbedder};
use mdqa_index::IndexManager;
use mdqa_server::reload::{spawn_scheduler, ConfigWatcher};
use mdqa_server::{build_router, AppState, QueryOptions};

/// Markdown Q&A server.
///
/// Configuration precedence (highest to lowest): command-line arguments,
/// config file (~/.md-qa/config.yaml), environment variables, defaults.
#[derive(Parser, Debug)]
#[command(name = "mdqa-server", version, about)]
struct Cli {
    /// WebSocket server port (default: 8765)
    #[arg(long)]
    port: Option<u16>,

    /// Directories to index (repeatable or comma-separated)
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    directories: Option<Vec<PathBuf>>,

    /// Index reload interval in seconds (default: 300)
    #[arg(long)]
    reload_interval: Option<u64>,

    /// Index name (default: "default")
    #[arg(long)]
    index_name: Option<String>,

    /// Path to the config file (default: ~/.md-qa/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl From<Cli> for CliOverrides {
    fn from(cli: Cli) -> Self {
        CliOverrides {
            port: cli.port,
            directories: cli.directories,
            reload_interval: cli.reload_interval,
            index_name: cli.index_name,
            config_file: cli.config,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli: CliOverrides = Cli::parse().into();
    let config = ServerConfig::load(&cli)
        .map_err(|e| anyhow::anyhow!("configuration error: {e}"))?;

    let paths = CachePaths::new(mdqa_core::config::config_dir())?;
    let cache = Arc::new(EmbeddingCache::new(paths.embeddings_dir.clone()));
    let embedder = Arc::new(OpenAiEmbedder::new(&config.api, cache)?);
    let chat = Arc::new(OpenAiChat::new(&config.api)?);
    let manager = Arc::new(IndexManager::new(paths, embedder));

    info!(
        "loading index '{}' for {} directory(ies)",
        config.index_name,
        config.directories.len()
    );
    manager
        .load_or_build(&config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load indexes: {e}"))?;
    info!("indexes loaded successfully");

    let port = config.port;
    let state = Arc::new(AppState::new(cli, config, manager, chat, QueryOptions::default()));

    *state.scheduler.lock().await = Some(spawn_scheduler(&state));
    let watcher = ConfigWatcher::start(state.clone());

    let app = build_router(state.clone());
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("server ready and listening on ws://localhost:{port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down server");
    watcher.stop().await;
    if let Some(scheduler) = state.scheduler.lock().await.take() {
        scheduler.stop().await;
    }
    info!("server stopped");
    Ok(())
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
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
