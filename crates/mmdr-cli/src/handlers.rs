//! Command handlers.

use crate::client::ApiClient;
use crate::commands::{CacheCommands, OptionArgs, OutputFormat, output_path};
use crate::config::ServerConfig;
use crate::live::{self, LivePolicy};
use anyhow::{Context, Result};
use console::style;
use mmdr_api::{AppState, RenderCommand};
use mmdr_cache::{ArtifactCache, FilesystemStore};
use mmdr_core::Format;
use mmdr_render::{RenderCoordinator, RenderMetrics, ResourceManager, ResvgRasterizer, WorkerBackend};
use mmdr_trace::{init_tracer, shutdown_tracer};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Run the render server until SIGINT or SIGTERM.
pub async fn serve(config_path: Option<&Path>) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    init_tracer(&config.tracing()?)?;

    let store = FilesystemStore::new(config.cache_dir.clone());
    if config.cache_enabled {
        store.ensure_dir().await?;
    }
    let cache = Arc::new(ArtifactCache::new(Arc::new(store), config.cache()));

    let render = config.render();
    let backend = Arc::new(WorkerBackend::new(config.worker()?));
    let resources = Arc::new(ResourceManager::new(backend, render.clone(), RenderMetrics::new()));
    let coordinator = Arc::new(RenderCoordinator::new(
        cache,
        resources,
        Arc::new(ResvgRasterizer::default()),
        render,
    ));
    let state = Arc::new(AppState::new(coordinator, config.api()));

    let listener = TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr()))?;
    mmdr_api::serve(listener, state, shutdown_signal()).await?;

    info!("Server stopped");
    shutdown_tracer();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Render one file through the server.
pub async fn render(
    client: &ApiClient,
    file: &Path,
    format: OutputFormat,
    out: Option<PathBuf>,
    options: OptionArgs,
) -> Result<()> {
    let source = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let format = Format::from(format);
    let out = output_path(file, out, format);

    let rendered = client.render(&source, format, &options.into()).await?;
    tokio::fs::write(&out, &rendered.bytes)
        .await
        .with_context(|| format!("Failed to write {}", out.display()))?;

    println!(
        "{} Wrote {} ({} bytes)",
        style("✓").green(),
        style(out.display()).bold(),
        rendered.bytes.len()
    );
    for (name, value) in &rendered.diagnostics {
        println!("  {}: {}", style(name).dim(), value);
    }
    Ok(())
}

/// Watch a file and push renders over the live channel.
pub async fn live(
    client: &ApiClient,
    file: PathBuf,
    format: OutputFormat,
    out: Option<PathBuf>,
    options: OptionArgs,
) -> Result<()> {
    let format = Format::from(format);
    let out = output_path(&file, out, format);
    let template = RenderCommand {
        mermaid: None,
        options: options.into(),
        format: Some(format),
    };
    live::watch(client.live_url(), file, template, out, LivePolicy::default()).await
}

/// Cache management against a running server.
pub async fn cache(client: &ApiClient, command: CacheCommands) -> Result<()> {
    let response = match command {
        CacheCommands::Stats => client.cache_stats().await?,
        CacheCommands::Clear => {
            let response = client.clear_cache().await?;
            println!("{} Cache cleared", style("✓").green());
            response
        }
        CacheCommands::Delete { key } => {
            let response = client.delete_cache_entry(&key).await?;
            println!("{} Removed entries for {}", style("✓").green(), style(&key).dim());
            response
        }
    };
    print_json(&response)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
