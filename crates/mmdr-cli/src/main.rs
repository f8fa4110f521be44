//! mmdr CLI entrypoint.

use clap::Parser;

mod client;
mod commands;
mod config;
mod handlers;
mod live;

use client::ApiClient;
use commands::Commands;
use mmdr_trace::{TracingConfig, init_tracer};

#[derive(Parser)]
#[command(name = "mmdr")]
#[command(author, version, about = "Mermaid diagram render server and client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Serve { config } = &cli.command {
        return handlers::serve(config.as_deref()).await;
    }

    // Client commands only log warnings unless RUST_LOG says otherwise.
    init_tracer(&TracingConfig {
        default_filter: "warn".to_string(),
        ..Default::default()
    })?;

    match cli.command {
        Commands::Serve { .. } => Ok(()),
        Commands::Render {
            file,
            format,
            out,
            options,
            server,
        } => handlers::render(&ApiClient::new(&server.server), &file, format, out, options).await,
        Commands::Live {
            file,
            format,
            out,
            options,
            server,
        } => handlers::live(&ApiClient::new(&server.server), file, format, out, options).await,
        Commands::Cache { command, server } => {
            handlers::cache(&ApiClient::new(&server.server), command).await
        }
    }
}
