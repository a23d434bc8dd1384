use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use mcp_plugin_bridge::bridge::spawn_sweeper;
use mcp_plugin_bridge::channel::StdioChannel;
use mcp_plugin_bridge::{build_registry, BridgeConfig, BridgeServer};

/// Bridge MCP tool calls to a plugin that can only poll
#[derive(Parser, Debug)]
#[command(name = "mcp-plugin-bridge", version, about)]
struct Args {
    /// Path to a TOML config file
    #[arg(long, env = "BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Host for the plugin-facing HTTP server
    #[arg(long, env = "BRIDGE_HOST")]
    host: Option<String>,

    /// Port for the plugin-facing HTTP server
    #[arg(long, env = "BRIDGE_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // stdout belongs to the channel transport; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mcp_plugin_bridge=info,tower_http=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => BridgeConfig::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let server = BridgeServer::new(config.clone(), build_registry());

    let listener = TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("binding {}", config.bind_addr()))?;
    tracing::info!(
        addr = %listener.local_addr()?,
        tools = server.tools().len(),
        "Plugin bridge listening"
    );

    let sweeper = spawn_sweeper(server.broker().clone(), config.sweep_interval());

    let channel = StdioChannel::new(
        server.connection().clone(),
        server.broker().clone(),
        config.keepalive_interval(),
    );
    let channel_task = tokio::spawn(channel.run(tokio::io::stdin()));

    let shutdown = async move {
        tokio::select! {
            result = channel_task => match result {
                Ok(Ok(())) => tracing::info!("MCP channel closed, shutting down"),
                Ok(Err(e)) => tracing::warn!(error = %e, "MCP channel failed, shutting down"),
                Err(e) => tracing::warn!(error = %e, "MCP channel task aborted, shutting down"),
            },
            _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl-C, shutting down"),
        }
    };

    server.serve(listener, shutdown).await.context("serving HTTP")?;
    sweeper.abort();

    Ok(())
}
