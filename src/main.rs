//! Moltbot Gateway
//!
//! A reverse proxy for the Moltbot control panel built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                   ┌───────────────────────────────────────────────┐
//!                   │                MOLTBOT GATEWAY                │
//!                   │                                               │
//!  Client Request   │  ┌──────────┐      ┌───────────────────────┐  │
//!  ─────────────────┼─▶│   http   │─────▶│  proxy handler        │──┼──▶ Upstream
//!                   │  │  server  │      │  (URI re-target)      │  │    (panel)
//!                   │  └──────────┘      └───────────┬───────────┘  │
//!                   │                                │              │
//!  Client Response  │  ┌──────────────────────┐      │              │
//!  ◀────────────────┼──│ rewrite (token relay │◀─────┘              │
//!                   │  │ into HTML replies)   │                     │
//!                   │  └──────────────────────┘                     │
//!                   │                                               │
//!                   │  config · observability · lifecycle           │
//!                   └───────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use moltbot_gateway::config::watcher::ConfigWatcher;
use moltbot_gateway::config::{load_config, GatewayConfig};
use moltbot_gateway::http::HttpServer;
use moltbot_gateway::lifecycle::Shutdown;
use moltbot_gateway::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "moltbot-gateway")]
#[command(about = "Reverse proxy for the Moltbot control panel with token-relay injection")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_present = cli.config.exists();
    let config = if config_present {
        load_config(&cli.config)?
    } else {
        GatewayConfig::default()
    };

    logging::init_logging(&config.observability);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "moltbot-gateway starting");
    if !config_present {
        tracing::warn!(path = ?cli.config, "Config file not found, using defaults");
    }
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.address,
        rewrite_enabled = config.rewrite.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => {
                tracing::error!(
                    metrics_address = %config.observability.metrics_address,
                    error = %e,
                    "Failed to parse metrics address"
                );
            }
        }
    }

    let shutdown = Shutdown::new();
    shutdown.spawn_signal_listener();

    // Hot reload: the watcher feeds validated configs to the server.
    let (config_tx, config_updates) = mpsc::unbounded_channel();
    let _watcher = if config_present {
        match ConfigWatcher::new(&cli.config, config_tx).run() {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(error = %e, "Config watcher failed to start, hot reload disabled");
                None
            }
        }
    } else {
        None
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::new(config)?;
    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
