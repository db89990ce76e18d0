//! Request engine server.
//!
//! ```text
//!     Client Request
//!     ──────▶ net listener ──▶ http server ──▶ pipeline ──▶ module endpoint
//!                                  │              │
//!                                  │              ├── sessions / admission
//!                                  │              ├── response cache tiers
//!                                  │              └── compression
//!     Client Response ◀────────────┘
//!
//!     Background: maintenance task, config watcher, admin API, metrics
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use request_engine::admin::setup_admin_router;
use request_engine::config::{load_config, ConfigWatcher, EngineConfig};
use request_engine::engine::Engine;
use request_engine::http::HttpServer;
use request_engine::lifecycle::{forward_signals, MaintenanceTask, Shutdown};
use request_engine::net::listener::BoundedListener;
use request_engine::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "request-engine")]
#[command(about = "HTTP request lifecycle engine", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "ENGINE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };

    logging::init(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "request-engine starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let engine = Engine::builder(config.clone()).build();
    let shutdown = Shutdown::new();

    // Hot reload. The watcher handle must outlive the server.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let handle = watcher.run()?;
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                while let Some(config) = updates.recv().await {
                    engine.apply_config(config);
                }
            });
            Some(handle)
        }
        None => None,
    };

    tokio::spawn(MaintenanceTask::new(Arc::clone(&engine)).run(shutdown.subscribe()));

    if config.admin.enabled {
        let admin = setup_admin_router(Arc::clone(&engine));
        let listener = tokio::net::TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %config.admin.bind_address, "Admin API listening");
        let mut stop = shutdown.subscribe();
        tokio::spawn(async move {
            let served = axum::serve(listener, admin)
                .with_graceful_shutdown(async move {
                    let _ = stop.recv().await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    let listener = BoundedListener::bind(&config.listener).await?;
    let server = HttpServer::new(Arc::clone(&engine));
    let server_shutdown = shutdown.subscribe();

    let signals = shutdown.clone();
    tokio::spawn(async move { forward_signals(&signals).await });

    server.run(listener, server_shutdown).await?;

    engine.shutdown();
    tracing::info!("Shutdown complete");
    Ok(())
}
