//! Instrumented demo service.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ CatchPanic ─▶ instrumentation ─▶ Timeout ─▶ handler
//!                                  (hooks | dispatch)
//!                                        │
//!                     ┌──────────────────┼──────────────────┐
//!                     ▼                  ▼                  ▼
//!               Prometheus          OTLP spans         JSON log lines
//!               /metrics            (batched)          (stdout)
//! ```
//!
//! Runs until SIGINT/SIGTERM, then drains requests and flushes spans.

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use golden_path::config::{apply_env_overrides_from_process, load_config, ServiceConfig};
use golden_path::http::{HttpServer, MiddlewareShape};
use golden_path::lifecycle::{spawn_signal_listener, Shutdown};
use golden_path::observability::logging::init_diagnostics;
use golden_path::ObservabilityMiddleware;

#[derive(Parser, Debug)]
#[command(name = "golden-path", version, about = "Instrumented demo HTTP service")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration.
    #[arg(short, long)]
    bind: Option<String>,

    /// Instrumentation shape: hooks or dispatch.
    #[arg(long, default_value = "hooks")]
    shape: MiddlewareShape,

    /// Service name when no configuration file is given.
    #[arg(long, default_value = "golden-path")]
    service_name: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_diagnostics("golden_path=info,tower_http=info")?;

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => {
            let mut config = ServiceConfig::default();
            config.observability.service_name = cli.service_name.clone();
            apply_env_overrides_from_process(&mut config.observability);
            config
        }
    };
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }

    tracing::info!(
        service = %config.observability.service_name,
        bind_address = %config.server.bind_address,
        shape = ?cli.shape,
        "Configuration loaded"
    );

    let observability = ObservabilityMiddleware::new(config.observability.clone())?;

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    spawn_signal_listener(shutdown.clone());

    let server = HttpServer::new(&config.server, observability.clone(), cli.shape);
    server.run(listener, server_shutdown).await?;

    observability.shutdown()?;
    tracing::info!("Shutdown complete");
    Ok(())
}
