use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber;

use turnstile::admission::{AdmissionController, WindowTracker};
use turnstile::config::TurnstileConfig;
use turnstile::http::{AdmissionState, HttpServer};

#[derive(Parser, Debug)]
#[command(name = "turnstile")]
#[command(about = "Multi-window request admission control for HTTP APIs")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Listen address, overriding the configuration file
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    info!("Starting Turnstile admission controller");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => TurnstileConfig::from_file(path)?,
        None => TurnstileConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    info!(
        listen_addr = %config.server.listen_addr,
        resource_policies = config.limits.resources.len(),
        exempt_paths = config.limits.exempt_paths.len(),
        "Configuration loaded"
    );

    // Wire the controller: registry and tracker are built once and shared by
    // reference with the middleware.
    let registry = config.limits.build_registry();
    let tracker = Arc::new(WindowTracker::new());
    let controller = AdmissionController::new(registry, Arc::clone(&tracker));
    let state = Arc::new(AdmissionState::new(
        controller,
        config.limits.exempt_paths.clone(),
    ));
    info!("Admission controller initialized");

    // Periodically drop window state for clients idle past retention.
    let sweep_interval = Duration::from_secs(config.server.sweep_interval_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            tracker.sweep_idle(Instant::now());
        }
    });

    let server = HttpServer::new(config.server.listen_addr, state);

    // Run the server with graceful shutdown on Ctrl+C or SIGTERM
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Turnstile admission controller stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
