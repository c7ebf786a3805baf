//! Cross-ledger staking vault service
//!
//! Runs the vault against simulated host and counterparty ledgers and exposes
//! deposits, withdrawals and share views over HTTP.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use xledger_vault::api;
use xledger_vault::config::Settings;
use xledger_vault::metrics::MetricsServer;
use xledger_vault::sim;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting xledger vault v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        instance = %settings.vault.instance_id,
        "Loaded configuration with {} token mappings",
        settings.token_mappings.len()
    );

    // Build the vault over simulated ledgers
    let (_ledgers, vault) = sim::bootstrap(&settings).await?;
    let vault = Arc::new(vault);
    info!(
        custody = %vault.custody().owner(),
        "Vault initialized with {} simulated pools",
        settings.simulation.pools.len()
    );

    // Initialize metrics server
    let metrics_server = if settings.metrics.enabled {
        Some(MetricsServer::new(settings.metrics.port))
    } else {
        None
    };

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let vault = vault.clone();
        async move {
            if let Err(e) = api::run_server(config, vault).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = metrics_server.map(|server| {
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Log settled calls
    let events_handle = tokio::spawn({
        let mut events = vault.subscribe_events();
        async move {
            loop {
                match events.recv().await {
                    Ok(event) => info!(
                        event = event.name(),
                        pool = %event.pool_id(),
                        user = %event.user(),
                        call_id = %event.call_id(),
                        "Vault event"
                    ),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Event log lagged, {} events skipped", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    });

    info!("xledger vault is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    api_handle.abort();
    events_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("xledger vault stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,xledger_vault=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
}
