//! # Sync Gateway
//!
//! Reverse proxy in front of an asynchronous message-send API. A send
//! request is held open until the message's delivery status is known,
//! from the upstream's status webhook or from polling, and the status is
//! returned in place of the bare queued acknowledgment.

use anyhow::{Context, Result};
use tracing::info;

use gateway_runtime::{init_tracing, load_config};
use sync_gateway::{SyncGatewayService, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = load_config().context("failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.logging).context("failed to initialize logging")?;

    info!("===========================================");
    info!("  Sync Gateway v{}", VERSION);
    info!("===========================================");
    info!(
        upstream = %config.upstream.base(),
        callback_url = %config.callback.base_url,
        wait_timeout_ms = config.wait.timeout.as_millis() as u64,
        "Configuration loaded"
    );

    // Create and start the gateway
    let service = SyncGatewayService::new(config).context("failed to create gateway")?;
    let handle = service.start().await.context("failed to start gateway")?;

    // Keep running until Ctrl+C or a server failure
    info!("Gateway is running. Press Ctrl+C to stop.");
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            info!("Received shutdown signal");
        }
        _ = handle.stopped() => {
            info!("A server stopped, shutting down");
        }
    }

    // Graceful shutdown
    handle.shutdown().await;

    Ok(())
}
