use std::net::SocketAddr;
use std::sync::Arc;

use cf_clearance_proxy::{ClearanceRelay, RelayConfig, server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cf_clearance_proxy=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = RelayConfig::from_env()?;
    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    let relay = Arc::new(ClearanceRelay::new(config)?);

    server::serve(Arc::clone(&relay), addr, shutdown_signal()).await?;

    log::info!("shutting down browsers");
    relay.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            Err(err) => {
                log::warn!("SIGTERM handler unavailable: {err}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
