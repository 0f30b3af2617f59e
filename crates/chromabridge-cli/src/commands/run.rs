use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::info;

use chromabridge_core::{AppConfig, BridgeClient, NotificationSurface, WebSocketTransport};

/// Terminal stand-in for the host's notification surface: prints the
/// transient message instead of rendering an overlay.
struct TerminalSurface;

impl NotificationSurface for TerminalSurface {
    fn show(&self, text: &str) {
        println!("*** {text}");
    }
}

pub async fn run(config: AppConfig) -> Result<()> {
    let mut client = BridgeClient::new(
        &config,
        Arc::new(WebSocketTransport),
        Arc::new(TerminalSurface),
    )?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    client.init().await;
    client.run(shutdown_rx).await;

    Ok(())
}
