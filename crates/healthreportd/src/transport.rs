//! Unix socket transport for bridge signals.
//!
//! Each line is a JSON `BridgeMessage`. Inbound lines are dispatched into the
//! bridge; every outbound signal is written to every connected client.
//!
//! A client holds at most the bridge's outbound capacity of unread signals
//! (`report.queue_capacity + report.workers`, at least 64). Past that the
//! oldest are dropped for that client and the number skipped is logged.

use crate::bridge::LocalBridge;
use anyhow::{Context, Result};
use healthreport_common::BridgeMessage;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

/// Bind `socket_path`, replacing a stale socket file
pub async fn bind(socket_path: &Path) -> Result<UnixListener> {
    if let Some(socket_dir) = socket_path.parent() {
        tokio::fs::create_dir_all(socket_dir)
            .await
            .context("Failed to create socket directory")?;
    }

    // Remove old socket if it exists
    let _ = tokio::fs::remove_file(socket_path).await;

    let listener = UnixListener::bind(socket_path).context("Failed to bind Unix socket")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o660))?;
    }

    info!("Listening on {}", socket_path.display());
    Ok(listener)
}

/// Accept connections until the listener fails
pub async fn serve(listener: UnixListener, bridge: Arc<LocalBridge>) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let bridge = Arc::clone(&bridge);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, bridge).await {
                        error!("Connection handler error: {:#}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Handle a single client connection
async fn handle_connection(stream: UnixStream, bridge: Arc<LocalBridge>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut outbound = bridge.outbound();

    // Outbound signals are forwarded until the client goes away
    let forward = tokio::spawn(async move {
        loop {
            let message = match outbound.recv().await {
                Ok(message) => message,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "Client lagging; {} signals skipped (outbound capacity exceeded)",
                        skipped
                    );
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let line = match serde_json::to_string(&message) {
                Ok(json) => json + "\n",
                Err(e) => {
                    error!("Failed to encode {}: {}", message.event, e);
                    continue;
                }
            };
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    let result = loop {
        line.clear();
        let bytes_read = match reader.read_line(&mut line).await {
            Ok(n) => n,
            Err(e) => break Err(e).context("Failed to read from socket"),
        };

        if bytes_read == 0 {
            // Connection closed
            break Ok(());
        }

        let message: BridgeMessage = match serde_json::from_str(line.trim_end()) {
            Ok(message) => message,
            Err(e) => {
                warn!("Invalid signal JSON: {}", e);
                continue;
            }
        };

        debug!("Inbound {}", message.event);
        bridge.dispatch(&message.event, message.payload.as_deref());
    };

    forward.abort();
    result
}
