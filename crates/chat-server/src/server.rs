//! TCP listener and top-level server wiring.
//!
//! This module:
//! - Listens on the configured address/port.
//! - Accepts new TCP connections, gated by `max_clients`.
//! - Spawns a supervised per-connection task for each one.
//!
//! The per-connection state machine and request routing live in the
//! `connection` module; the shared user table lives in `registry`.

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::connection;
use crate::registry::UserRegistry;

/// Run the TCP server with the given configuration until `shutdown`
/// fires.
pub async fn run(config: Config, shutdown: CancellationToken) -> Result<()> {
    let addr = config.socket_addr_string();
    let listener = TcpListener::bind(&addr).await?;
    info!("listening on {}", addr);
    run_with_listener(listener, config, shutdown).await
}

/// Same as [`run`], but on an already-bound listener. Useful for tests
/// and embedding, where the caller binds port 0 and reads the local
/// address back.
pub async fn run_with_listener(
    listener: TcpListener,
    config: Config,
    shutdown: CancellationToken,
) -> Result<()> {
    let registry = Arc::new(UserRegistry::new());

    loop {
        let (stream, peer_addr) = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("accept loop stopping");
                return Ok(());
            }
            accepted = listener.accept() => accepted?,
        };

        if registry.len() >= config.max_clients {
            warn!(
                "rejecting connection from {}: max_clients ({}) reached",
                peer_addr, config.max_clients
            );
            // Just drop the stream; the client sees a closed connection.
            continue;
        }

        info!("accepted connection from {}", peer_addr);

        let registry = Arc::clone(&registry);
        let conn_shutdown = shutdown.child_token();
        tokio::spawn(async move {
            if let Err(e) =
                connection::run_connection(stream, peer_addr, registry, conn_shutdown).await
            {
                warn!("connection {} ended with error: {:?}", peer_addr, e);
            }
        });
    }
}
