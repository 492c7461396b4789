//! Binary TCP server for the chat engine.

use chat_server::config::Config;
use chat_server::server;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;

    info!(
        "starting chat-server on {}:{} (max_clients = {})",
        config.bind_addr, config.port, config.max_clients
    );

    let shutdown = CancellationToken::new();
    server::run(config, shutdown).await?;
    Ok(())
}
