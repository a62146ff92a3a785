mod actor;
mod config;
mod logging;
mod server;

use config::Config;
use std::net::SocketAddr;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config = Config::load();
    logging::init(&config);
    let addr: SocketAddr = match config.addr.parse() {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_addr", error = %err, addr = %config.addr);
            return;
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "hub_error", error = %err);
            return;
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!(event = "shutdown_requested");
        let _ = shutdown_tx.send(true);
    });

    if let Err(err) = server::serve(listener, config, shutdown_rx).await {
        error!(event = "hub_error", error = %err);
    }
}
