//! meshpad-relay: signalling relay for meshpad collaboration rooms.
//!
//! Peers connect over WebSocket, join a room by name and exchange opaque
//! payloads through the relay. Document state never touches this process.
//!
//! Environment:
//! - `MESHPAD_RELAY_ADDR`: bind address (default `127.0.0.1:9191`)
//! - `MESHPAD_MAX_PEERS`: peers allowed per room (default 64)
//! - `RUST_LOG`: log filter, e.g. `info` or `meshpad_collab=debug`

use log::{error, info, warn};
use meshpad_collab::{RelayConfig, RelayServer};

fn config_from_env() -> RelayConfig {
    let mut config = RelayConfig::default();
    if let Ok(addr) = std::env::var("MESHPAD_RELAY_ADDR") {
        config.bind_addr = addr;
    }
    if let Ok(raw) = std::env::var("MESHPAD_MAX_PEERS") {
        match raw.parse() {
            Ok(max) => config.max_peers_per_room = max,
            Err(e) => warn!("Ignoring MESHPAD_MAX_PEERS={raw}: {e}"),
        }
    }
    config
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = config_from_env();
    info!(
        "Starting meshpad relay on {} (max {} peers per room)",
        config.bind_addr, config.max_peers_per_room
    );

    let server = RelayServer::new(config);
    if let Err(e) = server.run().await {
        error!("Relay stopped: {e}");
        std::process::exit(1);
    }
}
