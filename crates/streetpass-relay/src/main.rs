//! streetpass-relay: the shared realtime presence backend.
//!
//! Hosts one [`PresenceTree`] and serves it to devices over TCP with the
//! JSON-lines protocol of `streetpass_presence::wire`. Everything lives in
//! memory; a restart starts from an empty tree.

mod config;

use std::sync::Arc;

use streetpass_presence::{PresenceTree, RelayServer};
use tracing::{error, info};

use crate::config::RelayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("streetpass={}", config.logging.log_level).parse()?),
        )
        .init();

    info!("StreetPass relay starting");

    let tree = Arc::new(PresenceTree::new());
    let server = RelayServer::bind(&config.server.listen_addr, tree).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Relay error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    info!("Relay stopped");
    Ok(())
}
