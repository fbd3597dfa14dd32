mod config;
mod http;
mod logging;
mod server;

use anyhow::Result;
use clap::Parser;
use radio_sfu::{RoomRegistry, RtcPeerFactory};
use std::sync::Arc;
use tracing::info;

use config::{Args, Config};
use server::RadioServer;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration
    let args = Args::parse();
    let config = Config::from_args(&args)?;

    // 1.5. Validate configuration (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Radio server starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. WebRTC stack and room registry
    let factory = Arc::new(RtcPeerFactory::new(&config.sfu)?);
    let registry = Arc::new(RoomRegistry::new(config.sfu.clone(), factory));

    // 4. Serve until shutdown
    RadioServer::new(config, registry).start().await
}
