//! Passage - single-use exchange service for the delegation relay

use clap::Parser;
use tracing::{error, info};

use passage::{config::Args, logging, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init(&args.log_level, args.log_json);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Passage - delegation relay exchange");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Record max TTL: {}s", args.max_ttl_secs);
    info!("Max payload: {} bytes", args.max_payload_bytes);
    info!("Max records: {}", args.max_records);
    info!("Cleanup interval: {}s", args.cleanup_interval_secs);
    info!("======================================");

    tokio::select! {
        result = server::run(args) => {
            if let Err(e) = result {
                error!("Server error: {:?}", e);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    Ok(())
}
