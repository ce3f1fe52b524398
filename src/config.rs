//! Configuration for the Passage exchange service
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use uuid::Uuid;

use crate::exchange::ExchangeStoreConfig;

/// Passage - single-use exchange service for relayed delegation chains
#[derive(Parser, Debug, Clone)]
#[command(name = "passage")]
#[command(about = "Single-use blob exchange for the Passage delegation relay")]
pub struct Args {
    /// Unique identifier for this service instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8088")]
    pub listen: SocketAddr,

    /// Longest lifetime a published record may request, in seconds
    #[arg(long, env = "EXCHANGE_MAX_TTL_SECS", default_value = "300")]
    pub max_ttl_secs: u64,

    /// Largest accepted payload in bytes
    #[arg(long, env = "EXCHANGE_MAX_PAYLOAD_BYTES", default_value = "65536")]
    pub max_payload_bytes: usize,

    /// Upper bound on live records
    #[arg(long, env = "EXCHANGE_MAX_RECORDS", default_value = "100000")]
    pub max_records: usize,

    /// Interval between expired-record sweeps, in seconds
    #[arg(long, env = "EXCHANGE_CLEANUP_INTERVAL_SECS", default_value = "30")]
    pub cleanup_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_ttl_secs == 0 {
            return Err("EXCHANGE_MAX_TTL_SECS must be greater than zero".to_string());
        }
        // Exchange records are a handoff, not storage
        if self.max_ttl_secs > 3600 {
            return Err("EXCHANGE_MAX_TTL_SECS must not exceed 3600".to_string());
        }
        if self.max_payload_bytes == 0 {
            return Err("EXCHANGE_MAX_PAYLOAD_BYTES must be greater than zero".to_string());
        }
        if self.max_records == 0 {
            return Err("EXCHANGE_MAX_RECORDS must be greater than zero".to_string());
        }
        if self.cleanup_interval_secs == 0 {
            return Err("EXCHANGE_CLEANUP_INTERVAL_SECS must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn store_config(&self) -> ExchangeStoreConfig {
        ExchangeStoreConfig {
            max_ttl: Duration::from_secs(self.max_ttl_secs),
            max_payload_bytes: self.max_payload_bytes,
            max_records: self.max_records,
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}
