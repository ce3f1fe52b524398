//! Single-use blob exchange
//!
//! The relay parks the serialized chain here under a random code; the app
//! consumes it exactly once with the code and its own nonce.

pub mod client;
pub mod http;
pub mod record;
pub mod store;
pub mod wire;

pub use client::ExchangeClient;
pub use http::{HttpBlobStore, HttpBlobStoreConfig};
pub use record::{generate_code, generate_nonce, ExchangeRecord};
pub use store::{
    spawn_cleanup_task, BlobStore, ExchangeStoreConfig, MemoryBlobStore, StoreStatsSnapshot,
};
