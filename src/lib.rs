//! Passage - delegation relay for embedded apps
//!
//! An app running inside an embedded browser that the identity provider will
//! not trust gets its credential through a relay: a provider-trusted browser
//! session logs in, builds a two-hop delegation chain ending at the app's own
//! key, and parks it in a single-use exchange. The app gets back only a
//! random code and its own nonce through a deep link, and consumes the chain
//! exactly once.
//!
//! ## Components
//!
//! - **identity**: Ed25519 keys, signed delegations, delegation chains
//! - **relay**: trusted-context session controller and URI formats
//! - **exchange**: single-use blob exchange (store trait, memory and HTTP stores)
//! - **credential**: app-side importer and credential persistence
//! - **fallback**: retry and direct-login coordination on the app side
//! - **server**: reference HTTP exchange service (the `passage` binary)

pub mod config;
pub mod credential;
pub mod exchange;
pub mod fallback;
pub mod identity;
pub mod logging;
pub mod relay;
pub mod server;
pub mod types;

pub use config::Args;
pub use credential::{Credential, CredentialImporter, PendingRelay, SignedRequest};
pub use exchange::{BlobStore, ExchangeClient, HttpBlobStore, MemoryBlobStore};
pub use fallback::{FallbackCoordinator, RetryPolicy, SignInOutcome};
pub use identity::{DelegationChain, KeyPair, PublicKey};
pub use relay::{RelaySession, RelayState};
pub use types::{RelayError, Result};
