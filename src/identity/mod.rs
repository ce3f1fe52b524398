//! Keys, delegations and delegation chains
//!
//! # Trust path
//!
//! ```text
//!   provider root ──signs──▶ intermediate key ──signs──▶ app target key
//!   (anchor, publicKey)      (relay memory only)         (app keystore)
//! ```
//!
//! The first hop comes from the provider's own login ceremony in the trusted
//! browser. The second hop is signed locally by the relay with an
//! intermediate key that never leaves its memory, so the provider is never
//! asked to delegate straight to a key supplied by the embedded app.

pub mod chain;
pub mod delegation;
pub mod keys;
pub mod provider;

pub use chain::{ChainError, DelegationChain, RELAY_CHAIN_LEN};
pub use delegation::{Delegation, SignedDelegation};
pub use keys::{KeyError, KeyPair, PublicKey};
pub use provider::{request_delegation, DelegationGrant, DelegatorContext, KeyPairProvider};
