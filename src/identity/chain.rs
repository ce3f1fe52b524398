//! Delegation chains.
//!
//! A chain is a root (the provider's anchor key) followed by delegations
//! where each link is signed by the key the previous link delegated to. A
//! `DelegationChain` value is always linked: construction goes through
//! [`DelegationChain::compose`], including deserialization. Expiry is a
//! property of the verification time and is checked by
//! [`DelegationChain::validate`].

use serde::{Deserialize, Serialize};

use super::delegation::SignedDelegation;
use super::keys::PublicKey;
use crate::types::Timestamp;

/// Number of links in a chain produced by the relay (root -> intermediate -> target)
pub const RELAY_CHAIN_LEN: usize = 2;

/// Chain construction and verification failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("delegation chain is empty")]
    Empty,

    #[error("delegation {index} is not signed by its delegator")]
    BrokenLink { index: usize },

    #[error("delegation {index} has expired")]
    Expired { index: usize },

    #[error("delegation expiration must be in the future")]
    ExpiresInPast,

    #[error("expected {expected} delegations, found {actual}")]
    UnexpectedLength { expected: usize, actual: usize },

    #[error("chain does not delegate to the expected key")]
    DelegateMismatch,

    #[error("chain root is not a trusted provider key")]
    UntrustedRoot,

    #[error("request signature does not verify")]
    InvalidSignature,

    #[error("encoding error: {0}")]
    Encoding(String),
}

/// Ordered delegations anchored at the provider's root key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DelegationChain {
    delegations: Vec<SignedDelegation>,

    #[serde(rename = "publicKey")]
    public_key: PublicKey,
}

/// Wire shape, linked-checked before it becomes a `DelegationChain`
#[derive(Deserialize)]
struct RawChain {
    delegations: Vec<SignedDelegation>,
    #[serde(rename = "publicKey")]
    public_key: PublicKey,
}

impl<'de> Deserialize<'de> for DelegationChain {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawChain::deserialize(deserializer)?;
        Self::compose(raw.public_key, raw.delegations).map_err(serde::de::Error::custom)
    }
}

impl DelegationChain {
    /// Concatenate delegations in order, checking every link's signature
    /// against its delegator (the root for the first link).
    pub fn compose(
        root: PublicKey,
        delegations: Vec<SignedDelegation>,
    ) -> Result<Self, ChainError> {
        if delegations.is_empty() {
            return Err(ChainError::Empty);
        }

        let mut delegator = root;
        for (index, link) in delegations.iter().enumerate() {
            if !link.verify_signature(&delegator) {
                return Err(ChainError::BrokenLink { index });
            }
            delegator = *link.delegate();
        }

        Ok(Self {
            delegations,
            public_key: root,
        })
    }

    /// The provider's anchor key
    pub fn root(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn delegations(&self) -> &[SignedDelegation] {
        &self.delegations
    }

    pub fn len(&self) -> usize {
        self.delegations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delegations.is_empty()
    }

    /// The key the chain ultimately authorizes
    pub fn delegate(&self) -> &PublicKey {
        // compose() rejects empty chains
        self.delegations
            .last()
            .map(SignedDelegation::delegate)
            .unwrap_or(&self.public_key)
    }

    /// Earliest expiration across all links
    pub fn expiration(&self) -> Timestamp {
        self.delegations
            .iter()
            .map(SignedDelegation::expiration)
            .min()
            .unwrap_or(0)
    }

    /// Check every signature and every expiration against `now`.
    pub fn validate(&self, now: Timestamp) -> Result<(), ChainError> {
        if self.delegations.is_empty() {
            return Err(ChainError::Empty);
        }

        let mut delegator = self.public_key;
        for (index, link) in self.delegations.iter().enumerate() {
            if !link.verify_signature(&delegator) {
                return Err(ChainError::BrokenLink { index });
            }
            if link.delegation.is_expired_at(now) {
                return Err(ChainError::Expired { index });
            }
            delegator = *link.delegate();
        }
        Ok(())
    }

    pub fn verify(&self, now: Timestamp) -> bool {
        self.validate(now).is_ok()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ChainError> {
        serde_json::to_vec(self).map_err(|e| ChainError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChainError> {
        let raw: RawChain =
            serde_json::from_slice(bytes).map_err(|e| ChainError::Encoding(e.to_string()))?;
        Self::compose(raw.public_key, raw.delegations)
    }
}
