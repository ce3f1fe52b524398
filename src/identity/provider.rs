//! Delegator contexts.
//!
//! Anything that can sign "key X may act for me" is a [`DelegatorContext`]:
//! the identity provider's login ceremony in the trusted browser, or a key
//! pair held in memory (the relay's intermediate key).

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::delegation::SignedDelegation;
use super::keys::{KeyPair, PublicKey};
use crate::types::time::nanos_after;
use crate::types::{now_nanos, RelayError, Result};

/// A signed delegation and the key that signed it
#[derive(Debug, Clone)]
pub struct DelegationGrant {
    /// Key that produced `delegation.signature` (the provider root for the first hop)
    pub delegator: PublicKey,
    pub delegation: SignedDelegation,
}

/// Something able to delegate its identity to another key.
#[async_trait]
pub trait DelegatorContext: Send + Sync {
    /// Sign a delegation to `target` valid for at most `ttl`.
    ///
    /// Implementations report refusals as [`RelayError::ProviderRejected`].
    async fn delegate(&self, target: &PublicKey, ttl: Duration) -> Result<DelegationGrant>;
}

/// Ask `context` for a delegation, giving up after `timeout`.
pub async fn request_delegation<D>(
    context: &D,
    target: &PublicKey,
    ttl: Duration,
    timeout: Duration,
) -> Result<DelegationGrant>
where
    D: DelegatorContext + ?Sized,
{
    match tokio::time::timeout(timeout, context.delegate(target, ttl)).await {
        Ok(Ok(grant)) => {
            if grant.delegation.delegate() != target {
                warn!("Delegator returned a delegation for a different key");
                return Err(RelayError::ProviderRejected(
                    "delegation names a different key".to_string(),
                ));
            }
            if !grant.delegation.verify_signature(&grant.delegator) {
                warn!("Delegator returned a delegation with an invalid signature");
                return Err(RelayError::ProviderRejected(
                    "delegation signature invalid".to_string(),
                ));
            }
            debug!(delegate = ?target, "Delegation granted");
            Ok(grant)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(RelayError::Timeout("delegation request".to_string())),
    }
}

#[async_trait]
impl DelegatorContext for KeyPair {
    async fn delegate(&self, target: &PublicKey, ttl: Duration) -> Result<DelegationGrant> {
        let now = now_nanos();
        let delegation = SignedDelegation::issue(self, *target, nanos_after(now, ttl), None, now)
            .map_err(RelayError::MalformedChain)?;
        Ok(DelegationGrant {
            delegator: self.public_key(),
            delegation,
        })
    }
}

/// In-process identity provider backed by its own root key.
///
/// Stands in for the real provider in tests and local wiring: it grants every
/// request, clamped to `max_ttl`, optionally scoped to `targets`.
pub struct KeyPairProvider {
    root: KeyPair,
    max_ttl: Duration,
    targets: Option<Vec<String>>,
}

impl KeyPairProvider {
    pub fn new(max_ttl: Duration) -> Self {
        Self {
            root: KeyPair::generate(),
            max_ttl,
            targets: None,
        }
    }

    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.targets = Some(targets);
        self
    }

    /// The anchor key every chain from this provider starts at
    pub fn root_public_key(&self) -> PublicKey {
        self.root.public_key()
    }
}

#[async_trait]
impl DelegatorContext for KeyPairProvider {
    async fn delegate(&self, target: &PublicKey, ttl: Duration) -> Result<DelegationGrant> {
        let now = now_nanos();
        let ttl = ttl.min(self.max_ttl);
        let delegation = SignedDelegation::issue(
            &self.root,
            *target,
            nanos_after(now, ttl),
            self.targets.clone(),
            now,
        )
        .map_err(|_| RelayError::ProviderRejected("requested lifetime is empty".to_string()))?;

        Ok(DelegationGrant {
            delegator: self.root.public_key(),
            delegation,
        })
    }
}
